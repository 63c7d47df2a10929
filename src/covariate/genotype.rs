//! Gender from the het rate of genotype calls on non-pseudoautosomal chrX SNPs.
//!
//! Calls come either from a quick contrast-threshold caller that watches the
//! streaming pass, or from a user-supplied genotype table.

use super::{provenance, CovariateSource, Gender, MetricValue, SampleMetric, SnpProbes};
use crate::error::{GenoError, Result};
use crate::genotype::{CallTally, GenotypeCall};
use crate::intensity::IntensityListener;
use crate::samples::{Sample, SampleSet};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Het rate strictly below this is male.
pub const MALE_HET_RATE_THRESHOLD: f64 = 0.075;

/// Quick-call contrast bands.
const HOM_CONTRAST: f64 = 0.5;
const HET_CONTRAST: f64 = 0.2;

pub fn classify_het_rate(tally: &CallTally) -> Gender {
    match tally.het_rate() {
        Some(rate) if rate < MALE_HET_RATE_THRESHOLD => Gender::Male,
        Some(_) => Gender::Female,
        None => Gender::Unknown,
    }
}

#[derive(Debug)]
pub struct GenotypeDerivedCovariate {
    name: &'static str,
    description: String,
    tallies: Vec<CallTally>,
    values: Vec<Gender>,
    produced: bool,
}

impl GenotypeDerivedCovariate {
    pub fn from_tallies(name: &'static str, description: impl Into<String>, tallies: Vec<CallTally>) -> Self {
        let values = tallies.iter().map(classify_het_rate).collect();
        let produced = tallies.iter().any(|t| t.total() > 0);
        Self {
            name,
            description: description.into(),
            tallies,
            values,
            produced,
        }
    }

    pub fn ensure_usable(&self) -> Result<()> {
        if !self.produced {
            return Err(GenoError::evidence(format!(
                "{}: no chrX genotype calls were available",
                self.name
            )));
        }
        Ok(())
    }
}

impl CovariateSource<Gender> for GenotypeDerivedCovariate {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn values(&self) -> &[Gender] {
        &self.values
    }

    fn produced_data(&self) -> bool {
        self.produced
    }

    fn sample_metrics(&self, sample: usize) -> Vec<SampleMetric> {
        vec![
            SampleMetric::new(
                format!("{}_gender", self.name),
                MetricValue::Text(
                    self.values
                        .get(sample)
                        .copied()
                        .unwrap_or(Gender::Unknown)
                        .to_string(),
                ),
            ),
            SampleMetric::optional_number(
                format!("{}_chrX_het_rate", self.name),
                self.tallies.get(sample).and_then(|t| t.het_rate()),
            ),
        ]
    }
}

/// Contrast-threshold caller run during the streaming pass.
pub fn quick_call(contrast: f64) -> GenotypeCall {
    if contrast >= HOM_CONTRAST {
        GenotypeCall::AA
    } else if contrast <= -HOM_CONTRAST {
        GenotypeCall::BB
    } else if contrast.abs() <= HET_CONTRAST {
        GenotypeCall::AB
    } else {
        GenotypeCall::NoCall
    }
}

pub struct QuickCallListener {
    snps: Vec<SnpProbes>,
    k: f64,
    tallies: Vec<CallTally>,
}

impl QuickCallListener {
    pub fn new(snps: Vec<SnpProbes>, k: f64) -> Self {
        Self {
            snps,
            k,
            tallies: Vec::new(),
        }
    }

    pub fn into_covariate(self) -> GenotypeDerivedCovariate {
        let description = format!(
            "het rate of quick calls on {} chrX SNPs (male below {})",
            self.snps.len(),
            MALE_HET_RATE_THRESHOLD
        );
        GenotypeDerivedCovariate::from_tallies(provenance::DM_HET_RATE, description, self.tallies)
    }
}

impl IntensityListener for QuickCallListener {
    fn new_sample(&mut self, sample: &Sample, intensities: &[f32]) -> Result<()> {
        if sample.index != self.tallies.len() {
            return Err(GenoError::data_integrity(format!(
                "{} saw sample {} out of order.",
                provenance::DM_HET_RATE,
                sample.index
            )));
        }
        let mut tally = CallTally::default();
        for snp in &self.snps {
            let call = snp
                .contrast(intensities, self.k)
                .map_or(GenotypeCall::NoCall, quick_call);
            tally.add(call);
        }
        debug!(
            "{}: {} AA={} AB={} BB={} NC={}",
            provenance::DM_HET_RATE,
            sample.name,
            tally.n_aa,
            tally.n_ab,
            tally.n_bb,
            tally.n_nc
        );
        self.tallies.push(tally);
        Ok(())
    }
}

/// Loads a genotype table (`probeset_id` then one column per sample, codes
/// 0/1/2/-1) and tallies the rows listed in `chrx_snps`.
pub fn read_supplied_genotypes(
    path: &Path,
    samples: &SampleSet,
    chrx_snps: &HashSet<String>,
) -> Result<GenotypeDerivedCovariate> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;

    let mut column_of_sample: Vec<usize> = Vec::new();
    let mut header_seen = false;
    let mut tallies = vec![CallTally::default(); samples.len()];
    let mut rows_used = 0usize;

    for (line_idx, line_result) in BufReader::new(file).lines().enumerate() {
        let line_num = line_idx + 1;
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if !header_seen {
            if fields.first() != Some(&"probeset_id") {
                return Err(GenoError::parse(path, line_num, "expected a 'probeset_id' header"));
            }
            let by_name: HashMap<String, usize> = fields
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, f)| {
                    let base = Path::new(f)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| f.to_string());
                    (base, i)
                })
                .collect();
            for sample in samples.iter() {
                let col = by_name.get(&sample.name).ok_or_else(|| {
                    GenoError::data_integrity(format!(
                        "Genotype file {} has no column for sample '{}'.",
                        path.display(),
                        sample.name
                    ))
                })?;
                column_of_sample.push(*col);
            }
            header_seen = true;
            continue;
        }
        if !chrx_snps.contains(fields[0]) {
            continue;
        }
        rows_used += 1;
        for (sample_idx, &col) in column_of_sample.iter().enumerate() {
            let token = fields.get(col).ok_or_else(|| {
                GenoError::parse(path, line_num, format!("row has no column {}", col + 1))
            })?;
            let call = token
                .parse::<i64>()
                .ok()
                .and_then(GenotypeCall::from_code)
                .ok_or_else(|| {
                    GenoError::parse(path, line_num, format!("bad genotype code '{}'", token))
                })?;
            tallies[sample_idx].add(call);
        }
    }

    if !header_seen {
        return Err(GenoError::data_integrity(format!(
            "Genotype file {} has no 'probeset_id' header, so no sample columns.",
            path.display()
        )));
    }
    if rows_used == 0 {
        warn!(
            "Genotype file {} has no rows for the {} chrX SNPs.",
            path.display(),
            chrx_snps.len()
        );
    } else {
        info!("Used {} chrX rows from genotype file {}.", rows_used, path.display());
    }
    Ok(GenotypeDerivedCovariate::from_tallies(
        provenance::SUPPLIED_GENOTYPES,
        format!("het rate of chrX calls read from {}", path.display()),
        tallies,
    ))
}
