//! Gender from the heterozygosity of EM-clustered chrX contrasts.
//!
//! Per sample, every non-pseudoautosomal chrX SNP contributes one contrast
//! value computed from the median A and B intensities. The values are fitted
//! with the three-cluster EM and the resulting het rate decides the call.

use super::{provenance, CovariateSource, Gender, MetricValue, SampleMetric, SnpProbes};
use crate::em::{self, EmParams, EmSeed};
use crate::error::{GenoError, Result};
use crate::genotype::CallTally;
use crate::intensity::IntensityListener;
use crate::samples::Sample;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct EmGenderParams {
    /// Contrast shape constant.
    pub k: f64,
    /// Minimum fraction of chrX SNPs that must receive a confident call.
    pub coverage_cutoff: f64,
    /// Het rate below this is male.
    pub het_cutoff: f64,
    pub em: EmParams,
}

impl Default for EmGenderParams {
    fn default() -> Self {
        Self {
            k: 2.0,
            coverage_cutoff: 0.5,
            het_cutoff: 0.1,
            em: EmParams::default(),
        }
    }
}

/// Outcome for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct EmGenderCall {
    pub gender: Gender,
    pub het_rate: Option<f64>,
    pub coverage: f64,
}

/// Classifies one sample from its chrX contrasts. `total_snps` counts every
/// chrX SNP, including those whose contrast could not be computed.
pub fn classify_contrasts(contrasts: &[f64], total_snps: usize, params: &EmGenderParams) -> EmGenderCall {
    let fit = em::fit(contrasts, &EmSeed::default(), &params.em);
    let mut tally = CallTally::default();
    for call in &fit.calls {
        tally.add(*call);
    }
    let coverage = if total_snps == 0 {
        0.0
    } else {
        tally.called() as f64 / total_snps as f64
    };

    // The gate counts BB twice and never AB; a sample whose only calls are
    // heterozygous stays unknown.
    if tally.n_aa + tally.n_bb + tally.n_bb > 0 {
        let het_rate = tally.het_rate();
        let gender = match het_rate {
            _ if coverage < params.coverage_cutoff => Gender::Unknown,
            Some(rate) if rate < params.het_cutoff => Gender::Male,
            Some(_) => Gender::Female,
            None => Gender::Unknown,
        };
        EmGenderCall {
            gender,
            het_rate,
            coverage,
        }
    } else {
        EmGenderCall {
            gender: Gender::Unknown,
            het_rate: None,
            coverage,
        }
    }
}

pub struct EmClusterCovariate {
    snps: Vec<SnpProbes>,
    params: EmGenderParams,
    description: String,
    values: Vec<Gender>,
    calls: Vec<EmGenderCall>,
}

impl EmClusterCovariate {
    pub fn new(snps: Vec<SnpProbes>, params: EmGenderParams) -> Self {
        let description = format!(
            "EM clustering of {} chrX SNP contrasts (het cutoff {}, coverage cutoff {})",
            snps.len(),
            params.het_cutoff,
            params.coverage_cutoff
        );
        Self {
            snps,
            params,
            description,
            values: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn ensure_usable(&self) -> Result<()> {
        if self.snps.is_empty() {
            return Err(GenoError::evidence(format!(
                "{}: no chrX SNPs were supplied",
                provenance::EM_CLUSTER
            )));
        }
        Ok(())
    }

    pub fn calls(&self) -> &[EmGenderCall] {
        &self.calls
    }
}

impl IntensityListener for EmClusterCovariate {
    fn new_sample(&mut self, sample: &Sample, intensities: &[f32]) -> Result<()> {
        if sample.index != self.values.len() {
            return Err(GenoError::data_integrity(format!(
                "{} saw sample {} out of order.",
                provenance::EM_CLUSTER,
                sample.index
            )));
        }
        let contrasts: Vec<f64> = self
            .snps
            .iter()
            .filter_map(|snp| snp.contrast(intensities, self.params.k))
            .collect();
        let call = classify_contrasts(&contrasts, self.snps.len(), &self.params);
        debug!(
            "{}: {} het_rate={:?} coverage={:.3} -> {}",
            provenance::EM_CLUSTER,
            sample.name,
            call.het_rate,
            call.coverage,
            call.gender
        );
        self.values.push(call.gender);
        self.calls.push(call);
        Ok(())
    }
}

impl CovariateSource<Gender> for EmClusterCovariate {
    fn name(&self) -> &str {
        provenance::EM_CLUSTER
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn values(&self) -> &[Gender] {
        &self.values
    }

    fn produced_data(&self) -> bool {
        !self.snps.is_empty()
    }

    fn sample_metrics(&self, sample: usize) -> Vec<SampleMetric> {
        let call = self.calls.get(sample);
        vec![
            SampleMetric::new(
                format!("{}_gender", provenance::EM_CLUSTER),
                MetricValue::Text(call.map_or(Gender::Unknown, |c| c.gender).to_string()),
            ),
            SampleMetric::optional_number(
                format!("{}_chrX_het_rate", provenance::EM_CLUSTER),
                call.and_then(|c| c.het_rate),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ProbeId;
    use std::path::PathBuf;

    fn jittered(center: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| center + 0.05 * (((i * 37) % 11) as f64 / 10.0 - 0.5))
            .collect()
    }

    #[test]
    fn test_homozygous_contrasts_are_male() {
        let contrasts = jittered(-0.66, 200);
        let call = classify_contrasts(&contrasts, 200, &EmGenderParams::default());
        assert_eq!(call.gender, Gender::Male);
        assert!(call.het_rate.unwrap() < 0.01);
        assert!((call.coverage - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_even_split_is_female_with_third_het() {
        let mut contrasts = jittered(-0.66, 60);
        contrasts.extend(jittered(0.0, 60));
        contrasts.extend(jittered(0.66, 60));
        let call = classify_contrasts(&contrasts, 180, &EmGenderParams::default());
        let rate = call.het_rate.unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 0.02, "het rate {}", rate);
        assert_eq!(call.gender, Gender::Female);
    }

    #[test]
    fn test_het_cutoff_rule_is_exact() {
        let mut contrasts = jittered(0.66, 95);
        contrasts.extend(jittered(0.0, 5));
        let params = EmGenderParams {
            het_cutoff: 0.05,
            ..EmGenderParams::default()
        };
        // 5 of 100 is exactly the cutoff, which is not below it.
        let call = classify_contrasts(&contrasts, 100, &params);
        assert_eq!(call.het_rate, Some(0.05));
        assert_eq!(call.gender, Gender::Female);
    }

    #[test]
    fn test_low_coverage_is_unknown() {
        let contrasts = jittered(0.66, 10);
        let call = classify_contrasts(&contrasts, 100, &EmGenderParams::default());
        assert_eq!(call.gender, Gender::Unknown);
        assert!((call.coverage - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_het_only_sample_fails_the_gate() {
        let contrasts = jittered(0.0, 100);
        let call = classify_contrasts(&contrasts, 100, &EmGenderParams::default());
        assert_eq!(call.gender, Gender::Unknown);
        assert_eq!(call.het_rate, None);
    }

    #[test]
    fn test_listener_is_total_and_deterministic() {
        // SNP i uses probe 2i for A and 2i+1 for B.
        let snps: Vec<SnpProbes> = (0..40u32)
            .map(|i| SnpProbes {
                allele_a: vec![ProbeId(2 * i)],
                allele_b: vec![ProbeId(2 * i + 1)],
            })
            .collect();
        let male: Vec<f32> = (0..80).map(|p| if p % 2 == 0 { 1000.0 + p as f32 } else { 60.0 }).collect();
        let female: Vec<f32> = (0..80)
            .map(|p| match (p / 2) % 3 {
                0 => if p % 2 == 0 { 1000.0 } else { 60.0 },
                1 => 500.0,
                _ => if p % 2 == 0 { 60.0 } else { 1000.0 },
            })
            .collect();
        let run = || {
            let mut cov = EmClusterCovariate::new(snps.clone(), EmGenderParams::default());
            for (i, col) in [&male, &female].iter().enumerate() {
                let sample = Sample {
                    index: i,
                    path: PathBuf::from(format!("s{}", i)),
                    name: format!("s{}", i),
                };
                cov.new_sample(&sample, col).unwrap();
            }
            cov
        };
        let a = run();
        let b = run();
        assert_eq!(a.values(), &[Gender::Male, Gender::Female]);
        assert_eq!(a.values(), b.values());
        assert_eq!(a.sample_metrics(1).len(), 2);
    }
}
