//! Per-sample covariates (gender and inbreeding penalty) and the providers
//! that infer them.
//!
//! Every provider ends up as a [`CovariateSource`]: a named, immutable array
//! with one value per sample in canonical sample order. Intensity-based
//! providers fill that array while observing the streaming pass; file-based
//! providers read it up front. The [`selector::CovariateSelector`] then picks
//! exactly one source per covariate for the run.

pub mod em_cluster;
pub mod file;
pub mod genotype;
pub mod ratio;
pub mod selector;

use crate::layout::{ProbeId, Probeset};
use crate::stats::{contrast, median};
use std::fmt;

pub use em_cluster::EmClusterCovariate;
pub use genotype::{GenotypeDerivedCovariate, QuickCallListener};
pub use ratio::RatioThresholdCovariate;
pub use selector::CovariateSelector;

/// Provenance names, used in reports and by `--set-gender-method`.
pub mod provenance {
    pub const USER_SUPPLIED: &str = "user-supplied";
    pub const CN_PROBE_XY_RATIO: &str = "cn-probe-chrXY-ratio";
    pub const CN_PROBE_ZW_RATIO: &str = "cn-probe-chrZW-ratio";
    pub const EM_CLUSTER: &str = "em-cluster-chrX-het-contrast";
    pub const DM_HET_RATE: &str = "dm-chrX-het-rate";
    pub const SUPPLIED_GENOTYPES: &str = "supplied-genotypes-chrX-het-rate";
    pub const NONE: &str = "none";

    pub const GENDER_METHODS: [&str; 7] = [
        USER_SUPPLIED,
        CN_PROBE_XY_RATIO,
        CN_PROBE_ZW_RATIO,
        EM_CLUSTER,
        DM_HET_RATE,
        SUPPLIED_GENOTYPES,
        NONE,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heterozygote penalty for a sample; 0 means outbred.
pub type InbredPenalty = f64;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Text(String),
    Number(f64),
    Missing,
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::Number(v) => write!(f, "{:.5}", v),
            MetricValue::Missing => f.write_str("NA"),
        }
    }
}

/// One named per-sample value a provider contributes to the run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMetric {
    pub name: String,
    pub value: MetricValue,
}

impl SampleMetric {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub(crate) fn optional_number(name: impl Into<String>, value: Option<f64>) -> Self {
        Self::new(name, value.map_or(MetricValue::Missing, MetricValue::Number))
    }
}

/// A per-sample covariate with provenance.
pub trait CovariateSource<T> {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// One value per sample, in canonical sample order.
    fn values(&self) -> &[T];

    /// False when the provider had nothing to work with and every value is
    /// the neutral fallback. Such sources are skipped by the priority table.
    fn produced_data(&self) -> bool {
        true
    }

    /// Extra columns for the summary report.
    fn sample_metrics(&self, _sample: usize) -> Vec<SampleMetric> {
        Vec::new()
    }
}

/// A covariate with fixed values, from a file or the neutral fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedCovariate<T> {
    name: String,
    description: String,
    values: Vec<T>,
}

impl<T: Clone> FixedCovariate<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, values: Vec<T>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            values,
        }
    }

    /// The "no information" source: the neutral value for every sample.
    pub fn none(sample_count: usize, neutral: T) -> Self {
        Self::new(
            provenance::NONE,
            "no covariate information; neutral value for every sample",
            vec![neutral; sample_count],
        )
    }
}

impl<T> CovariateSource<T> for FixedCovariate<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn values(&self) -> &[T] {
        &self.values
    }
}

/// Allele probe lists of one sex-linked SNP, resolved from the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SnpProbes {
    pub allele_a: Vec<ProbeId>,
    pub allele_b: Vec<ProbeId>,
}

impl SnpProbes {
    pub fn from_probeset(probeset: &Probeset) -> Self {
        Self {
            allele_a: probeset.allele_a.clone(),
            allele_b: probeset.allele_b.clone(),
        }
    }

    /// Median A and B intensities for one sample.
    pub fn allele_medians(&self, intensities: &[f32]) -> Option<(f64, f64)> {
        let gather = |probes: &[ProbeId]| -> Option<Vec<f32>> {
            probes.iter().map(|p| intensities.get(p.index()).copied()).collect()
        };
        let a = median(&gather(&self.allele_a)?)?;
        let b = median(&gather(&self.allele_b)?)?;
        Some((a, b))
    }

    pub fn contrast(&self, intensities: &[f32], k: f64) -> Option<f64> {
        let (a, b) = self.allele_medians(intensities)?;
        contrast(a, b, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_source_is_total_and_neutral() {
        let genders = FixedCovariate::none(4, Gender::Unknown);
        assert_eq!(genders.values().len(), 4);
        assert!(genders.values().iter().all(|g| *g == Gender::Unknown));
        assert_eq!(genders.name(), provenance::NONE);

        let inbred = FixedCovariate::none(3, 0.0f64);
        assert_eq!(inbred.values(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_snp_contrast_uses_medians() {
        let snp = SnpProbes {
            allele_a: vec![ProbeId(0), ProbeId(1), ProbeId(2)],
            allele_b: vec![ProbeId(3)],
        };
        let intensities = [100.0, 900.0, 100.0, 100.0];
        assert_eq!(snp.allele_medians(&intensities), Some((100.0, 100.0)));
        assert!(snp.contrast(&intensities, 2.0).unwrap().abs() < 1e-12);
        assert_eq!(snp.allele_medians(&intensities[..2]), None);
    }

    #[test]
    fn test_metric_formatting() {
        assert_eq!(MetricValue::Number(0.123456).to_string(), "0.12346");
        assert_eq!(MetricValue::Missing.to_string(), "NA");
        assert_eq!(MetricValue::Text("male".into()).to_string(), "male");
    }
}
