//! Quantification methods: the per-probeset genotype callers the engine
//! dispatches to, and the narrow capability traits through which the engine
//! hands them priors, covariates and special-SNP lists.

pub mod contrast;

use crate::covariate::{Gender, InbredPenalty};
use crate::error::{GenoError, Result};
use crate::genotype::GenotypeCall;
use crate::intensity::IntensityStore;
use crate::layout::{ProbeId, Probeset};
use crate::prior::ClusterPrior;
use crate::stats::median;
use crate::transform::StageSpec;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

pub use contrast::ContrastClusterCaller;

/// Algorithm families; the gender priority table is keyed by these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFamily {
    Brlmm,
    BirdseedV1,
    BirdseedV2,
    BirdseedDev,
    LabelZ,
}

impl MethodFamily {
    pub fn for_method(name: &str) -> Option<Self> {
        match name {
            "brlmm" | "brlmm-p" => Some(MethodFamily::Brlmm),
            "birdseed" | "birdseed-v1" => Some(MethodFamily::BirdseedV1),
            "birdseed-v2" => Some(MethodFamily::BirdseedV2),
            "birdseed-dev" => Some(MethodFamily::BirdseedDev),
            "labelz" => Some(MethodFamily::LabelZ),
            _ => None,
        }
    }

    /// Confidence above which a call becomes a no call.
    pub fn default_conf_threshold(self) -> f64 {
        match self {
            MethodFamily::Brlmm => 0.26,
            MethodFamily::BirdseedV1 | MethodFamily::BirdseedV2 | MethodFamily::BirdseedDev => 0.1,
            MethodFamily::LabelZ => 0.05,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodFamily::Brlmm => "brlmm",
            MethodFamily::BirdseedV1 => "birdseed-v1",
            MethodFamily::BirdseedV2 => "birdseed-v2",
            MethodFamily::BirdseedDev => "birdseed-dev",
            MethodFamily::LabelZ => "labelz",
        }
    }
}

impl fmt::Display for MethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STANDARD_METHODS: [(&str, &str); 5] = [
    ("brlmm", "quant-norm.sketch=50000,brlmm"),
    ("birdseed-v1", "quant-norm.sketch=50000,birdseed-v1"),
    ("birdseed-v2", "quant-norm.sketch=50000,birdseed-v2"),
    ("birdseed-dev", "quant-norm.sketch=50000,birdseed-dev"),
    ("brlmm-p", "quant-norm.sketch=50000,pm-only,brlmm-p"),
];

/// A parsed analysis string: transform stages followed by the method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSpec {
    pub stages: Vec<StageSpec>,
    pub method: StageSpec,
    pub family: MethodFamily,
}

impl MethodSpec {
    /// Parses a comma-separated spec. A bare standard name expands to its
    /// usual stage list.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let expanded = STANDARD_METHODS
            .iter()
            .find(|(name, _)| *name == trimmed)
            .map_or(trimmed, |(_, full)| *full);

        let mut tokens = expanded
            .split(',')
            .map(StageSpec::parse)
            .collect::<Result<Vec<_>>>()?;
        let method = tokens
            .pop()
            .ok_or_else(|| GenoError::config("Empty analysis string."))?;
        let family = MethodFamily::for_method(&method.name).ok_or_else(|| {
            GenoError::config(format!(
                "Unknown quantification method '{}'. Known: brlmm, brlmm-p, birdseed-v1, birdseed-v2, birdseed-dev, labelz",
                method.name
            ))
        })?;
        if let Some(misplaced) = tokens.iter().find(|t| MethodFamily::for_method(&t.name).is_some()) {
            return Err(GenoError::config(format!(
                "Method '{}' must be the last entry of the analysis string.",
                misplaced.name
            )));
        }
        Ok(Self {
            stages: tokens,
            method,
            family,
        })
    }
}

impl fmt::Display for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stage in &self.stages {
            write!(f, "{},", stage)?;
        }
        write!(f, "{}", self.method)
    }
}

/// A single probeset could not be computed. Never fatal.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("probeset '{probeset}' has no usable allele signal on any sample")]
    NoSignal { probeset: String },

    #[error("probeset '{probeset}' is not a two-allele genotyping probeset")]
    NotGenotyping { probeset: String },

    #[error("probeset '{probeset}': {message}")]
    Degenerate { probeset: String, message: String },
}

/// One sample's result for one probeset.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleCall {
    pub call: GenotypeCall,
    /// 1 - posterior of the chosen genotype; lower is better.
    pub confidence: f64,
    /// Distance to the chosen cluster center, in cluster standard deviations.
    pub distance: f64,
    pub contrast: f64,
    pub signal_a: f64,
    pub signal_b: f64,
}

impl SampleCall {
    /// Placeholder written for every sample of a failed probeset.
    pub fn failed() -> Self {
        Self {
            call: GenotypeCall::NoCall,
            confidence: 1.0,
            distance: f32::MAX as f64,
            contrast: 0.0,
            signal_a: 0.0,
            signal_b: 0.0,
        }
    }
}

/// Allele signals of one probeset across every sample.
#[derive(Debug, Clone)]
pub struct ProbesetData<'a> {
    /// Position in the dispatch list.
    pub index: usize,
    pub probeset: &'a Probeset,
    /// Per-sample median over the allele's probes; NaN when the allele has
    /// no probes.
    pub signal_a: Vec<f64>,
    pub signal_b: Vec<f64>,
}

impl<'a> ProbesetData<'a> {
    pub fn gather(index: usize, probeset: &'a Probeset, store: &dyn IntensityStore) -> Result<Self> {
        let samples = store.sample_count();
        Ok(Self {
            index,
            probeset,
            signal_a: allele_signal(&probeset.allele_a, store, samples)?,
            signal_b: allele_signal(&probeset.allele_b, store, samples)?,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.signal_a.len()
    }
}

fn allele_signal(probes: &[ProbeId], store: &dyn IntensityStore, samples: usize) -> Result<Vec<f64>> {
    if probes.is_empty() {
        return Ok(vec![f64::NAN; samples]);
    }
    let mut rows = vec![vec![0.0f32; samples]; probes.len()];
    for (probe, row) in probes.iter().zip(rows.iter_mut()) {
        store.probe_row(*probe, row)?;
    }
    let mut per_sample = Vec::with_capacity(probes.len());
    Ok((0..samples)
        .map(|s| {
            per_sample.clear();
            per_sample.extend(rows.iter().map(|r| r[s]));
            median(&per_sample).unwrap_or(f64::NAN)
        })
        .collect())
}

/// Accepts a learned or loaded cluster prior.
pub trait PriorConsumer {
    fn set_prior(&mut self, prior: &ClusterPrior) -> Result<()>;
}

/// Accepts per-sample covariates.
pub trait CovariateConsumer {
    fn set_genders(&mut self, genders: &[Gender]);

    fn set_inbred_penalties(&mut self, penalties: &[InbredPenalty]);
}

/// Accepts the set of haploid (non-PAR chrX) probesets.
pub trait SpecialSnpConsumer {
    fn set_haploid_snps(&mut self, names: &HashSet<String>);
}

/// A pluggable per-probeset genotype caller.
///
/// `compute` holds no state across probesets beyond what the capability
/// setters installed before dispatch.
pub trait QuantMethod {
    fn method_type(&self) -> &str;

    fn version(&self) -> &str;

    fn family(&self) -> MethodFamily;

    fn compute(&self, data: &ProbesetData<'_>) -> std::result::Result<Vec<SampleCall>, ComputeError>;

    /// Output written in place of a probeset that failed to compute.
    fn failure_result(&self, data: &ProbesetData<'_>) -> Vec<SampleCall> {
        vec![SampleCall::failed(); data.sample_count()]
    }

    fn prior_consumer(&mut self) -> Option<&mut dyn PriorConsumer> {
        None
    }

    fn covariate_consumer(&mut self) -> Option<&mut dyn CovariateConsumer> {
        None
    }

    fn special_snp_consumer(&mut self) -> Option<&mut dyn SpecialSnpConsumer> {
        None
    }
}

/// Instantiates the method named at the end of `spec`.
pub fn build_method(spec: &MethodSpec) -> Result<Box<dyn QuantMethod>> {
    let method = &spec.method;
    method.check_keys(&["K", "conf-threshold", "MS"])?;
    let k = method.param::<f64>(&["K"])?.unwrap_or(contrast::DEFAULT_K);
    if !(k > 0.0) {
        return Err(GenoError::config(format!("{}.K must be positive.", method.name)));
    }
    let threshold = method
        .param::<f64>(&["conf-threshold", "MS"])?
        .unwrap_or_else(|| spec.family.default_conf_threshold());
    if !(0.0..=1.0).contains(&threshold) {
        return Err(GenoError::config(format!(
            "{}.conf-threshold must lie in [0, 1], got {}.",
            method.name, threshold
        )));
    }
    Ok(Box::new(ContrastClusterCaller::new(
        method.name.clone(),
        spec.family,
        k,
        threshold,
    )))
}
