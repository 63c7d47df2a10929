//! Staged intensity transforms applied before genotype calling.
//!
//! Stages run strictly in the order given by the analysis string. Each
//! stage sees the current store and either leaves it alone or hands back a
//! successor, which replaces (and drops) its predecessor.

use crate::error::{GenoError, Result};
use crate::intensity::{IntensityStore, StoreFactory};
use crate::layout::ProbesetLayout;
use crate::report::AtomicOutput;
use crate::samples::SampleSet;
use crate::stats::median;
use log::{debug, info, warn};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const QUANT_NORM: &str = "quant-norm";
pub const MED_NORM: &str = "med-norm";
pub const PM_ONLY: &str = "pm-only";

pub const DEFAULT_SKETCH_SIZE: usize = 50_000;
pub const DEFAULT_MEDIAN_TARGET: f64 = 1000.0;

/// One `name(.key=value)*` token of an analysis string.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: String,
    pub params: Vec<(String, String)>,
}

impl StageSpec {
    /// Parses one token. Values may contain dots (`MS=0.26`); a dotted
    /// piece without `=` continues the previous value.
    pub fn parse(token: &str) -> Result<Self> {
        let mut pieces = token.trim().split('.');
        let name = pieces.next().unwrap_or("").trim().to_string();
        if name.is_empty() {
            return Err(GenoError::config(format!("Empty stage name in '{}'.", token)));
        }
        let mut params: Vec<(String, String)> = Vec::new();
        for piece in pieces {
            match piece.split_once('=') {
                Some((key, value)) => params.push((key.trim().to_string(), value.trim().to_string())),
                None => match params.last_mut() {
                    Some((_, value)) => {
                        value.push('.');
                        value.push_str(piece.trim());
                    }
                    None => {
                        return Err(GenoError::config(format!(
                            "Stage '{}' has a parameter without a value: '{}'.",
                            name, piece
                        )))
                    }
                },
            }
        }
        Ok(Self { name, params })
    }

    /// Rejects keys outside `allowed`.
    pub fn check_keys(&self, allowed: &[&str]) -> Result<()> {
        for (key, _) in &self.params {
            if !allowed.contains(&key.as_str()) {
                return Err(GenoError::config(format!(
                    "Unknown parameter '{}' for '{}'. Known: {:?}",
                    key, self.name, allowed
                )));
            }
        }
        Ok(())
    }

    /// Last value given under any of `keys`, parsed.
    pub fn param<T: FromStr>(&self, keys: &[&str]) -> Result<Option<T>>
    where
        T::Err: fmt::Display,
    {
        let raw = self
            .params
            .iter()
            .rev()
            .find(|(k, _)| keys.contains(&k.as_str()))
            .map(|(_, v)| v);
        match raw {
            None => Ok(None),
            Some(v) => v.parse::<T>().map(Some).map_err(|e| {
                GenoError::config(format!("Bad value '{}' for {}.{}: {}", v, self.name, keys[0], e))
            }),
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (k, v) in &self.params {
            write!(f, ".{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Shared, read-only context every stage can see.
pub struct RunBoard<'a> {
    pub layout: &'a ProbesetLayout,
    pub samples: &'a SampleSet,
    pub factory: &'a StoreFactory,
}

pub enum StageOutcome {
    Unchanged,
    Transformed(Box<dyn IntensityStore>),
}

pub trait Stage {
    fn name(&self) -> &str;

    fn apply(&mut self, board: &RunBoard<'_>, input: &dyn IntensityStore) -> Result<StageOutcome>;
}

/// Files the normalization stages read or write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    pub target_sketch: Option<PathBuf>,
    pub write_sketch: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub name: String,
    pub changed: bool,
}

pub struct StagedTransformPipeline {
    stages: Vec<Box<dyn Stage>>,
    history: Vec<StageRecord>,
}

impl StagedTransformPipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            history: Vec::new(),
        }
    }

    pub fn from_specs(specs: &[StageSpec], options: &TransformOptions) -> Result<Self> {
        let stages = specs
            .iter()
            .map(|spec| build_stage(spec, options))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(stages))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage in order and returns the final store.
    pub fn run(&mut self, board: &RunBoard<'_>, input: Box<dyn IntensityStore>) -> Result<Box<dyn IntensityStore>> {
        let mut current = input;
        for stage in self.stages.iter_mut() {
            info!("Applying transform stage '{}'", stage.name());
            let changed = match stage.apply(board, current.as_ref())? {
                StageOutcome::Unchanged => {
                    debug!("Stage '{}' left the intensities unchanged.", stage.name());
                    false
                }
                StageOutcome::Transformed(next) => {
                    current = next;
                    true
                }
            };
            self.history.push(StageRecord {
                name: stage.name().to_string(),
                changed,
            });
        }
        Ok(current)
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }
}

pub fn build_stage(spec: &StageSpec, options: &TransformOptions) -> Result<Box<dyn Stage>> {
    match spec.name.as_str() {
        QUANT_NORM => {
            spec.check_keys(&["sketch", "target"])?;
            let sketch = spec.param::<usize>(&["sketch"])?.unwrap_or(DEFAULT_SKETCH_SIZE);
            let target_mean = spec.param::<f64>(&["target"])?.unwrap_or(0.0);
            if target_mean < 0.0 {
                return Err(GenoError::config("quant-norm.target must not be negative."));
            }
            let supplied = match &options.target_sketch {
                Some(path) => Some(read_sketch(path)?),
                None => None,
            };
            Ok(Box::new(QuantNormStage {
                label: spec.to_string(),
                sketch,
                target_mean,
                supplied,
                write_to: options.write_sketch.clone(),
            }))
        }
        MED_NORM => {
            spec.check_keys(&["target"])?;
            let target = spec.param::<f64>(&["target"])?.unwrap_or(DEFAULT_MEDIAN_TARGET);
            if !(target > 0.0) {
                return Err(GenoError::config("med-norm.target must be positive."));
            }
            Ok(Box::new(MedNormStage {
                label: spec.to_string(),
                target,
            }))
        }
        PM_ONLY => {
            spec.check_keys(&[])?;
            Ok(Box::new(PmOnlyStage))
        }
        other => Err(GenoError::config(format!(
            "Unknown transform stage '{}'. Known: {}, {}, {}",
            other, QUANT_NORM, MED_NORM, PM_ONLY
        ))),
    }
}

// --- Sketch helpers ---

/// Linear interpolation into sorted values at fraction `q` in [0, 1].
fn interpolate(sorted: &[f32], q: f64) -> f32 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    (sorted[lo] as f64 * (1.0 - frac) + sorted[hi] as f64 * frac) as f32
}

/// `n` evenly spaced quantiles of already sorted values.
pub fn sketch_of(sorted: &[f32], n: usize) -> Vec<f32> {
    if sorted.is_empty() || n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![interpolate(sorted, 0.5)];
    }
    (0..n)
        .map(|i| interpolate(sorted, i as f64 / (n - 1) as f64))
        .collect()
}

/// Maps each value onto the target distribution by rank. Ties share the
/// mean rank and therefore one output value.
pub fn normalize_to_target(values: &[f32], target: &[f32]) -> Vec<f32> {
    let len = values.len();
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut out = vec![0.0f32; len];
    let mut i = 0;
    while i < len {
        let mut j = i;
        while j + 1 < len && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0;
        let q = if len > 1 { rank / (len - 1) as f64 } else { 0.5 };
        let mapped = interpolate(target, q);
        for &idx in &order[i..=j] {
            out[idx] = mapped;
        }
        i = j + 1;
    }
    out
}

/// One value per line; `#` lines and blank lines are skipped.
pub fn read_sketch(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let mut values = Vec::new();
    for (line_idx, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        let token = line.trim();
        if token.is_empty() || token.starts_with('#') {
            continue;
        }
        let value = token
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| GenoError::parse(path, line_idx + 1, format!("bad sketch value '{}'", token)))?;
        values.push(value);
    }
    if values.windows(2).any(|w| w[1] < w[0]) {
        return Err(GenoError::data_integrity(format!(
            "Sketch {} is not sorted ascending.",
            path.display()
        )));
    }
    Ok(values)
}

pub fn write_sketch(path: &Path, sketch: &[f32]) -> Result<()> {
    let mut out = AtomicOutput::create(path)?;
    writeln!(out, "#%sketch-size={}", sketch.len()).map_err(|e| GenoError::io(path, e))?;
    for v in sketch {
        writeln!(out, "{:.6}", v).map_err(|e| GenoError::io(path, e))?;
    }
    out.commit()?;
    Ok(())
}

// --- Stages ---

struct QuantNormStage {
    label: String,
    sketch: usize,
    target_mean: f64,
    supplied: Option<Vec<f32>>,
    write_to: Option<PathBuf>,
}

impl QuantNormStage {
    fn sketch_size(&self, probe_count: usize) -> usize {
        if self.sketch == 0 || self.sketch > probe_count {
            probe_count
        } else {
            self.sketch
        }
    }

    fn build_target(&self, input: &dyn IntensityStore, n: usize) -> Result<Vec<f32>> {
        if let Some(supplied) = &self.supplied {
            if supplied.len() != n {
                return Err(GenoError::config(format!(
                    "Target sketch has {} values but the sketch size is {}.",
                    supplied.len(),
                    n
                )));
            }
            info!("Using the supplied target sketch of {} values.", n);
            return Ok(supplied.clone());
        }
        let mut sums = vec![0.0f64; n];
        for sample in 0..input.sample_count() {
            let mut column = input.sample_column(sample)?;
            column.sort_by(|a, b| a.total_cmp(b));
            for (sum, v) in sums.iter_mut().zip(sketch_of(&column, n)) {
                *sum += v as f64;
            }
        }
        let samples = input.sample_count().max(1) as f64;
        Ok(sums.into_iter().map(|s| (s / samples) as f32).collect())
    }
}

impl Stage for QuantNormStage {
    fn name(&self) -> &str {
        &self.label
    }

    fn apply(&mut self, board: &RunBoard<'_>, input: &dyn IntensityStore) -> Result<StageOutcome> {
        let n = self.sketch_size(input.probe_count());
        if n == 0 {
            return Err(GenoError::data_integrity("Cannot quantile normalize an empty store."));
        }
        let mut target = self.build_target(input, n)?;
        if self.target_mean > 0.0 {
            let mean = target.iter().map(|v| *v as f64).sum::<f64>() / n as f64;
            if mean > 0.0 {
                let scale = self.target_mean / mean;
                target.iter_mut().for_each(|v| *v = (*v as f64 * scale) as f32);
            } else {
                warn!("Target sketch mean is {}; skipping the rescale to {}.", mean, self.target_mean);
            }
        }
        debug!(
            "quant-norm: sketch of {} values, range {:?}..{:?}",
            n,
            target.first(),
            target.last()
        );

        let mut builder = board.factory.builder()?;
        for sample in 0..input.sample_count() {
            let column = input.sample_column(sample)?;
            builder.push_sample(sample, &normalize_to_target(&column, &target))?;
        }
        let store = builder.commit()?;

        if let Some(path) = &self.write_to {
            write_sketch(path, &target)?;
            info!("Wrote target sketch to {}", path.display());
        }
        Ok(StageOutcome::Transformed(store))
    }
}

struct MedNormStage {
    label: String,
    target: f64,
}

impl Stage for MedNormStage {
    fn name(&self) -> &str {
        &self.label
    }

    fn apply(&mut self, board: &RunBoard<'_>, input: &dyn IntensityStore) -> Result<StageOutcome> {
        let mut factors = Vec::with_capacity(input.sample_count());
        for sample in 0..input.sample_count() {
            let column = input.sample_column(sample)?;
            let factor = match median(&column) {
                Some(m) if m > 0.0 => self.target / m,
                other => {
                    let name = board.samples.get(sample).map_or("?", |s| s.name.as_str());
                    warn!("Sample {} has median {:?}; leaving it unscaled.", name, other);
                    1.0
                }
            };
            debug!("med-norm: sample {} factor {:.6}", sample, factor);
            factors.push(factor);
        }
        if factors.iter().all(|f| *f == 1.0) {
            return Ok(StageOutcome::Unchanged);
        }

        let mut builder = board.factory.builder()?;
        for (sample, factor) in factors.iter().enumerate() {
            let scaled: Vec<f32> = input
                .sample_column(sample)?
                .into_iter()
                .map(|v| (v as f64 * factor) as f32)
                .collect();
            builder.push_sample(sample, &scaled)?;
        }
        Ok(StageOutcome::Transformed(builder.commit()?))
    }
}

/// Every probe in this data model is a perfect-match probe.
struct PmOnlyStage;

impl Stage for PmOnlyStage {
    fn name(&self) -> &str {
        PM_ONLY
    }

    fn apply(&mut self, _board: &RunBoard<'_>, _input: &dyn IntensityStore) -> Result<StageOutcome> {
        Ok(StageOutcome::Unchanged)
    }
}
