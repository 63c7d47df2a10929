//! Gender from the ratio of sex-chromosome probe intensities.
//!
//! For XY organisms the statistic is `median(Y probes) / median(X probes)`:
//! low for females, high for males. In ZW mode the same statistic is computed
//! from W over Z probes and the labels swap, since the heterogametic sex is
//! female there.

use super::{provenance, CovariateSource, Gender, MetricValue, SampleMetric};
use crate::error::{GenoError, Result};
use crate::intensity::IntensityListener;
use crate::layout::ProbeId;
use crate::samples::Sample;
use crate::stats::median;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioThresholds {
    /// At or below this the homogametic call is made.
    pub female: f64,
    /// At or above this the heterogametic call is made.
    pub male: f64,
}

impl Default for RatioThresholds {
    fn default() -> Self {
        Self {
            female: 0.48,
            male: 0.71,
        }
    }
}

/// Classifies one ratio. The band between the thresholds stays unknown.
pub fn classify_ratio(ratio: f64, thresholds: RatioThresholds, swapped: bool) -> Gender {
    let (low, high) = if swapped {
        (Gender::Male, Gender::Female)
    } else {
        (Gender::Female, Gender::Male)
    };
    if !ratio.is_finite() {
        Gender::Unknown
    } else if ratio <= thresholds.female {
        low
    } else if ratio >= thresholds.male {
        high
    } else {
        Gender::Unknown
    }
}

pub struct RatioThresholdCovariate {
    name: &'static str,
    description: String,
    /// X (or Z) probes.
    common_probes: Vec<ProbeId>,
    /// Y (or W) probes.
    specific_probes: Vec<ProbeId>,
    thresholds: RatioThresholds,
    swapped: bool,
    unusable: Option<String>,
    values: Vec<Gender>,
    ratios: Vec<Option<f64>>,
}

impl RatioThresholdCovariate {
    pub fn new(
        common_probes: Vec<ProbeId>,
        specific_probes: Vec<ProbeId>,
        thresholds: RatioThresholds,
        swapped: bool,
        probe_count: usize,
    ) -> Self {
        let (name, common, specific) = if swapped {
            (provenance::CN_PROBE_ZW_RATIO, "Z", "W")
        } else {
            (provenance::CN_PROBE_XY_RATIO, "X", "Y")
        };
        let unusable = if common_probes.is_empty() || specific_probes.is_empty() {
            Some(format!("no chr{} or chr{} probes were supplied", common, specific))
        } else {
            common_probes
                .iter()
                .chain(specific_probes.iter())
                .find(|p| p.index() >= probe_count)
                .map(|p| {
                    format!(
                        "probe {} is beyond the {} probes on the chip",
                        p.index() + 1,
                        probe_count
                    )
                })
        };
        if let Some(reason) = &unusable {
            warn!("{}: {}; every sample will be unknown.", name, reason);
        }
        Self {
            name,
            description: format!(
                "chr{}/chr{} probe intensity ratio (female <= {}, male >= {})",
                specific, common, thresholds.female, thresholds.male
            ),
            common_probes,
            specific_probes,
            thresholds,
            swapped,
            unusable,
            values: Vec::new(),
            ratios: Vec::new(),
        }
    }

    /// Fails when the provider could not run; used when the user pinned it.
    pub fn ensure_usable(&self) -> Result<()> {
        match &self.unusable {
            Some(reason) => Err(GenoError::evidence(format!("{}: {}", self.name, reason))),
            None => Ok(()),
        }
    }

    fn ratio(&self, intensities: &[f32]) -> Option<f64> {
        let gather = |probes: &[ProbeId]| -> Vec<f32> {
            probes.iter().map(|p| intensities[p.index()]).collect()
        };
        let common = median(&gather(&self.common_probes))?;
        let specific = median(&gather(&self.specific_probes))?;
        if common <= 0.0 {
            return None;
        }
        Some(specific / common)
    }
}

impl IntensityListener for RatioThresholdCovariate {
    fn new_sample(&mut self, sample: &Sample, intensities: &[f32]) -> Result<()> {
        if sample.index != self.values.len() {
            return Err(GenoError::data_integrity(format!(
                "{} saw sample {} out of order.",
                self.name, sample.index
            )));
        }
        let ratio = if self.unusable.is_some() {
            None
        } else {
            self.ratio(intensities)
        };
        let gender = ratio.map_or(Gender::Unknown, |r| {
            classify_ratio(r, self.thresholds, self.swapped)
        });
        debug!("{}: {} ratio={:?} -> {}", self.name, sample.name, ratio, gender);
        self.ratios.push(ratio);
        self.values.push(gender);
        Ok(())
    }
}

impl CovariateSource<Gender> for RatioThresholdCovariate {
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
        self.unusable.is_none()
    }

    fn sample_metrics(&self, sample: usize) -> Vec<SampleMetric> {
        let gender = self.values.get(sample).copied().unwrap_or(Gender::Unknown);
        vec![
            SampleMetric::new(
                format!("{}_gender", self.name),
                MetricValue::Text(gender.to_string()),
            ),
            SampleMetric::optional_number(
                format!("{}_ratio", self.name),
                self.ratios.get(sample).copied().flatten(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample(index: usize) -> Sample {
        Sample {
            index,
            path: PathBuf::from(format!("s{}.gcin", index)),
            name: format!("s{}.gcin", index),
        }
    }

    #[test]
    fn test_threshold_boundaries() {
        let t = RatioThresholds::default();
        assert_eq!(classify_ratio(0.47, t, false), Gender::Female);
        assert_eq!(classify_ratio(0.48, t, false), Gender::Female);
        assert_eq!(classify_ratio(0.60, t, false), Gender::Unknown);
        assert_eq!(classify_ratio(0.70, t, false), Gender::Unknown);
        assert_eq!(classify_ratio(0.71, t, false), Gender::Male);
        assert_eq!(classify_ratio(f64::NAN, t, false), Gender::Unknown);
    }

    #[test]
    fn test_swapped_axis_relabels() {
        let t = RatioThresholds::default();
        assert_eq!(classify_ratio(0.2, t, true), Gender::Male);
        assert_eq!(classify_ratio(0.9, t, true), Gender::Female);
        assert_eq!(classify_ratio(0.6, t, true), Gender::Unknown);
    }

    fn run(cov: &mut RatioThresholdCovariate, columns: &[Vec<f32>]) {
        for (i, c) in columns.iter().enumerate() {
            cov.new_sample(&sample(i), c).unwrap();
        }
    }

    #[test]
    fn test_streaming_classification_is_total_and_repeatable() {
        // Probes 0,1 are X-like, 2,3 Y-like.
        let columns = vec![
            vec![1000.0, 1000.0, 100.0, 120.0],
            vec![1000.0, 1000.0, 900.0, 950.0],
            vec![1000.0, 1000.0, 600.0, 600.0],
        ];
        let build = || {
            RatioThresholdCovariate::new(
                vec![ProbeId(0), ProbeId(1)],
                vec![ProbeId(2), ProbeId(3)],
                RatioThresholds::default(),
                false,
                4,
            )
        };
        let mut first = build();
        run(&mut first, &columns);
        let mut second = build();
        run(&mut second, &columns);
        assert_eq!(first.values(), &[Gender::Female, Gender::Male, Gender::Unknown]);
        assert_eq!(first.values(), second.values());
        assert_eq!(first.values().len(), columns.len());
        assert!(first.produced_data());
        assert_eq!(first.sample_metrics(0)[0].value, MetricValue::Text("female".into()));
    }

    #[test]
    fn test_missing_probes_degrade_to_unknown() {
        let mut cov = RatioThresholdCovariate::new(
            vec![ProbeId(0)],
            vec![ProbeId(40)],
            RatioThresholds::default(),
            false,
            4,
        );
        run(&mut cov, &[vec![1.0; 4], vec![1.0; 4]]);
        assert_eq!(cov.values(), &[Gender::Unknown, Gender::Unknown]);
        assert!(!cov.produced_data());
        assert!(matches!(cov.ensure_usable(), Err(GenoError::Evidence { .. })));
        assert_eq!(cov.name(), provenance::CN_PROBE_XY_RATIO);
    }
}
