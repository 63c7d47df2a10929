//! Per-sample run summary: call, het and hom rates plus cluster-distance
//! statistics, accumulated one probeset at a time.

use super::{AtomicOutput, OrderGuard, ProbesetResult, ReportSink};
use crate::covariate::{Gender, SampleMetric};
use crate::error::{GenoError, Result};
use crate::genotype::CallTally;
use crate::quant::SampleCall;
use crate::stats::RunningStats;
use log::warn;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSummary {
    /// Every probeset.
    pub all: CallTally,
    /// Probesets outside the haploid set.
    pub autosomal: CallTally,
    /// Cluster distance of called entries from probesets that computed.
    pub distance: RunningStats,
}

impl SampleSummary {
    pub fn record(&mut self, call: &SampleCall, haploid: bool, failed: bool) {
        self.all.add(call.call);
        if !haploid {
            self.autosomal.add(call.call);
        }
        if !failed && call.call.is_call() {
            self.distance.push(call.distance);
        }
    }

    pub fn call_rate(&self) -> f64 {
        percent(self.autosomal.called(), self.autosomal.total())
    }

    pub fn total_call_rate(&self) -> f64 {
        percent(self.all.called(), self.all.total())
    }

    pub fn het_rate(&self) -> f64 {
        percent(self.autosomal.n_ab, self.autosomal.called())
    }

    pub fn total_het_rate(&self) -> f64 {
        percent(self.all.n_ab, self.all.called())
    }

    pub fn hom_rate(&self) -> f64 {
        percent(self.autosomal.n_aa + self.autosomal.n_bb, self.autosomal.called())
    }

    pub fn total_hom_rate(&self) -> f64 {
        percent(self.all.n_aa + self.all.n_bb, self.all.called())
    }
}

/// Streaming per-sample statistics. Nothing but the running tallies is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryAccumulator {
    samples: Vec<SampleSummary>,
    probesets: usize,
    failed: usize,
}

impl SummaryAccumulator {
    pub fn new(sample_count: usize) -> Self {
        Self {
            samples: vec![SampleSummary::default(); sample_count],
            probesets: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, entry: &ProbesetResult<'_>) -> Result<()> {
        if entry.calls.len() != self.samples.len() {
            return Err(GenoError::data_integrity(format!(
                "Probeset '{}' has {} results for {} samples.",
                entry.name,
                entry.calls.len(),
                self.samples.len()
            )));
        }
        for (summary, call) in self.samples.iter_mut().zip(entry.calls) {
            summary.record(call, entry.haploid, entry.failed);
        }
        self.probesets += 1;
        if entry.failed {
            self.failed += 1;
        }
        Ok(())
    }

    pub fn sample(&self, index: usize) -> Option<&SampleSummary> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[SampleSummary] {
        &self.samples
    }

    pub fn probeset_count(&self) -> usize {
        self.probesets
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }
}

/// Values printed in the report header.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryInfo {
    pub method: String,
    pub version: String,
    pub gender_method: String,
}

/// Per-sample identity and covariates for the report rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub sample: String,
    pub gender: Gender,
    pub metrics: Vec<SampleMetric>,
}

pub struct SummarySink {
    out: Option<AtomicOutput>,
    guard: OrderGuard,
    info: SummaryInfo,
    rows: Vec<SummaryRow>,
    metric_columns: Vec<String>,
    accumulator: SummaryAccumulator,
}

impl SummarySink {
    /// Opens `<dir>/<name>.report.txt`. Every row must list the same metric
    /// names in the same order.
    pub fn create(
        dir: &Path,
        name: &str,
        info: SummaryInfo,
        rows: Vec<SummaryRow>,
        order: Arc<[String]>,
    ) -> Result<Self> {
        let metric_columns: Vec<String> = rows
            .first()
            .map(|r| r.metrics.iter().map(|m| m.name.clone()).collect())
            .unwrap_or_default();
        for row in &rows {
            if !row.metrics.iter().map(|m| &m.name).eq(metric_columns.iter()) {
                return Err(GenoError::data_integrity(format!(
                    "Sample '{}' reports different summary metrics than the first sample.",
                    row.sample
                )));
            }
        }
        let out = AtomicOutput::create(dir.join(format!("{}.report.txt", name)))?;
        Ok(Self {
            out: Some(out),
            guard: OrderGuard::new("summary", order),
            info,
            accumulator: SummaryAccumulator::new(rows.len()),
            rows,
            metric_columns,
        })
    }

    fn write_report(&self, out: &mut AtomicOutput) -> std::io::Result<()> {
        writeln!(out, "#%method={}", self.info.method)?;
        writeln!(out, "#%version={}", self.info.version)?;
        writeln!(out, "#%gender-method={}", self.info.gender_method)?;
        writeln!(out, "#%probeset-count={}", self.accumulator.probeset_count())?;
        writeln!(out, "#%failed-probeset-count={}", self.accumulator.failed_count())?;
        write!(
            out,
            "cel_files\tcomputed_gender\tcall_rate\ttotal_call_rate\thet_rate\ttotal_het_rate\thom_rate\ttotal_hom_rate\tcluster_distance_mean\tcluster_distance_stdev"
        )?;
        for column in &self.metric_columns {
            write!(out, "\t{}", column)?;
        }
        writeln!(out)?;

        for (row, summary) in self.rows.iter().zip(self.accumulator.samples()) {
            write!(out, "{}\t{}", row.sample, row.gender)?;
            let distance_stdev = if summary.distance.count() < 2 {
                0.0
            } else {
                summary.distance.stdev()
            };
            for value in [
                summary.call_rate(),
                summary.total_call_rate(),
                summary.het_rate(),
                summary.total_het_rate(),
                summary.hom_rate(),
                summary.total_hom_rate(),
                summary.distance.mean(),
                distance_stdev,
            ] {
                write!(out, "\t{:.5}", value)?;
            }
            for metric in &row.metrics {
                write!(out, "\t{}", metric.value)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

impl ReportSink for SummarySink {
    fn name(&self) -> &str {
        "summary"
    }

    fn prepare(&mut self, expected: usize) -> Result<()> {
        self.guard.check_prepare(expected)
    }

    fn write_entry(&mut self, entry: &ProbesetResult<'_>) -> Result<()> {
        self.guard.check(entry.index, entry.name)?;
        self.accumulator.record(entry)
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>> {
        self.guard.finish()?;
        let sparse = self
            .accumulator
            .samples()
            .iter()
            .filter(|s| s.distance.count() < 2)
            .count();
        if sparse > 0 {
            warn!(
                "{} sample(s) have fewer than two called probesets; their cluster distance stdev is reported as 0.",
                sparse
            );
        }
        let mut out = self
            .out
            .take()
            .ok_or_else(|| GenoError::data_integrity("Summary sink finished twice."))?;
        self.write_report(&mut out)
            .map_err(|e| GenoError::io(out.tmp_path(), e))?;
        Ok(vec![out.commit()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariate::MetricValue;
    use crate::genotype::GenotypeCall;
    use std::fs;

    fn sample_call(call: GenotypeCall, distance: f64) -> SampleCall {
        SampleCall {
            call,
            confidence: 0.01,
            distance,
            contrast: 0.0,
            signal_a: 1.0,
            signal_b: 1.0,
        }
    }

    #[test]
    fn test_accumulator_rates_and_distance_stats() {
        let order: Vec<String> = (0..5).map(|i| format!("SNP{}", i)).collect();
        let distances = [0.5, 1.5, 2.0, 0.25];
        let calls = [
            (GenotypeCall::AA, false),
            (GenotypeCall::AB, false),
            (GenotypeCall::BB, true),
            (GenotypeCall::AB, false),
        ];
        let mut acc = SummaryAccumulator::new(1);
        for (i, ((call, haploid), d)) in calls.iter().zip(distances).enumerate() {
            let row = [sample_call(*call, d)];
            acc.record(&ProbesetResult {
                index: i,
                name: &order[i],
                calls: &row,
                failed: false,
                haploid: *haploid,
            })
            .unwrap();
        }
        let failed = [SampleCall::failed()];
        acc.record(&ProbesetResult {
            index: 4,
            name: &order[4],
            calls: &failed,
            failed: true,
            haploid: false,
        })
        .unwrap();

        let s = acc.sample(0).unwrap();
        // autosomal: AA, AB, AB, NoCall
        assert!((s.call_rate() - 75.0).abs() < 1e-9);
        assert!((s.total_call_rate() - 80.0).abs() < 1e-9);
        assert!((s.het_rate() - 200.0 / 3.0).abs() < 1e-9);
        assert!((s.total_het_rate() - 50.0).abs() < 1e-9);
        assert!((s.total_hom_rate() - 50.0).abs() < 1e-9);

        let n = distances.len() as f64;
        let mean = distances.iter().sum::<f64>() / n;
        let var = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert_eq!(s.distance.count(), 4);
        assert!((s.distance.mean() - mean).abs() < 1e-5);
        assert!((s.distance.stdev() - var.sqrt()).abs() < 1e-5);
        assert_eq!(acc.probeset_count(), 5);
        assert_eq!(acc.failed_count(), 1);
    }

    #[test]
    fn test_report_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let order: Arc<[String]> = vec!["SNP0".to_string()].into();
        let rows = vec![
            SummaryRow {
                sample: "a.gcin".into(),
                gender: Gender::Female,
                metrics: vec![SampleMetric::new("em_gender", MetricValue::Text("female".into()))],
            },
            SummaryRow {
                sample: "b.gcin".into(),
                gender: Gender::Unknown,
                metrics: vec![SampleMetric::new("em_gender", MetricValue::Missing)],
            },
        ];
        let info = SummaryInfo {
            method: "birdseed-v2".into(),
            version: "0.1.0".into(),
            gender_method: "user-supplied".into(),
        };
        let mut sink = SummarySink::create(dir.path(), "bs", info, rows, order.clone()).unwrap();
        sink.prepare(1).unwrap();
        let calls = [sample_call(GenotypeCall::AB, 1.0), sample_call(GenotypeCall::NoCall, 0.0)];
        sink.write_entry(&ProbesetResult {
            index: 0,
            name: &order[0],
            calls: &calls,
            failed: false,
            haploid: false,
        })
        .unwrap();
        sink.finish().unwrap();

        let text = fs::read_to_string(dir.path().join("bs.report.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#%method=birdseed-v2");
        assert_eq!(lines[2], "#%gender-method=user-supplied");
        assert_eq!(lines[3], "#%probeset-count=1");
        assert_eq!(lines[4], "#%failed-probeset-count=0");
        assert!(lines[5].starts_with("cel_files\tcomputed_gender\tcall_rate"));
        assert!(lines[5].ends_with("\tem_gender"));
        assert_eq!(
            lines[6],
            "a.gcin\tfemale\t100.00000\t100.00000\t100.00000\t100.00000\t0.00000\t0.00000\t1.00000\t0.00000\tfemale"
        );
        assert!(lines[7].starts_with("b.gcin\tunknown\t0.00000"));
        assert!(lines[7].ends_with("\tNA"));
    }

    #[test]
    fn test_mismatched_metric_columns_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            SummaryRow {
                sample: "a".into(),
                gender: Gender::Male,
                metrics: vec![SampleMetric::new("x", MetricValue::Number(1.0))],
            },
            SummaryRow {
                sample: "b".into(),
                gender: Gender::Male,
                metrics: Vec::new(),
            },
        ];
        let info = SummaryInfo {
            method: "m".into(),
            version: "v".into(),
            gender_method: "none".into(),
        };
        assert!(SummarySink::create(dir.path(), "bs", info, rows, vec!["SNP0".to_string()].into()).is_err());
    }
}
