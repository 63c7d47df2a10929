//! Tab-separated call and confidence tables, one row per probeset.

use super::{AtomicOutput, OrderGuard, ProbesetResult, ReportSink};
use crate::error::{GenoError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct TableSink {
    calls: Option<AtomicOutput>,
    confidences: Option<AtomicOutput>,
    guard: OrderGuard,
    sample_count: usize,
}

impl TableSink {
    /// Opens `<name>.calls.txt` and `<name>.confidences.txt` under `dir` and
    /// writes their headers.
    pub fn create(dir: &Path, name: &str, samples: &[String], order: Arc<[String]>) -> Result<Self> {
        let mut calls = AtomicOutput::create(dir.join(format!("{}.calls.txt", name)))?;
        let mut confidences = AtomicOutput::create(dir.join(format!("{}.confidences.txt", name)))?;
        for out in [&mut calls, &mut confidences] {
            let path = out.tmp_path().to_path_buf();
            write!(out, "probeset_id").map_err(|e| GenoError::io(&path, e))?;
            for sample in samples {
                write!(out, "\t{}", sample).map_err(|e| GenoError::io(&path, e))?;
            }
            writeln!(out).map_err(|e| GenoError::io(&path, e))?;
        }
        Ok(Self {
            calls: Some(calls),
            confidences: Some(confidences),
            guard: OrderGuard::new("table", order),
            sample_count: samples.len(),
        })
    }
}

fn write_row<T: std::fmt::Display>(
    out: &mut AtomicOutput,
    name: &str,
    values: impl Iterator<Item = T>,
) -> std::io::Result<()> {
    write!(out, "{}", name)?;
    for v in values {
        write!(out, "\t{}", v)?;
    }
    writeln!(out)
}

impl ReportSink for TableSink {
    fn name(&self) -> &str {
        "table"
    }

    fn prepare(&mut self, expected: usize) -> Result<()> {
        self.guard.check_prepare(expected)
    }

    fn write_entry(&mut self, entry: &ProbesetResult<'_>) -> Result<()> {
        self.guard.check(entry.index, entry.name)?;
        if entry.calls.len() != self.sample_count {
            return Err(GenoError::data_integrity(format!(
                "Probeset '{}' has {} results for {} samples.",
                entry.name,
                entry.calls.len(),
                self.sample_count
            )));
        }
        let (Some(calls), Some(confidences)) = (self.calls.as_mut(), self.confidences.as_mut()) else {
            return Err(GenoError::data_integrity("Table sink written after finish."));
        };
        write_row(calls, entry.name, entry.calls.iter().map(|c| c.call.code()))
            .map_err(|e| GenoError::io(calls.tmp_path(), e))?;
        write_row(
            confidences,
            entry.name,
            entry.calls.iter().map(|c| format!("{:.5}", c.confidence)),
        )
        .map_err(|e| GenoError::io(confidences.tmp_path(), e))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>> {
        self.guard.finish()?;
        let mut paths = Vec::with_capacity(2);
        for out in [self.calls.take(), self.confidences.take()].into_iter().flatten() {
            paths.push(out.commit()?);
        }
        Ok(paths)
    }
}
