//! Result reporting: independent sinks driven in lockstep with the dispatch
//! loop.
//!
//! Every sink checks for itself that it receives exactly the expected
//! probesets in dispatch order, and writes through [`AtomicOutput`] so no
//! half-written file ever appears under a final name.

pub mod chp;
pub mod summary;
pub mod table;

use crate::error::{GenoError, Result};
use crate::quant::SampleCall;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use chp::ChpSink;
pub use summary::{SummaryAccumulator, SummarySink};
pub use table::TableSink;

/// A file written under `<path>.tmp` and renamed into place on commit.
/// Dropping it uncommitted removes the temporary file.
pub struct AtomicOutput {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicOutput {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        let file = File::create(&tmp_path).map_err(|e| GenoError::io(&tmp_path, e))?;
        Ok(Self {
            path,
            tmp_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Flushes, syncs and renames to the final path.
    pub fn commit(mut self) -> Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| GenoError::data_integrity(format!("{} was already committed.", self.path.display())))?;
        let result = writer
            .into_inner()
            .map_err(|e| GenoError::io(&self.tmp_path, e.into_error()))
            .and_then(|file| file.sync_all().map_err(|e| GenoError::io(&self.tmp_path, e)))
            .and_then(|_| fs::rename(&self.tmp_path, &self.path).map_err(|e| GenoError::io(&self.path, e)));
        if let Err(e) = result {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(e);
        }
        debug!("Committed {}", self.path.display());
        Ok(self.path.clone())
    }
}

impl Write for AtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::other("output already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            match fs::remove_file(&self.tmp_path) {
                Ok(()) => debug!("Removed incomplete output {}", self.tmp_path.display()),
                Err(e) => warn!("Could not remove {}: {}", self.tmp_path.display(), e),
            }
        }
    }
}

/// One probeset's results, as handed to every sink.
#[derive(Debug, Clone, Copy)]
pub struct ProbesetResult<'a> {
    /// Position in the dispatch list.
    pub index: usize,
    pub name: &'a str,
    pub calls: &'a [SampleCall],
    /// The method failed and `calls` holds placeholders.
    pub failed: bool,
    /// Haploid (non-PAR chrX) probeset.
    pub haploid: bool,
}

/// Tracks that entries arrive exactly in the expected order.
#[derive(Debug, Clone)]
pub struct OrderGuard {
    sink: String,
    expected: Arc<[String]>,
    next: usize,
}

impl OrderGuard {
    pub fn new(sink: impl Into<String>, expected: Arc<[String]>) -> Self {
        Self {
            sink: sink.into(),
            expected,
            next: 0,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.expected.len()
    }

    /// Fails when the declared count disagrees with the order it was built on.
    pub fn check_prepare(&self, expected: usize) -> Result<()> {
        if expected != self.expected.len() {
            return Err(GenoError::data_integrity(format!(
                "{} sink was prepared for {} probesets but its order lists {}.",
                self.sink,
                expected,
                self.expected.len()
            )));
        }
        Ok(())
    }

    pub fn check(&mut self, index: usize, name: &str) -> Result<()> {
        let wanted = self.expected.get(self.next);
        if index != self.next || wanted.map(String::as_str) != Some(name) {
            return Err(GenoError::data_integrity(format!(
                "{} sink expected probeset #{} '{}' but received #{} '{}'.",
                self.sink,
                self.next,
                wanted.map_or("<end>", String::as_str),
                index,
                name
            )));
        }
        self.next += 1;
        Ok(())
    }

    pub fn finish(&self) -> Result<()> {
        if self.next != self.expected.len() {
            return Err(GenoError::data_integrity(format!(
                "{} sink received {} of {} probesets.",
                self.sink,
                self.next,
                self.expected.len()
            )));
        }
        Ok(())
    }
}

pub trait ReportSink {
    fn name(&self) -> &str;

    fn prepare(&mut self, expected: usize) -> Result<()>;

    /// Must reject entries that are out of order.
    fn write_entry(&mut self, entry: &ProbesetResult<'_>) -> Result<()>;

    /// Completes every file and returns the final paths.
    fn finish(&mut self) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanoutTally {
    pub written: usize,
    pub failed: usize,
    pub outputs: Vec<PathBuf>,
}

/// Forwards each result to every registered sink.
#[derive(Default)]
pub struct ReporterFanout {
    sinks: Vec<Box<dyn ReportSink>>,
    expected: usize,
    written: usize,
    failed: usize,
}

impl ReporterFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn ReportSink>) {
        debug!("Registered report sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn prepare(&mut self, expected: usize) -> Result<()> {
        self.expected = expected;
        for sink in self.sinks.iter_mut() {
            sink.prepare(expected)?;
        }
        Ok(())
    }

    pub fn write(&mut self, entry: &ProbesetResult<'_>) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.write_entry(entry)?;
        }
        self.written += 1;
        if entry.failed {
            self.failed += 1;
        }
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Finishes every sink. Consumes the fanout so an error leaves every
    /// uncommitted file to be removed.
    pub fn finish(mut self) -> Result<FanoutTally> {
        if self.written != self.expected {
            return Err(GenoError::data_integrity(format!(
                "Reported {} probesets but {} were expected.",
                self.written, self.expected
            )));
        }
        let mut outputs = Vec::new();
        for sink in self.sinks.iter_mut() {
            let paths = sink.finish()?;
            info!("Sink '{}' wrote {} file(s).", sink.name(), paths.len());
            outputs.extend(paths);
        }
        Ok(FanoutTally {
            written: self.written,
            failed: self.failed,
            outputs,
        })
    }
}
