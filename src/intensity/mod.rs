//! Intensity storage: the logical `[probe][sample]` matrix every later stage
//! reads from.
//!
//! Stores are built sample by sample during the streaming pass (or by a
//! transform stage) through a [`StoreBuilder`] and are read-only once
//! committed. Two backings exist with the same read contract: an in-memory
//! matrix and a disk file with a bounded cache window.

pub mod disk;
pub mod memory;
pub mod reader;

use crate::error::{GenoError, Result};
use crate::layout::{DesiredProbeOrder, ProbeId};
use crate::samples::Sample;
use std::path::PathBuf;
use std::sync::Arc;

pub use disk::DiskIntensityStore;
pub use memory::MemoryIntensityStore;
pub use reader::{write_intensity_file, IntensityFile, IntensityHeader};

/// Read access to a committed intensity matrix.
pub trait IntensityStore {
    fn probe_count(&self) -> usize;

    fn sample_count(&self) -> usize;

    /// Intensity of one probe on one sample. Disk-backed stores may block on
    /// a cache fill.
    fn intensity(&self, probe: ProbeId, sample: usize) -> Result<f32>;

    /// Every sample's intensity for `probe`, written into `out`.
    fn probe_row(&self, probe: ProbeId, out: &mut [f32]) -> Result<()> {
        for (sample, slot) in out.iter_mut().enumerate().take(self.sample_count()) {
            *slot = self.intensity(probe, sample)?;
        }
        Ok(())
    }

    /// One sample's full vector, indexed by probe id.
    fn sample_column(&self, sample: usize) -> Result<Vec<f32>>;
}

/// Accepts one sample vector at a time, in sample order, then commits.
pub trait StoreBuilder {
    /// `by_probe` is indexed by probe id.
    fn push_sample(&mut self, sample: usize, by_probe: &[f32]) -> Result<()>;

    /// Fails unless every sample was pushed; no partial store is ever returned.
    fn commit(self: Box<Self>) -> Result<Box<dyn IntensityStore>>;
}

/// Observer of the single streaming pass over input files.
pub trait IntensityListener {
    fn new_sample(&mut self, sample: &Sample, intensities: &[f32]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBacking {
    Memory,
    Disk { cache_bytes: usize, temp_dir: PathBuf },
}

/// Creates builders that all share one probe order and sample count.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    backing: StoreBacking,
    order: Arc<DesiredProbeOrder>,
    sample_count: usize,
}

impl StoreFactory {
    pub fn new(backing: StoreBacking, order: Arc<DesiredProbeOrder>, sample_count: usize) -> Self {
        Self {
            backing,
            order,
            sample_count,
        }
    }

    pub fn probe_count(&self) -> usize {
        self.order.len()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn order(&self) -> &Arc<DesiredProbeOrder> {
        &self.order
    }

    pub fn builder(&self) -> Result<Box<dyn StoreBuilder>> {
        match &self.backing {
            StoreBacking::Memory => Ok(Box::new(memory::MemoryStoreBuilder::new(
                self.order.len(),
                self.sample_count,
            ))),
            StoreBacking::Disk {
                cache_bytes,
                temp_dir,
            } => Ok(Box::new(disk::DiskStoreBuilder::create(
                Arc::clone(&self.order),
                self.sample_count,
                *cache_bytes,
                temp_dir,
            )?)),
        }
    }
}

/// Shared sequencing check for builders.
pub(crate) fn check_push(next: usize, sample: usize, expected_len: usize, got_len: usize) -> Result<()> {
    if sample != next {
        return Err(GenoError::data_integrity(format!(
            "Intensity store expected sample {} but received sample {}.",
            next, sample
        )));
    }
    if got_len != expected_len {
        return Err(GenoError::data_integrity(format!(
            "Sample {} has {} probes, expected {}.",
            sample, got_len, expected_len
        )));
    }
    Ok(())
}
