use super::{check_push, IntensityStore, StoreBuilder};
use crate::error::{GenoError, Result};
use crate::layout::ProbeId;
use ndarray::{Array2, Axis};

/// Whole matrix held in memory as samples x probes.
#[derive(Debug, Clone)]
pub struct MemoryIntensityStore {
    data: Array2<f32>,
}

impl MemoryIntensityStore {
    pub fn from_matrix(data: Array2<f32>) -> Self {
        Self { data }
    }
}

impl IntensityStore for MemoryIntensityStore {
    fn probe_count(&self) -> usize {
        self.data.ncols()
    }

    fn sample_count(&self) -> usize {
        self.data.nrows()
    }

    fn intensity(&self, probe: ProbeId, sample: usize) -> Result<f32> {
        self.data
            .get((sample, probe.index()))
            .copied()
            .ok_or_else(|| {
                GenoError::data_integrity(format!(
                    "Probe {} / sample {} is outside the intensity store.",
                    probe.index() + 1,
                    sample
                ))
            })
    }

    fn probe_row(&self, probe: ProbeId, out: &mut [f32]) -> Result<()> {
        if probe.index() >= self.probe_count() {
            return Err(GenoError::data_integrity(format!(
                "Probe {} is outside the intensity store.",
                probe.index() + 1
            )));
        }
        for (slot, value) in out.iter_mut().zip(self.data.column(probe.index())) {
            *slot = *value;
        }
        Ok(())
    }

    fn sample_column(&self, sample: usize) -> Result<Vec<f32>> {
        if sample >= self.sample_count() {
            return Err(GenoError::data_integrity(format!(
                "Sample {} is outside the intensity store.",
                sample
            )));
        }
        Ok(self.data.index_axis(Axis(0), sample).to_vec())
    }
}

pub(crate) struct MemoryStoreBuilder {
    data: Array2<f32>,
    next_sample: usize,
}

impl MemoryStoreBuilder {
    pub(crate) fn new(probe_count: usize, sample_count: usize) -> Self {
        Self {
            data: Array2::zeros((sample_count, probe_count)),
            next_sample: 0,
        }
    }
}

impl StoreBuilder for MemoryStoreBuilder {
    fn push_sample(&mut self, sample: usize, by_probe: &[f32]) -> Result<()> {
        if sample >= self.data.nrows() {
            return Err(GenoError::data_integrity(format!(
                "Sample {} exceeds the {} samples the store was sized for.",
                sample,
                self.data.nrows()
            )));
        }
        check_push(self.next_sample, sample, self.data.ncols(), by_probe.len())?;
        for (slot, value) in self.data.row_mut(sample).iter_mut().zip(by_probe) {
            *slot = *value;
        }
        self.next_sample += 1;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Box<dyn IntensityStore>> {
        if self.next_sample != self.data.nrows() {
            return Err(GenoError::data_integrity(format!(
                "Intensity store received {} of {} samples.",
                self.next_sample,
                self.data.nrows()
            )));
        }
        Ok(Box::new(MemoryIntensityStore::from_matrix(self.data)))
    }
}
