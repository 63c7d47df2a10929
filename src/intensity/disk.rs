//! Disk-backed intensity store.
//!
//! Each sample's vector is written, in [`DesiredProbeOrder`], as one
//! contiguous run of little-endian `f32` in a temporary file. Reads go through
//! a window of consecutive storage rows loaded for all samples at once; the
//! window holds `cache_bytes / (4 * samples)` rows (at least one) starting at
//! the requested probe, or every row when the budget covers the whole matrix.
//! The temporary file is deleted when the store is dropped.

use super::reader::{f32s_from_le, f32s_to_le};
use super::{check_push, IntensityStore, StoreBuilder};
use crate::error::{GenoError, Result};
use crate::layout::{DesiredProbeOrder, ProbeId};
use log::debug;
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Debug, Default)]
struct Window {
    start: usize,
    rows: usize,
    /// Sample-major: `data[sample * rows + (position - start)]`.
    data: Vec<f32>,
}

impl Window {
    fn contains(&self, position: usize) -> bool {
        self.rows > 0 && position >= self.start && position < self.start + self.rows
    }
}

pub struct DiskIntensityStore {
    file: NamedTempFile,
    order: Arc<DesiredProbeOrder>,
    sample_count: usize,
    rows_per_window: usize,
    window: RefCell<Window>,
    window_loads: Cell<usize>,
}

impl DiskIntensityStore {
    fn rows_for_budget(cache_bytes: usize, probe_count: usize, sample_count: usize) -> usize {
        let per_row = 4 * sample_count.max(1);
        let rows = cache_bytes / per_row;
        if rows >= probe_count {
            probe_count
        } else {
            rows.max(1)
        }
    }

    pub fn rows_per_window(&self) -> usize {
        self.rows_per_window
    }

    /// Number of window fills so far.
    pub fn window_loads(&self) -> usize {
        self.window_loads.get()
    }

    fn path(&self) -> &Path {
        self.file.path()
    }

    fn read_floats(&self, position: usize, sample: usize, count: usize) -> Result<Vec<f32>> {
        let probe_count = self.order.len();
        let offset = ((sample * probe_count + position) * 4) as u64;
        let mut handle: &File = self.file.as_file();
        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|e| GenoError::io(self.path(), e))?;
        let mut bytes = vec![0u8; count * 4];
        handle
            .read_exact(&mut bytes)
            .map_err(|e| GenoError::io(self.path(), e))?;
        Ok(f32s_from_le(&bytes))
    }

    fn load_window(&self, start: usize) -> Result<()> {
        let rows = self.rows_per_window.min(self.order.len() - start);
        let mut data = Vec::with_capacity(rows * self.sample_count);
        for sample in 0..self.sample_count {
            data.extend(self.read_floats(start, sample, rows)?);
        }
        *self.window.borrow_mut() = Window { start, rows, data };
        self.window_loads.set(self.window_loads.get() + 1);
        Ok(())
    }

    fn position(&self, probe: ProbeId) -> Result<usize> {
        if probe.index() >= self.order.len() {
            return Err(GenoError::data_integrity(format!(
                "Probe {} is outside the intensity store.",
                probe.index() + 1
            )));
        }
        Ok(self.order.position_of(probe))
    }
}

impl IntensityStore for DiskIntensityStore {
    fn probe_count(&self) -> usize {
        self.order.len()
    }

    fn sample_count(&self) -> usize {
        self.sample_count
    }

    fn intensity(&self, probe: ProbeId, sample: usize) -> Result<f32> {
        if sample >= self.sample_count {
            return Err(GenoError::data_integrity(format!(
                "Sample {} is outside the intensity store.",
                sample
            )));
        }
        let position = self.position(probe)?;
        if !self.window.borrow().contains(position) {
            self.load_window(position)?;
        }
        let window = self.window.borrow();
        Ok(window.data[sample * window.rows + (position - window.start)])
    }

    fn sample_column(&self, sample: usize) -> Result<Vec<f32>> {
        if sample >= self.sample_count {
            return Err(GenoError::data_integrity(format!(
                "Sample {} is outside the intensity store.",
                sample
            )));
        }
        let stored = self.read_floats(0, sample, self.order.len())?;
        let mut by_probe = vec![0.0f32; stored.len()];
        for (position, value) in stored.into_iter().enumerate() {
            by_probe[self.order.probe_at(position).index()] = value;
        }
        Ok(by_probe)
    }
}

pub(crate) struct DiskStoreBuilder {
    file: NamedTempFile,
    writer: BufWriter<File>,
    order: Arc<DesiredProbeOrder>,
    sample_count: usize,
    cache_bytes: usize,
    next_sample: usize,
}

impl DiskStoreBuilder {
    pub(crate) fn create(
        order: Arc<DesiredProbeOrder>,
        sample_count: usize,
        cache_bytes: usize,
        temp_dir: &Path,
    ) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("intensity-")
            .suffix(".bin")
            .tempfile_in(temp_dir)
            .map_err(|e| GenoError::io(temp_dir, e))?;
        let writer = BufWriter::new(file.reopen().map_err(|e| GenoError::io(file.path(), e))?);
        debug!(
            "Disk intensity store at {} for {} probes x {} samples.",
            file.path().display(),
            order.len(),
            sample_count
        );
        Ok(Self {
            file,
            writer,
            order,
            sample_count,
            cache_bytes,
            next_sample: 0,
        })
    }
}

impl StoreBuilder for DiskStoreBuilder {
    fn push_sample(&mut self, sample: usize, by_probe: &[f32]) -> Result<()> {
        if sample >= self.sample_count {
            return Err(GenoError::data_integrity(format!(
                "Sample {} exceeds the {} samples the store was sized for.",
                sample, self.sample_count
            )));
        }
        check_push(self.next_sample, sample, self.order.len(), by_probe.len())?;
        let reordered = self.order.reorder(by_probe);
        self.writer
            .write_all(&f32s_to_le(&reordered))
            .map_err(|e| GenoError::io(self.file.path(), e))?;
        self.next_sample += 1;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Box<dyn IntensityStore>> {
        Ok(Box::new(self.finish()?))
    }
}

impl DiskStoreBuilder {
    fn finish(self) -> Result<DiskIntensityStore> {
        if self.next_sample != self.sample_count {
            return Err(GenoError::data_integrity(format!(
                "Intensity store received {} of {} samples.",
                self.next_sample, self.sample_count
            )));
        }
        let DiskStoreBuilder {
            file,
            mut writer,
            order,
            sample_count,
            cache_bytes,
            ..
        } = self;
        writer.flush().map_err(|e| GenoError::io(file.path(), e))?;
        drop(writer);
        let rows_per_window =
            DiskIntensityStore::rows_for_budget(cache_bytes, order.len(), sample_count);
        debug!(
            "Disk intensity store committed; cache window of {} rows.",
            rows_per_window
        );
        Ok(DiskIntensityStore {
            file,
            order,
            sample_count,
            rows_per_window,
            window: RefCell::new(Window::default()),
            window_loads: Cell::new(0),
        })
    }
}
