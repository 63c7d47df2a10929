//! Raw per-array intensity files.
//!
//! Binary layout, little-endian: the magic `GCIN`, a `u32` format version, a
//! `u32` probe count, then one `f32` per probe in probe-id order. Files ending
//! in `.txt` hold one `probe_id<TAB>intensity` line per probe with dense 1-based
//! ids instead.

use crate::error::{GenoError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"GCIN";
const VERSION: u32 = 1;
const HEADER_BYTES: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntensityFormat {
    Binary,
    Text,
}

impl IntensityFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("txt") => IntensityFormat::Text,
            _ => IntensityFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntensityHeader {
    pub format: IntensityFormat,
    pub probe_count: usize,
}

/// Reader for one input file. `read_header` may be called alone to size the
/// run; `read` returns the full intensity vector indexed by probe id.
pub struct IntensityFile {
    path: PathBuf,
    format: IntensityFormat,
    text_values: Option<Vec<f32>>,
}

impl IntensityFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = IntensityFormat::for_path(&path);
        Self {
            path,
            format,
            text_values: None,
        }
    }

    pub fn file_name(&self) -> &Path {
        &self.path
    }

    pub fn read_header(&mut self) -> Result<IntensityHeader> {
        let probe_count = match self.format {
            IntensityFormat::Binary => self.open_binary()?.1,
            IntensityFormat::Text => self.text_values()?.len(),
        };
        Ok(IntensityHeader {
            format: self.format,
            probe_count,
        })
    }

    pub fn read(&mut self) -> Result<Vec<f32>> {
        let values = match self.format {
            IntensityFormat::Binary => {
                let (mut reader, count) = self.open_binary()?;
                let mut bytes = vec![0u8; count * 4];
                reader.read_exact(&mut bytes).map_err(|e| GenoError::io(&self.path, e))?;
                f32s_from_le(&bytes)
            }
            IntensityFormat::Text => match self.text_values.take() {
                Some(values) => values,
                None => parse_text(&self.path)?,
            },
        };
        if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
            return Err(GenoError::data_integrity(format!(
                "Intensity file {} has a non-finite value for probe {}.",
                self.path.display(),
                bad + 1
            )));
        }
        Ok(values)
    }

    /// Opens the file, reads the header and checks the declared probe count
    /// against the file length. The reader is left at the first value.
    fn open_binary(&self) -> Result<(BufReader<File>, usize)> {
        let file = File::open(&self.path).map_err(|e| GenoError::io(&self.path, e))?;
        let len = file.metadata().map_err(|e| GenoError::io(&self.path, e))?.len();
        if len < HEADER_BYTES {
            return Err(GenoError::data_integrity(format!(
                "Intensity file {} is too short to hold a header.",
                self.path.display()
            )));
        }
        let mut reader = BufReader::new(file);
        let count = read_binary_header(&mut reader, &self.path)?;
        let expected = HEADER_BYTES + 4 * count as u64;
        if len != expected {
            return Err(GenoError::data_integrity(format!(
                "Intensity file {} declares {} probes ({} bytes) but holds {} bytes.",
                self.path.display(),
                count,
                expected,
                len
            )));
        }
        Ok((reader, count))
    }

    fn text_values(&mut self) -> Result<&[f32]> {
        if self.text_values.is_none() {
            self.text_values = Some(parse_text(&self.path)?);
        }
        Ok(self.text_values.as_deref().unwrap_or(&[]))
    }
}

fn read_binary_header(reader: &mut impl Read, path: &Path) -> Result<usize> {
    let mut header = [0u8; HEADER_BYTES as usize];
    reader.read_exact(&mut header).map_err(|e| GenoError::io(path, e))?;
    if &header[0..4] != MAGIC {
        return Err(GenoError::data_integrity(format!(
            "{} is not an intensity file (bad magic).",
            path.display()
        )));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != VERSION {
        return Err(GenoError::data_integrity(format!(
            "{} has unsupported intensity format version {}.",
            path.display(),
            version
        )));
    }
    Ok(u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize)
}

fn parse_text(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let mut values = Vec::new();
    for (line_idx, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("probe_id") {
            continue;
        }
        let mut fields = trimmed.split('\t');
        let id = fields
            .next()
            .and_then(|f| f.trim().parse::<usize>().ok())
            .ok_or_else(|| GenoError::parse(path, line_idx + 1, "missing probe id"))?;
        if id != values.len() + 1 {
            return Err(GenoError::parse(
                path,
                line_idx + 1,
                format!("expected probe id {}, found {}", values.len() + 1, id),
            ));
        }
        let value = fields
            .next()
            .and_then(|f| f.trim().parse::<f32>().ok())
            .ok_or_else(|| GenoError::parse(path, line_idx + 1, "missing or bad intensity"))?;
        values.push(value);
    }
    Ok(values)
}

/// Writes an intensity vector in the format implied by the path's extension.
pub fn write_intensity_file(path: &Path, values: &[f32]) -> Result<()> {
    let file = File::create(path).map_err(|e| GenoError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    match IntensityFormat::for_path(path) {
        IntensityFormat::Binary => {
            writer.write_all(MAGIC).map_err(|e| GenoError::io(path, e))?;
            writer
                .write_all(&VERSION.to_le_bytes())
                .map_err(|e| GenoError::io(path, e))?;
            writer
                .write_all(&(values.len() as u32).to_le_bytes())
                .map_err(|e| GenoError::io(path, e))?;
            writer
                .write_all(&f32s_to_le(values))
                .map_err(|e| GenoError::io(path, e))?;
        }
        IntensityFormat::Text => {
            writeln!(writer, "probe_id\tintensity").map_err(|e| GenoError::io(path, e))?;
            for (i, v) in values.iter().enumerate() {
                writeln!(writer, "{}\t{}", i + 1, v).map_err(|e| GenoError::io(path, e))?;
            }
        }
    }
    writer.flush().map_err(|e| GenoError::io(path, e))
}

pub(crate) fn f32s_from_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub(crate) fn f32s_to_le(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
