//! Per-sample binary result files.
//!
//! Little-endian layout: magic `GCHP`, `u32` version, the algorithm name and
//! version as `u32`-length-prefixed UTF-8, a gender byte (0 unknown, 1 male,
//! 2 female), the `u32` entry count and the `u32` probeset-name width. Each
//! entry then holds the zero-padded name, the call code as a byte (255 for no
//! call) and four `f32`s: confidence, contrast, signal A, signal B.

use super::{AtomicOutput, OrderGuard, ProbesetResult, ReportSink};
use crate::covariate::Gender;
use crate::error::{GenoError, Result};
use crate::genotype::GenotypeCall;
use log::debug;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"GCHP";
const VERSION: u32 = 1;
/// Per-sample files held open at once while the spool is split.
const MAX_OPEN_FILES: usize = 256;
/// Call byte plus four `f32`s.
const ROW_VALUE_BYTES: usize = 1 + 4 * 4;

fn gender_byte(gender: Gender) -> u8 {
    match gender {
        Gender::Unknown => 0,
        Gender::Male => 1,
        Gender::Female => 2,
    }
}

/// Identity written into every file header.
#[derive(Debug, Clone, PartialEq)]
pub struct ChpHeader {
    pub algorithm: String,
    pub version: String,
}

/// Rows arrive probeset by probeset but the files are per sample, so every
/// row goes to one anonymous spool file first. `finish` splits the spool into
/// `<dir>/<stem>.<name>.gtchp`, opening at most `MAX_OPEN_FILES` at a time.
pub struct ChpSink {
    dir: PathBuf,
    name: String,
    stems: Vec<String>,
    genders: Vec<Gender>,
    header: ChpHeader,
    guard: OrderGuard,
    name_width: usize,
    spool: Option<BufWriter<File>>,
    row: Vec<u8>,
}

impl ChpSink {
    /// `stems` and `genders` are in canonical sample order; stems must be
    /// unique. `name_width` is the padded probeset-name field and must fit
    /// every name in `order`.
    pub fn create(
        dir: &Path,
        name: &str,
        stems: &[String],
        genders: &[Gender],
        header: &ChpHeader,
        order: Arc<[String]>,
        name_width: usize,
    ) -> Result<Self> {
        if stems.len() != genders.len() {
            return Err(GenoError::data_integrity(format!(
                "{} samples but {} genders for the CHP sink.",
                stems.len(),
                genders.len()
            )));
        }
        if let Some(long) = order.iter().find(|n| n.len() > name_width) {
            return Err(GenoError::data_integrity(format!(
                "Probeset name '{}' does not fit the {}-byte CHP name field.",
                long, name_width
            )));
        }
        fs::create_dir_all(dir).map_err(|e| GenoError::io(dir, e))?;
        let spool = tempfile::tempfile_in(dir).map_err(|e| GenoError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            stems: stems.to_vec(),
            genders: genders.to_vec(),
            header: header.clone(),
            guard: OrderGuard::new("chp", order),
            name_width,
            spool: Some(BufWriter::new(spool)),
            row: Vec::new(),
        })
    }

    fn file_header(&self, gender: Gender, count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        for text in [&self.header.algorithm, &self.header.version] {
            bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
            bytes.extend_from_slice(text.as_bytes());
        }
        bytes.push(gender_byte(gender));
        bytes.extend_from_slice(&(count as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.name_width as u32).to_le_bytes());
        bytes
    }

    /// Writes and commits the files of samples `first..first + len` in one
    /// pass over the spool.
    fn write_batch(&self, spool: &File, first: usize, len: usize, count: usize) -> Result<Vec<PathBuf>> {
        let row_len = self.name_width + ROW_VALUE_BYTES;
        let mut outs = Vec::with_capacity(len);
        for sample in first..first + len {
            let path = self.dir.join(format!("{}.{}.gtchp", self.stems[sample], self.name));
            let mut out = AtomicOutput::create(path)?;
            let header = self.file_header(self.genders[sample], count);
            out.write_all(&header).map_err(|e| GenoError::io(out.tmp_path(), e))?;
            outs.push(out);
        }

        let mut reader = BufReader::new(spool);
        let mut block = vec![0u8; row_len * self.stems.len()];
        for _ in 0..count {
            reader.read_exact(&mut block).map_err(|e| GenoError::io(&self.dir, e))?;
            for (k, out) in outs.iter_mut().enumerate() {
                let at = (first + k) * row_len;
                out.write_all(&block[at..at + row_len])
                    .map_err(|e| GenoError::io(out.tmp_path(), e))?;
            }
        }
        outs.into_iter().map(AtomicOutput::commit).collect()
    }
}

impl ReportSink for ChpSink {
    fn name(&self) -> &str {
        "chp"
    }

    fn prepare(&mut self, expected: usize) -> Result<()> {
        self.guard.check_prepare(expected)
    }

    fn write_entry(&mut self, entry: &ProbesetResult<'_>) -> Result<()> {
        self.guard.check(entry.index, entry.name)?;
        if entry.calls.len() != self.stems.len() {
            return Err(GenoError::data_integrity(format!(
                "Probeset '{}' has {} results for {} CHP files.",
                entry.name,
                entry.calls.len(),
                self.stems.len()
            )));
        }
        let spool = self
            .spool
            .as_mut()
            .ok_or_else(|| GenoError::data_integrity("CHP sink received an entry after finishing."))?;
        for call in entry.calls {
            self.row.clear();
            self.row.extend_from_slice(entry.name.as_bytes());
            self.row.resize(self.name_width, 0);
            self.row.push(call.call.code() as u8);
            for v in [call.confidence, call.contrast, call.signal_a, call.signal_b] {
                self.row.extend_from_slice(&(v as f32).to_le_bytes());
            }
            spool.write_all(&self.row).map_err(|e| GenoError::io(&self.dir, e))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>> {
        self.guard.finish()?;
        let spool = self
            .spool
            .take()
            .ok_or_else(|| GenoError::data_integrity("CHP sink was already finished."))?;
        let mut spool = spool
            .into_inner()
            .map_err(|e| GenoError::io(&self.dir, e.into_error()))?;
        let count = self.guard.expected_len();
        let mut paths = Vec::with_capacity(self.stems.len());
        let mut first = 0;
        while first < self.stems.len() {
            let len = MAX_OPEN_FILES.min(self.stems.len() - first);
            spool.rewind().map_err(|e| GenoError::io(&self.dir, e))?;
            paths.extend(self.write_batch(&spool, first, len, count)?);
            debug!("Wrote CHP files {}..{} of {}.", first + 1, first + len, self.stems.len());
            first += len;
        }
        Ok(paths)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChpEntry {
    pub name: String,
    pub call: GenotypeCall,
    pub confidence: f32,
    pub contrast: f32,
    pub signal_a: f32,
    pub signal_b: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChpFile {
    pub header: ChpHeader,
    pub gender: Gender,
    pub entries: Vec<ChpEntry>,
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize, path: &Path) -> Result<&'a [u8]> {
    let slice = bytes
        .get(*pos..*pos + n)
        .ok_or_else(|| GenoError::data_integrity(format!("{} is truncated.", path.display())))?;
    *pos += n;
    Ok(slice)
}

fn take_u32(bytes: &[u8], pos: &mut usize, path: &Path) -> Result<u32> {
    let b = take(bytes, pos, 4, path)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_f32(bytes: &[u8], pos: &mut usize, path: &Path) -> Result<f32> {
    let b = take(bytes, pos, 4, path)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_text(bytes: &[u8], pos: &mut usize, path: &Path) -> Result<String> {
    let len = take_u32(bytes, pos, path)? as usize;
    let b = take(bytes, pos, len, path)?;
    String::from_utf8(b.to_vec())
        .map_err(|_| GenoError::data_integrity(format!("{} holds a non-UTF-8 string.", path.display())))
}

/// Reads a file written by [`ChpSink`].
pub fn read_chp(path: &Path) -> Result<ChpFile> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| GenoError::io(path, e))?;

    let mut pos = 0;
    if take(&bytes, &mut pos, 4, path)? != MAGIC {
        return Err(GenoError::data_integrity(format!(
            "{} is not a CHP file (bad magic).",
            path.display()
        )));
    }
    let version = take_u32(&bytes, &mut pos, path)?;
    if version != VERSION {
        return Err(GenoError::data_integrity(format!(
            "{} has unsupported CHP version {}.",
            path.display(),
            version
        )));
    }
    let algorithm = take_text(&bytes, &mut pos, path)?;
    let algorithm_version = take_text(&bytes, &mut pos, path)?;
    let gender = match take(&bytes, &mut pos, 1, path)?[0] {
        1 => Gender::Male,
        2 => Gender::Female,
        _ => Gender::Unknown,
    };
    let count = take_u32(&bytes, &mut pos, path)? as usize;
    let width = take_u32(&bytes, &mut pos, path)? as usize;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = take(&bytes, &mut pos, width, path)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        let name = String::from_utf8_lossy(&raw[..end]).into_owned();
        let code = take(&bytes, &mut pos, 1, path)?[0] as i8;
        let call = GenotypeCall::from_code(code as i64).ok_or_else(|| {
            GenoError::data_integrity(format!("{} has unknown call code {} for '{}'.", path.display(), code, name))
        })?;
        entries.push(ChpEntry {
            name,
            call,
            confidence: take_f32(&bytes, &mut pos, path)?,
            contrast: take_f32(&bytes, &mut pos, path)?,
            signal_a: take_f32(&bytes, &mut pos, path)?,
            signal_b: take_f32(&bytes, &mut pos, path)?,
        });
    }
    if pos != bytes.len() {
        return Err(GenoError::data_integrity(format!(
            "{} has {} trailing bytes.",
            path.display(),
            bytes.len() - pos
        )));
    }
    Ok(ChpFile {
        header: ChpHeader {
            algorithm,
            version: algorithm_version,
        },
        gender,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::call;
    use super::*;

    fn header() -> ChpHeader {
        ChpHeader {
            algorithm: "birdseed-v2".into(),
            version: "0.1.0".into(),
        }
    }

    #[test]
    fn test_writes_one_file_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let chp_dir = dir.path().join("chp");
        let order: Arc<[String]> = vec!["rs1".to_string(), "AFFX-SNP_long".to_string()].into();
        let stems = vec!["NA1".to_string(), "NA2".to_string()];
        let mut sink = ChpSink::create(
            &chp_dir,
            "bs",
            &stems,
            &[Gender::Female, Gender::Male],
            &header(),
            order.clone(),
            20,
        )
        .unwrap();
        sink.prepare(2).unwrap();
        let first = [call(GenotypeCall::AA, 0.01), call(GenotypeCall::NoCall, 0.4)];
        let second = [call(GenotypeCall::AB, 0.02), call(GenotypeCall::BB, 0.03)];
        for (i, row) in [&first[..], &second[..]].into_iter().enumerate() {
            sink.write_entry(&ProbesetResult {
                index: i,
                name: &order[i],
                calls: row,
                failed: false,
                haploid: false,
            })
            .unwrap();
        }
        let paths = sink.finish().unwrap();
        assert_eq!(paths, vec![chp_dir.join("NA1.bs.gtchp"), chp_dir.join("NA2.bs.gtchp")]);
        assert_eq!(fs::read_dir(&chp_dir).unwrap().count(), 2);

        let chp = read_chp(&paths[1]).unwrap();
        assert_eq!(chp.header, header());
        assert_eq!(chp.gender, Gender::Male);
        assert_eq!(chp.entries.len(), 2);
        assert_eq!(chp.entries[0].name, "rs1");
        assert_eq!(chp.entries[0].call, GenotypeCall::NoCall);
        assert_eq!(chp.entries[1].name, "AFFX-SNP_long");
        assert_eq!(chp.entries[1].call, GenotypeCall::BB);
        assert!((chp.entries[1].confidence - 0.03).abs() < 1e-6);
        assert!((chp.entries[1].signal_a - 900.0).abs() < 1e-3);
        assert_eq!(read_chp(&paths[0]).unwrap().entries[0].call, GenotypeCall::AA);
    }

    #[test]
    fn test_more_samples_than_open_file_batch() {
        let dir = tempfile::tempdir().unwrap();
        let n = MAX_OPEN_FILES + 7;
        let order: Arc<[String]> = vec!["rs1".to_string(), "rs2".to_string(), "rs3".to_string()].into();
        let stems: Vec<String> = (0..n).map(|i| format!("S{:04}", i)).collect();
        let mut sink = ChpSink::create(
            dir.path(),
            "bs",
            &stems,
            &vec![Gender::Unknown; n],
            &header(),
            order.clone(),
            3,
        )
        .unwrap();
        sink.prepare(3).unwrap();
        for (i, name) in order.iter().enumerate() {
            let calls: Vec<_> = (0..n)
                .map(|s| call(GenotypeCall::AA, (s * 3 + i) as f64 / 10_000.0))
                .collect();
            sink.write_entry(&ProbesetResult {
                index: i,
                name,
                calls: &calls,
                failed: false,
                haploid: false,
            })
            .unwrap();
        }
        let paths = sink.finish().unwrap();
        assert_eq!(paths.len(), n);
        for s in [0, MAX_OPEN_FILES - 1, MAX_OPEN_FILES, n - 1] {
            assert_eq!(paths[s], dir.path().join(format!("S{:04}.bs.gtchp", s)));
            let chp = read_chp(&paths[s]).unwrap();
            let names: Vec<_> = chp.entries.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, ["rs1", "rs2", "rs3"]);
            for (i, entry) in chp.entries.iter().enumerate() {
                let want = ((s * 3 + i) as f64 / 10_000.0) as f32;
                assert!((entry.confidence - want).abs() < 1e-7, "sample {} entry {}", s, i);
            }
        }
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map_or(true, |x| x != "gtchp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_name_width_must_fit_every_name() {
        let dir = tempfile::tempdir().unwrap();
        let result = ChpSink::create(
            dir.path(),
            "bs",
            &["a".to_string()],
            &[Gender::Unknown],
            &header(),
            vec!["rs12345".to_string()].into(),
            4,
        );
        assert!(matches!(result, Err(GenoError::DataIntegrity { .. })));
    }

    #[test]
    fn test_abandoned_sink_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let order: Arc<[String]> = vec!["rs1".to_string()].into();
        let mut sink = ChpSink::create(
            dir.path(),
            "bs",
            &["a".to_string()],
            &[Gender::Unknown],
            &header(),
            order.clone(),
            3,
        )
        .unwrap();
        sink.prepare(1).unwrap();
        sink.write_entry(&ProbesetResult {
            index: 0,
            name: &order[0],
            calls: &[call(GenotypeCall::AB, 0.1)],
            failed: false,
            haploid: false,
        })
        .unwrap();
        drop(sink);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
