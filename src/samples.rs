//! The ordered list of input arrays for a run.

use crate::error::{GenoError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One input intensity file. Its index is the canonical sample order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub index: usize,
    pub path: PathBuf,
    /// File name without directories; covariate files are keyed by it.
    pub name: String,
}

impl Sample {
    /// File name without its extension.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    /// Fixes the sample order. Duplicate basenames are rejected because
    /// covariate files could not tell them apart.
    pub fn new(paths: Vec<PathBuf>) -> Result<Self> {
        if paths.is_empty() {
            return Err(GenoError::config("No input intensity files were given."));
        }
        let mut seen = HashSet::new();
        let mut samples = Vec::with_capacity(paths.len());
        for (index, path) in paths.into_iter().enumerate() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| GenoError::config(format!("'{}' is not a file path.", path.display())))?;
            if !seen.insert(name.clone()) {
                return Err(GenoError::config(format!(
                    "Input file name '{}' is used more than once.",
                    name
                )));
            }
            samples.push(Sample { index, path, name });
        }
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn names(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.name.clone()).collect()
    }

    pub fn stems(&self) -> Vec<String> {
        self.samples.iter().map(Sample::stem).collect()
    }

    /// Per-sample outputs are named by stem, so `a.gcin` and `a.txt` collide.
    pub fn check_unique_stems(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for sample in &self.samples {
            let stem = sample.stem();
            if !seen.insert(stem.clone()) {
                return Err(GenoError::config(format!(
                    "Two inputs share the stem '{}'; their per-sample files would collide.",
                    stem
                )));
            }
        }
        Ok(())
    }
}

/// Reads a list of input files, one per line, with an optional `cel_files`
/// header. Relative entries resolve against the list file's directory.
pub fn read_sample_list(path: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut paths = Vec::new();
    for line_result in BufReader::new(file).lines() {
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        let entry = line.split('\t').next().unwrap_or("").trim();
        if entry.is_empty() || entry.starts_with('#') || entry == "cel_files" {
            continue;
        }
        let candidate = PathBuf::from(entry);
        paths.push(if candidate.is_absolute() {
            candidate
        } else {
            base.join(candidate)
        });
    }
    Ok(paths)
}
