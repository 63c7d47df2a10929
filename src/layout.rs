//! Probeset layout loaded from a tab-separated design file, and the probe
//! storage order derived from it.
//!
//! The layout order is the output order of every report, so it is kept exactly
//! as authored.

use crate::error::{GenoError, Result};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// 0-based probe index into a sample's intensity vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub u32);

impl ProbeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbesetKind {
    Genotyping,
    Marker,
    Other,
}

impl ProbesetKind {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "genotyping" => Some(ProbesetKind::Genotyping),
            "marker" | "copynumber" => Some(ProbesetKind::Marker),
            "other" | "expression" => Some(ProbesetKind::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Probeset {
    pub name: String,
    pub kind: ProbesetKind,
    pub allele_a: Vec<ProbeId>,
    /// Empty for non-genotyping probesets.
    pub allele_b: Vec<ProbeId>,
}

impl Probeset {
    /// All probes in design order, A allele first.
    pub fn probes(&self) -> impl Iterator<Item = ProbeId> + '_ {
        self.allele_a.iter().chain(self.allele_b.iter()).copied()
    }

    pub fn is_genotyping(&self) -> bool {
        self.kind == ProbesetKind::Genotyping
    }
}

/// Ordered, read-only collection of probesets.
#[derive(Clone, Debug)]
pub struct ProbesetLayout {
    probesets: Vec<Probeset>,
    by_name: HashMap<String, usize>,
    declared_probe_count: Option<usize>,
    max_name_length: usize,
}

impl ProbesetLayout {
    /// Builds a layout from already-parsed entries, rejecting duplicate names.
    pub fn from_probesets(probesets: Vec<Probeset>, declared_probe_count: Option<usize>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(probesets.len());
        for (i, ps) in probesets.iter().enumerate() {
            if by_name.insert(ps.name.clone(), i).is_some() {
                return Err(GenoError::data_integrity(format!(
                    "Probeset '{}' appears more than once in the layout.",
                    ps.name
                )));
            }
        }
        let max_name_length = probesets.iter().map(|p| p.name.len()).max().unwrap_or(0);
        Ok(Self {
            probesets,
            by_name,
            declared_probe_count,
            max_name_length,
        })
    }

    /// Reads a design file. See the crate docs for the column layout.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading probeset layout from {}", path.display());
        let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
        let reader = BufReader::new(file);

        let mut probesets = Vec::new();
        let mut declared_probe_count = None;
        let mut seen = HashSet::new();

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line_num = line_idx + 1;
            let line = line_result.map_err(|e| GenoError::io(path, e))?;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix("#%") {
                if let Some(value) = header.strip_prefix("probe-count=") {
                    let count = value.trim().parse::<usize>().map_err(|e| {
                        GenoError::parse(path, line_num, format!("bad probe-count '{}': {}", value, e))
                    })?;
                    declared_probe_count = Some(count);
                }
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with("probeset_id\t") {
                continue;
            }

            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 3 {
                return Err(GenoError::parse(
                    path,
                    line_num,
                    format!("expected at least 3 tab-separated fields, found {}", fields.len()),
                ));
            }
            let name = fields[0].trim().to_string();
            if name.is_empty() {
                return Err(GenoError::parse(path, line_num, "empty probeset id"));
            }
            if !seen.insert(name.clone()) {
                return Err(GenoError::parse(
                    path,
                    line_num,
                    format!("duplicate probeset id '{}'", name),
                ));
            }
            let kind = ProbesetKind::parse(fields[1].trim()).ok_or_else(|| {
                GenoError::parse(path, line_num, format!("unknown probeset type '{}'", fields[1]))
            })?;
            let allele_a = parse_probe_list(fields[2], path, line_num)?;
            let allele_b = match fields.get(3) {
                Some(field) => parse_probe_list(field, path, line_num)?,
                None => Vec::new(),
            };
            if allele_a.is_empty() && allele_b.is_empty() {
                return Err(GenoError::parse(
                    path,
                    line_num,
                    format!("probeset '{}' lists no probes", name),
                ));
            }
            if kind == ProbesetKind::Genotyping && (allele_a.is_empty() || allele_b.is_empty()) {
                return Err(GenoError::parse(
                    path,
                    line_num,
                    format!("genotyping probeset '{}' needs probes for both alleles", name),
                ));
            }
            probesets.push(Probeset {
                name,
                kind,
                allele_a,
                allele_b,
            });
        }

        if probesets.is_empty() {
            return Err(GenoError::data_integrity(format!(
                "Design file {} contains no probesets.",
                path.display()
            )));
        }
        let layout = Self::from_probesets(probesets, declared_probe_count)?;
        info!(
            "Loaded {} probesets ({} genotyping) from {}.",
            layout.len(),
            layout.iter().filter(|p| p.is_genotyping()).count(),
            path.display()
        );
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.probesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probesets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Probeset> {
        self.probesets.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Probeset> {
        self.probesets.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn declared_probe_count(&self) -> Option<usize> {
        self.declared_probe_count
    }

    pub fn max_name_length(&self) -> usize {
        self.max_name_length
    }

    /// Largest referenced probe index plus one.
    pub fn min_probe_count(&self) -> usize {
        self.probesets
            .iter()
            .flat_map(|p| p.probes())
            .map(|p| p.index() + 1)
            .max()
            .unwrap_or(0)
    }
}

fn parse_probe_list(field: &str, path: &Path, line_num: usize) -> Result<Vec<ProbeId>> {
    let field = field.trim();
    if field.is_empty() || field == "-" {
        return Ok(Vec::new());
    }
    field
        .split(',')
        .map(|token| {
            let id = token.trim().parse::<u32>().map_err(|e| {
                GenoError::parse(path, line_num, format!("bad probe id '{}': {}", token, e))
            })?;
            if id == 0 {
                return Err(GenoError::parse(path, line_num, "probe ids are 1-based; found 0"));
            }
            Ok(ProbeId(id - 1))
        })
        .collect()
}

/// Storage order for probes: first-seen order across the layout, followed by
/// every unreferenced probe in ascending id order.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredProbeOrder {
    /// position -> probe
    order: Vec<ProbeId>,
    /// probe -> position
    position: Vec<u32>,
}

impl DesiredProbeOrder {
    pub fn from_layout(layout: &ProbesetLayout, probe_count: usize) -> Result<Self> {
        let mut position = vec![u32::MAX; probe_count];
        let mut order = Vec::with_capacity(probe_count);
        for ps in layout.iter() {
            for probe in ps.probes() {
                let idx = probe.index();
                if idx >= probe_count {
                    return Err(GenoError::data_integrity(format!(
                        "Probeset '{}' references probe {} but the chip has {} probes.",
                        ps.name,
                        idx + 1,
                        probe_count
                    )));
                }
                if position[idx] == u32::MAX {
                    position[idx] = order.len() as u32;
                    order.push(probe);
                }
            }
        }
        let referenced = order.len();
        for (idx, pos) in position.iter_mut().enumerate() {
            if *pos == u32::MAX {
                *pos = order.len() as u32;
                order.push(ProbeId(idx as u32));
            }
        }
        debug!(
            "Probe order: {} referenced probes followed by {} unreferenced.",
            referenced,
            probe_count - referenced
        );
        if referenced == 0 {
            warn!("No probe is referenced by the layout.");
        }
        Ok(Self { order, position })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn probe_at(&self, position: usize) -> ProbeId {
        self.order[position]
    }

    pub fn position_of(&self, probe: ProbeId) -> usize {
        self.position[probe.index()] as usize
    }

    /// Reorders a vector indexed by probe into storage order.
    pub fn reorder(&self, by_probe: &[f32]) -> Vec<f32> {
        self.order.iter().map(|p| by_probe[p.index()]).collect()
    }
}

/// Reads a one-column list of probeset names, skipping comments and an
/// optional `probeset_id` header.
pub fn read_name_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let mut names = Vec::new();
    for line_result in BufReader::new(file).lines() {
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        let token = line.split('\t').next().unwrap_or("").trim();
        if token.is_empty() || token.starts_with('#') || token == "probeset_id" {
            continue;
        }
        names.push(token.to_string());
    }
    Ok(names)
}

/// Reads a one-column list of 1-based probe ids.
pub fn read_probe_list(path: &Path) -> Result<Vec<ProbeId>> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let mut probes = Vec::new();
    for (line_idx, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        let token = line.split('\t').next().unwrap_or("").trim();
        if token.is_empty() || token.starts_with('#') || token == "probe_id" {
            continue;
        }
        let id = token.parse::<u32>().map_err(|e| {
            GenoError::parse(path, line_idx + 1, format!("bad probe id '{}': {}", token, e))
        })?;
        if id == 0 {
            return Err(GenoError::parse(path, line_idx + 1, "probe ids are 1-based; found 0"));
        }
        probes.push(ProbeId(id - 1));
    }
    Ok(probes)
}
