//! Picks exactly one covariate source per run.
//!
//! Precedence, highest first:
//! 1. an explicit override by provenance name (fatal if never registered, or
//!    if the named source produced nothing);
//! 2. a user-supplied file;
//! 3. the first source in the method family's priority list that produced
//!    data;
//! 4. the `none` source, only when the caller tolerates it.

use super::{provenance, CovariateSource, Gender};
use crate::error::{GenoError, Result};
use crate::quant::MethodFamily;
use log::{info, warn};

/// Gender provenance names each method family accepts, most preferred first.
pub fn gender_priority(family: MethodFamily) -> &'static [&'static str] {
    match family {
        MethodFamily::Brlmm => &[provenance::DM_HET_RATE, provenance::SUPPLIED_GENOTYPES],
        MethodFamily::BirdseedV1 => &[provenance::EM_CLUSTER],
        MethodFamily::BirdseedV2 | MethodFamily::BirdseedDev | MethodFamily::LabelZ => {
            &[provenance::CN_PROBE_XY_RATIO, provenance::EM_CLUSTER]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    NoSelection,
    CandidatesRegistered,
    Selected,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionPolicy {
    /// Provenance name the user pinned.
    pub override_name: Option<String>,
    /// Whether falling back to `none` is acceptable.
    pub tolerate_none: bool,
}

pub struct CovariateSelector<T> {
    what: &'static str,
    sample_count: usize,
    sources: Vec<Box<dyn CovariateSource<T>>>,
    state: SelectorState,
    selected: Option<usize>,
}

impl<T> CovariateSelector<T> {
    pub fn new(what: &'static str, sample_count: usize) -> Self {
        Self {
            what,
            sample_count,
            sources: Vec::new(),
            state: SelectorState::NoSelection,
            selected: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Adds a candidate. Its values must cover every sample and its name must
    /// be unique.
    pub fn register(&mut self, source: Box<dyn CovariateSource<T>>) -> Result<()> {
        if self.state == SelectorState::Selected {
            return Err(GenoError::data_integrity(format!(
                "Cannot register {} source '{}' after selection.",
                self.what,
                source.name()
            )));
        }
        if source.values().len() != self.sample_count {
            return Err(GenoError::data_integrity(format!(
                "{} source '{}' has {} values for {} samples.",
                self.what,
                source.name(),
                source.values().len(),
                self.sample_count
            )));
        }
        if self.position(source.name()).is_some() {
            return Err(GenoError::data_integrity(format!(
                "{} source '{}' registered twice.",
                self.what,
                source.name()
            )));
        }
        self.sources.push(source);
        self.state = SelectorState::CandidatesRegistered;
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name() == name)
    }

    pub fn registered(&self) -> impl Iterator<Item = &dyn CovariateSource<T>> + '_ {
        self.sources.iter().map(|s| s.as_ref())
    }

    /// Runs the selection once. Later calls fail.
    pub fn select(&mut self, priority: &[&str], policy: &SelectionPolicy) -> Result<&dyn CovariateSource<T>> {
        match self.state {
            SelectorState::Selected => {
                return Err(GenoError::data_integrity(format!(
                    "{} source was already selected.",
                    self.what
                )))
            }
            SelectorState::NoSelection => {
                return Err(GenoError::data_integrity(format!(
                    "No {} sources were registered.",
                    self.what
                )))
            }
            SelectorState::CandidatesRegistered => {}
        }

        let index = self.choose(priority, policy)?;
        let chosen = &self.sources[index];
        info!(
            "Using {} source '{}': {}",
            self.what,
            chosen.name(),
            chosen.description()
        );
        self.selected = Some(index);
        self.state = SelectorState::Selected;
        Ok(self.sources[index].as_ref())
    }

    fn choose(&self, priority: &[&str], policy: &SelectionPolicy) -> Result<usize> {
        if let Some(name) = &policy.override_name {
            let index = self.position(name).ok_or_else(|| {
                GenoError::config(format!(
                    "{} method '{}' was requested but is not available for this run.",
                    self.what, name
                ))
            })?;
            if !self.sources[index].produced_data() {
                return Err(GenoError::evidence(format!(
                    "{} method '{}' was requested but could not compute any values.",
                    self.what, name
                )));
            }
            return Ok(index);
        }

        if let Some(index) = self.position(provenance::USER_SUPPLIED) {
            return Ok(index);
        }

        for name in priority {
            if let Some(index) = self.position(name) {
                if self.sources[index].produced_data() {
                    return Ok(index);
                }
                warn!("{} source '{}' produced no data; trying the next one.", self.what, name);
            }
        }

        match self.position(provenance::NONE) {
            Some(index) if policy.tolerate_none => {
                warn!("No {} evidence available; every sample is unknown.", self.what);
                Ok(index)
            }
            _ => Err(GenoError::evidence(format!(
                "No usable {} source among {:?}. Supply one or acknowledge running without it.",
                self.what, priority
            ))),
        }
    }

    pub fn selected(&self) -> Option<&dyn CovariateSource<T>> {
        self.selected.map(|i| self.sources[i].as_ref())
    }
}

impl CovariateSelector<Gender> {
    pub fn for_genders(sample_count: usize) -> Self {
        Self::new("gender", sample_count)
    }
}

impl CovariateSelector<f64> {
    pub fn for_inbred(sample_count: usize) -> Self {
        Self::new("inbred", sample_count)
    }
}
