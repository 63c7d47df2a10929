//! The four-way genotype call shared by callers, covariate providers and sinks.

use std::fmt;

/// A biallelic genotype call. Integer codes follow the usual table
/// convention: 0 = AA, 1 = AB, 2 = BB, -1 = no call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenotypeCall {
    AA,
    AB,
    BB,
    NoCall,
}

impl GenotypeCall {
    pub fn code(self) -> i8 {
        match self {
            GenotypeCall::AA => 0,
            GenotypeCall::AB => 1,
            GenotypeCall::BB => 2,
            GenotypeCall::NoCall => -1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(GenotypeCall::AA),
            1 => Some(GenotypeCall::AB),
            2 => Some(GenotypeCall::BB),
            -1 => Some(GenotypeCall::NoCall),
            _ => None,
        }
    }

    /// Cluster index 0..3 on the contrast axis, ordered BB, AB, AA.
    pub(crate) fn from_cluster(cluster: usize) -> Self {
        match cluster {
            0 => GenotypeCall::BB,
            1 => GenotypeCall::AB,
            2 => GenotypeCall::AA,
            _ => GenotypeCall::NoCall,
        }
    }

    pub fn is_call(self) -> bool {
        self != GenotypeCall::NoCall
    }

    pub fn is_het(self) -> bool {
        self == GenotypeCall::AB
    }

    pub fn is_hom(self) -> bool {
        matches!(self, GenotypeCall::AA | GenotypeCall::BB)
    }
}

impl fmt::Display for GenotypeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenotypeCall::AA => "AA",
            GenotypeCall::AB => "AB",
            GenotypeCall::BB => "BB",
            GenotypeCall::NoCall => "NoCall",
        };
        f.write_str(s)
    }
}

/// Tally of called genotypes used by the het-rate gender rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallTally {
    pub n_aa: usize,
    pub n_ab: usize,
    pub n_bb: usize,
    pub n_nc: usize,
}

impl CallTally {
    pub fn add(&mut self, call: GenotypeCall) {
        match call {
            GenotypeCall::AA => self.n_aa += 1,
            GenotypeCall::AB => self.n_ab += 1,
            GenotypeCall::BB => self.n_bb += 1,
            GenotypeCall::NoCall => self.n_nc += 1,
        }
    }

    pub fn called(&self) -> usize {
        self.n_aa + self.n_ab + self.n_bb
    }

    pub fn total(&self) -> usize {
        self.called() + self.n_nc
    }

    /// Heterozygous fraction among called entries, `None` when nothing was called.
    pub fn het_rate(&self) -> Option<f64> {
        let called = self.called();
        if called == 0 {
            None
        } else {
            Some(self.n_ab as f64 / called as f64)
        }
    }
}
