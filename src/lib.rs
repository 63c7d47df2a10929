//! # genocall
//!
//! Genotype calling for two-allele SNP arrays from raw probe intensities.
//!
//! A run reads every intensity file exactly once into an [`intensity::IntensityStore`]
//! while gender providers observe the same pass, picks one gender and one
//! inbreeding covariate per sample, learns or loads a cluster prior, applies the
//! configured normalization stages and then calls every genotyping probeset in
//! design-file order, streaming results to the enabled report sinks.
//!
//! ## Design file
//!
//! Tab separated, `#` lines are comments:
//!
//! ```text
//! #%probe-count=6
//! probeset_id	type	allele_a_probes	allele_b_probes
//! SNP_A-1	genotyping	1,2	3,4
//! CN_1	marker	5	-
//! ```
//!
//! Probe ids are 1-based. `type` is `genotyping`, `marker` or `other`.
//!
//! ## Entry points
//!
//! [`config::RunConfig`] turns parsed [`cli::CliArgs`] into a validated,
//! immutable configuration; [`engine::GenotypeCallOrchestrator`] runs it.

pub mod cli;
pub mod config;
pub mod covariate;
pub mod em;
pub mod engine;
pub mod error;
pub mod genotype;
pub mod intensity;
pub mod layout;
pub mod prior;
pub mod quant;
pub mod report;
pub mod samples;
pub mod stats;
pub mod transform;

pub use error::{GenoError, Result};
