//! Error types shared by every stage of a genotyping run.
//!
//! Fatal conditions travel as [`GenoError`]. A failure inside a single
//! probeset computation is a [`crate::quant::ComputeError`] instead and never
//! leaves the dispatch loop.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for genotyping runs.
#[derive(Error, Debug)]
pub enum GenoError {
    /// Missing files, contradictory options, unknown method names.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed text input.
    #[error("Parse error in {} at line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Corrupt inputs, order violations, count mismatches, duplicate entries.
    #[error("Data integrity error: {message}")]
    DataIntegrity { message: String },

    /// A provider the user explicitly asked for could not classify the samples.
    #[error("Insufficient evidence: {message}")]
    Evidence { message: String },

    /// Disk full, unwritable output directory.
    #[error("Resource error: {message}")]
    Resource { message: String },

    /// Model fitting could not produce usable parameters.
    #[error("Model error: {message}")]
    Model { message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results using GenoError
pub type Result<T> = std::result::Result<T, GenoError>;

impl GenoError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse(path: impl AsRef<Path>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            line,
            message: message.into(),
        }
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
        }
    }

    pub fn evidence(message: impl Into<String>) -> Self {
        Self::Evidence {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
