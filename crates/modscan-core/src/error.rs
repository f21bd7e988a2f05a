//! Error taxonomy for the scanning pipeline.
//!
//! Most of these are absorbed inside the pipeline and only surface in logs:
//! a bad container degrades to a zero vector, a bad entry is skipped, a
//! failed decompile falls back to direct container analysis. Only model and
//! configuration errors are fatal, and only at startup.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid archive: {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("cannot decode entry {entry}: {message}")]
    Decode { entry: String, message: String },

    #[error("{tool} failed: {message}")]
    ExternalToolFailure { tool: String, message: String },

    #[error("feature schema mismatch: missing {missing:?}, extra {extra:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("invalid model: {message}")]
    Model { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("scan cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    pub fn format<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn decode<E: Into<String>, S: Into<String>>(entry: E, message: S) -> Self {
        Self::Decode {
            entry: entry.into(),
            message: message.into(),
        }
    }

    pub fn external_tool<T: Into<String>, S: Into<String>>(tool: T, message: S) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn model<S: Into<String>>(message: S) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Errors the pipeline degrades around instead of failing the scan.
    pub fn is_absorbed(&self) -> bool {
        matches!(
            self,
            Self::Format { .. }
                | Self::Decode { .. }
                | Self::ExternalToolFailure { .. }
                | Self::SchemaMismatch { .. }
        )
    }
}
