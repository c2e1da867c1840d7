//! Error taxonomy for the forecasting pipeline.
//!
//! Every stage failure maps to exactly one [`ForecastError`], and every
//! [`ForecastError`] maps to exactly one stable [`ErrorKind`] that is carried
//! in the terminal error event. Single-model failures ([`InferenceError`]) are
//! recovered locally by the ensemble and only surface as
//! [`ForecastError::EnsembleFailure`] when no member survives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ErrorReport;

/// Stable, serializable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataInsufficient,
    ModelNotFound,
    ModelLoadFailed,
    EnsembleFailure,
    Timeout,
    UnknownCrop,
    IngestionFailed,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataInsufficient => "data_insufficient",
            Self::ModelNotFound => "model_not_found",
            Self::ModelLoadFailed => "model_load_failed",
            Self::EnsembleFailure => "ensemble_failure",
            Self::Timeout => "timeout",
            Self::UnknownCrop => "unknown_crop",
            Self::IngestionFailed => "ingestion_failed",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-level failure. Never retried inside the engine.
///
/// `Clone` so one failed model load can be handed to every request that was
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ForecastError {
    #[error("insufficient data: {valid} valid observations after cleaning, at least {required} required")]
    DataInsufficient { valid: usize, required: usize },

    #[error("no trained models for crop '{crop}'; run the model bootstrap step first")]
    ModelNotFound { crop: String },

    #[error("failed to load models for crop '{crop}': {source}")]
    ModelLoadFailed {
        crop: String,
        #[source]
        source: ArtifactError,
    },

    #[error("all {attempted} ensemble members failed: {}", .failures.join("; "))]
    EnsembleFailure {
        attempted: usize,
        failures: Vec<String>,
    },

    #[error("ingestion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("unknown crop '{crop}' (calibrated crops: {})", .known.join(", "))]
    UnknownCrop { crop: String, known: Vec<String> },

    #[error("ingestion from '{source_name}' failed: {message}")]
    IngestionFailed { source_name: String, message: String },

    /// The pipeline task died (panicked) before reaching a terminal event.
    #[error("forecast aborted: {message}")]
    Internal { message: String },
}

impl ForecastError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DataInsufficient { .. } => ErrorKind::DataInsufficient,
            Self::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            Self::ModelLoadFailed { .. } => ErrorKind::ModelLoadFailed,
            Self::EnsembleFailure { .. } => ErrorKind::EnsembleFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UnknownCrop { .. } => ErrorKind::UnknownCrop,
            Self::IngestionFailed { .. } => ErrorKind::IngestionFailed,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Model artifact could not be read or is inconsistent.
#[derive(Debug, Clone, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("malformed artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("artifact is for crop '{found}', expected '{expected}'")]
    CropMismatch { expected: String, found: String },

    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid {kind} model: {reason}")]
    Invalid { kind: String, reason: String },
}

/// A single ensemble member's failure. Recovered by exclusion.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("model output is not finite")]
    NonFinite,

    #[error("model output {value:.1} days is outside the plausible range")]
    OutOfRange { value: f64 },

    #[error("input has {actual} features, model expects {expected}")]
    InputShape { expected: usize, actual: usize },

    #[error("sequence has {actual} days, model needs {required}")]
    SequenceTooShort { required: usize, actual: usize },
}
