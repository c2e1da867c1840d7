//! Progress protocol events exchanged between the pipeline and its consumer.

use serde::{Deserialize, Serialize};

use super::ForecastOutcome;
use crate::error::ErrorKind;

/// Pipeline stage tag carried by each progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Ingestion,
    Features,
    Phenology,
    Ensemble,
    Aggregation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Ingestion => "ingestion",
            Self::Features => "features",
            Self::Phenology => "phenology",
            Self::Ensemble => "ensemble",
            Self::Aggregation => "aggregation",
        };
        f.write_str(s)
    }
}

/// Non-terminal status update. `percent` never decreases within a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
    pub stage: Stage,
}

/// Terminal error payload with a stable kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything a consumer can observe on a forecast stream.
///
/// Zero or more `Progress` events followed by exactly one of `Completed`
/// or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Completed { result: ForecastOutcome },
    Failed { error: ErrorReport },
}

impl PipelineEvent {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}
