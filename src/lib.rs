//! BloomWatch: bloom-date forecasting
//!
//! Forecasts a crop's bloom date from a trailing window of vegetation index and
//! climate observations.
//!
//! ## Architecture
//!
//! - **Features**: daily resampling, index variants, rolling statistics, versioned schema
//! - **Phenology**: deterministic growth-stage classifier and forecast gate
//! - **Ensemble**: sequence / tree / feed-forward / boosted members, single-flight model store
//! - **Aggregator**: renormalized weighted estimate, interval and agreement score
//! - **Pipeline**: ingestion with timeout and heartbeat, progress stream, terminal event

pub mod advisory;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod phenology;
pub mod pipeline;
pub mod types;

// Re-export configuration
pub use config::{BloomConfig, CropCalibration};

// Re-export errors
pub use error::{ErrorKind, ForecastError};

// Re-export the engine surface
pub use ensemble::{FsModelSource, MemoryModelSource, ModelSource, ModelStore};
pub use pipeline::{ForecastEngine, ForecastStream, ObservationSource};

// Re-export commonly used types
pub use types::{
    EnsembleResult, ForecastOutcome, ForecastRequest, Observation, PhenologyOnlyResult,
    PhenologyStage, PipelineEvent,
};
