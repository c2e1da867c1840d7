//! Forecast Pipeline
//!
//! ## Stage Order
//!
//! ```text
//! STAGE 1: Ingestion      (5-35%, heartbeats while the source is outstanding)
//! STAGE 2: Features       (40-50%)
//! STAGE 3: Phenology gate (55%)
//! STAGE 4: Model loading  (60%)  ONLY if the gate is open
//! STAGE 5: Ensemble       (65-85%, one step per member)
//! STAGE 6: Aggregation    (90%)
//! ```
//!
//! CRITICAL GUARANTEE: stages 4-6 ONLY execute for `pre_bloom_growth` and
//! `bloom_imminent`. Every other stage returns the phenology-only result.
//!
//! Each request ends with exactly one terminal event (`completed` or `failed`)
//! unless the consumer has already dropped its stream.

mod engine;
pub mod progress;
pub mod source;

pub use engine::{calibration_for, ForecastEngine};
pub use progress::{Disconnected, ForecastStream, ProgressReporter};
pub use source::{CsvSource, ObservationSource, StaticSource, SyntheticPattern, SyntheticSource};
