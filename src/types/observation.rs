//! Observation and request types supplied by the ingestion side.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One dated remote-sensing + climate sample.
///
/// Produced by an ingestion adapter and never mutated afterwards. The
/// vegetation index revisit cadence is coarser than daily, so consecutive
/// observations may be several days apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    /// Normalized vegetation index (NDVI), expected in [0, 1]
    pub vegetation_index: f64,
    /// Daily mean air temperature (°C)
    pub temperature: f64,
    /// Daily precipitation (mm)
    pub precipitation: f64,
}

impl Observation {
    pub const fn new(
        date: NaiveDate,
        vegetation_index: f64,
        temperature: f64,
        precipitation: f64,
    ) -> Self {
        Self {
            date,
            vegetation_index,
            temperature,
            precipitation,
        }
    }

    /// Whether this sample can be used for feature engineering.
    pub fn is_valid(&self) -> bool {
        self.vegetation_index.is_finite()
            && self.temperature.is_finite()
            && self.precipitation.is_finite()
            && (0.0..=1.0).contains(&self.vegetation_index)
            && self.precipitation >= 0.0
    }
}

/// Farm coordinates. Echoed back in results, never used for computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// A forecast request as handed to the engine by the serving layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub crop_type: String,
    pub location: Location,
    /// Trailing window length to request from the ingestion adapter (days)
    pub window_days: u32,
}

impl ForecastRequest {
    pub fn new(crop_type: impl Into<String>, lat: f64, lon: f64, window_days: u32) -> Self {
        Self {
            crop_type: crop_type.into(),
            location: Location { lat, lon },
            window_days,
        }
    }
}

/// Ordered observations covering the trailing window, as returned by an
/// ingestion adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub observations: Vec<Observation>,
}

impl ObservationWindow {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
