//! Feature Engineering
//!
//! Turns a window of raw observations into the fixed-shape representation the
//! ensemble was trained on.
//!
//! ## Stages
//!
//! 1. **Cleaning / resampling** (`resample`): drop invalid samples, average
//!    duplicate dates, interpolate to a daily cadence
//! 2. **Derived channels** (`indices`): simple ratio, kernel NDVI, growing
//!    degree days above the crop base temperature
//! 3. **Window statistics** (`rolling`): mean/std/min/max/percentiles over
//!    7/14/30/60-day trailing windows, rates of change, trend slope
//!
//! ## Feature Order
//!
//! The flat vector order is versioned by [`FEATURE_SCHEMA_VERSION`]. Names and
//! values are produced by the same code path (`assemble`), so they cannot
//! drift apart. Model artifacts record the names they were trained on and are
//! rejected at load time if they differ.

pub mod indices;
pub mod resample;
pub mod rolling;

use std::f64::consts::TAU;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::config::defaults::{CHANGE_HORIZONS, PRECIP_TOTAL_WINDOW_DAYS, ROLLING_WINDOWS};
use crate::config::CropCalibration;
use crate::error::ForecastError;
use crate::types::Observation;

pub use crate::config::defaults::FEATURE_SCHEMA_VERSION;
pub use resample::{clean_and_resample, DailySeries};
pub use rolling::linear_slope;

/// Per-day channels of the sequence input, in order.
pub const SEQUENCE_CHANNELS: [&str; 3] = ["ndvi", "temperature", "precipitation"];

/// Model-ready representation of one observation window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRepresentation {
    pub schema_version: u32,
    pub names: Vec<String>,
    /// Flat vector for the non-sequential models, aligned with `names`
    pub flat: Vec<f64>,
    /// Every resampled day as `[ndvi, temperature, precipitation]`, oldest first
    pub sequence: Vec<[f64; 3]>,
}

impl FeatureRepresentation {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.flat[i])
    }
}

/// Resampled series plus the representation built from it.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub series: DailySeries,
    pub representation: FeatureRepresentation,
    /// Date of the latest observation; the origin of every day offset
    pub observation_date: NaiveDate,
}

/// Builds [`FeatureSet`]s for a fixed minimum-data policy.
#[derive(Debug, Clone, Copy)]
pub struct FeatureEngineer {
    min_valid_points: usize,
}

impl FeatureEngineer {
    pub const fn new(min_valid_points: usize) -> Self {
        Self { min_valid_points }
    }

    /// Clean, resample and featurize one observation window.
    pub fn build(
        &self,
        observations: &[Observation],
        calibration: &CropCalibration,
    ) -> Result<FeatureSet, ForecastError> {
        let series = clean_and_resample(observations, self.min_valid_points)?;
        let observation_date = series.last_date().ok_or(ForecastError::DataInsufficient {
            valid: 0,
            required: self.min_valid_points,
        })?;

        let mut vector = FeatureVector::default();
        assemble(&series, calibration.base_temperature_c, &mut vector);

        let sequence = series
            .ndvi
            .iter()
            .zip(&series.temperature)
            .zip(&series.precipitation)
            .map(|((&n, &t), &p)| [n, t, p])
            .collect();

        debug!(
            days = series.len(),
            valid_points = series.valid_points,
            features = vector.values.len(),
            "Built feature representation"
        );

        Ok(FeatureSet {
            representation: FeatureRepresentation {
                schema_version: FEATURE_SCHEMA_VERSION,
                names: vector.names,
                flat: vector.values,
                sequence,
            },
            series,
            observation_date,
        })
    }
}

/// Flat feature names for the current schema version, in order.
pub fn feature_names() -> Vec<String> {
    let date = NaiveDate::MIN;
    let series = DailySeries {
        dates: vec![date],
        ndvi: vec![0.0],
        temperature: vec![0.0],
        precipitation: vec![0.0],
        valid_points: 1,
    };
    let mut vector = FeatureVector::default();
    assemble(&series, 0.0, &mut vector);
    vector.names
}

// ============================================================================
// Assembly
// ============================================================================

#[derive(Debug, Default)]
struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    fn push(&mut self, name: impl Into<String>, value: f64) {
        self.names.push(name.into());
        self.values.push(value);
    }
}

/// Emit every feature of the current schema in order.
fn assemble(series: &DailySeries, base_temperature: f64, out: &mut FeatureVector) {
    let ndvi = &series.ndvi;
    let temp = &series.temperature;
    let precip = &series.precipitation;

    let current_ndvi = ndvi.last().copied().unwrap_or(0.0);
    let current_temp = temp.last().copied().unwrap_or(0.0);
    let current_precip = precip.last().copied().unwrap_or(0.0);

    // current values
    out.push("ndvi", current_ndvi);
    out.push("sr", indices::simple_ratio(current_ndvi));
    out.push("kndvi", indices::kernel_ndvi(current_ndvi));
    out.push("temperature", current_temp);
    out.push("precipitation", current_precip);

    // seasonality
    let doy = series.last_date().map_or(1, |d| d.ordinal());
    let doy = f64::from(doy);
    out.push("day_of_year", doy);
    out.push("sin_doy", (TAU * doy / 365.25).sin());
    out.push("cos_doy", (TAU * doy / 365.25).cos());

    // climate accumulation
    let gdd = indices::cumulative_gdd(temp, base_temperature);
    out.push("gdd_cumulative", gdd.last().copied().unwrap_or(0.0));
    out.push(
        "precip_total_30d",
        indices::trailing_sum(precip, PRECIP_TOTAL_WINDOW_DAYS),
    );
    #[allow(clippy::cast_precision_loss)]
    out.push("dry_spell_days", indices::dry_spell_days(precip) as f64);

    for w in ROLLING_WINDOWS {
        let s = rolling::WindowStats::compute(rolling::trailing(ndvi, w));
        out.push(format!("ndvi_mean_{w}d"), s.mean);
        out.push(format!("ndvi_std_{w}d"), s.std);
        out.push(format!("ndvi_min_{w}d"), s.min);
        out.push(format!("ndvi_max_{w}d"), s.max);
        out.push(format!("ndvi_p25_{w}d"), s.p25);
        out.push(format!("ndvi_p75_{w}d"), s.p75);
        out.push(format!("ndvi_p90_{w}d"), s.p90);
    }

    for w in ROLLING_WINDOWS {
        let (mean, std) = rolling::WindowStats::mean_std(rolling::trailing(temp, w));
        out.push(format!("temperature_mean_{w}d"), mean);
        out.push(format!("temperature_std_{w}d"), std);
    }

    for h in CHANGE_HORIZONS {
        out.push(format!("ndvi_change_{h}d"), rolling::change_over(ndvi, h));
    }
    out.push("ndvi_acceleration", rolling::acceleration(ndvi, 7));

    out.push("ndvi_slope_30d", linear_slope(rolling::trailing(ndvi, 30)));
    out.push("ndvi_slope_window", linear_slope(ndvi));

    out.push("temperature_change_14d", rolling::change_over(temp, 14));
}
