//! Cleaning and daily resampling of irregular observations.
//!
//! The vegetation index revisit cadence is coarser than daily, so gaps are
//! filled by linear interpolation between the neighbouring valid samples.
//! Invalid samples are dropped and same-day duplicates averaged before the
//! minimum-count check.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::error::ForecastError;
use crate::types::Observation;

/// Observations resampled to one value per calendar day, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    pub dates: Vec<NaiveDate>,
    pub ndvi: Vec<f64>,
    pub temperature: Vec<f64>,
    pub precipitation: Vec<f64>,
    /// Distinct valid observation dates the series was built from
    pub valid_points: usize,
}

impl DailySeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    fn push(&mut self, date: NaiveDate, v: [f64; 3]) {
        self.dates.push(date);
        self.ndvi.push(v[0]);
        self.temperature.push(v[1]);
        self.precipitation.push(v[2]);
    }

    /// Date of the latest observation.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }
}

#[derive(Default)]
struct DayAccumulator {
    ndvi: f64,
    temperature: f64,
    precipitation: f64,
    count: u32,
}

/// Drop invalid points, average duplicates, and interpolate to a daily cadence.
///
/// Fails with [`ForecastError::DataInsufficient`] when fewer than
/// `min_valid_points` distinct valid dates remain.
pub fn clean_and_resample(
    observations: &[Observation],
    min_valid_points: usize,
) -> Result<DailySeries, ForecastError> {
    let mut by_date: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();
    let mut dropped = 0usize;
    for obs in observations {
        if !obs.is_valid() {
            dropped += 1;
            continue;
        }
        let acc = by_date.entry(obs.date).or_default();
        acc.ndvi += obs.vegetation_index;
        acc.temperature += obs.temperature;
        acc.precipitation += obs.precipitation;
        acc.count += 1;
    }

    let valid = by_date.len();
    debug!(total = observations.len(), dropped, valid, "Cleaned observation window");
    if valid < min_valid_points.max(1) {
        return Err(ForecastError::DataInsufficient {
            valid,
            required: min_valid_points,
        });
    }

    let points: Vec<(NaiveDate, [f64; 3])> = by_date
        .into_iter()
        .map(|(date, acc)| {
            let n = f64::from(acc.count);
            (date, [acc.ndvi / n, acc.temperature / n, acc.precipitation / n])
        })
        .collect();

    let mut series = DailySeries {
        dates: Vec::new(),
        ndvi: Vec::new(),
        temperature: Vec::new(),
        precipitation: Vec::new(),
        valid_points: valid,
    };

    for pair in points.windows(2) {
        let (d0, v0) = pair[0];
        let (d1, v1) = pair[1];
        let gap = (d1 - d0).num_days();
        for step in 0..gap {
            #[allow(clippy::cast_precision_loss)]
            let t = step as f64 / gap as f64;
            let value = [
                lerp(v0[0], v1[0], t),
                lerp(v0[1], v1[1], t),
                lerp(v0[2], v1[2], t),
            ];
            series.push(d0 + Duration::days(step), value);
        }
    }
    if let Some(&(date, value)) = points.last() {
        series.push(date, value);
    }

    Ok(series)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
