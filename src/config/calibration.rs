//! Per-crop calibration: seasonal vegetation index thresholds and historical
//! bloom statistics.
//!
//! Loaded once with the rest of [`super::BloomConfig`] and shared read-only
//! across requests. Built-in values cover almond, apple and cherry orchards in
//! the northern hemisphere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Thresholds
// ============================================================================

/// Seasonal vegetation index thresholds for one crop.
///
/// Must satisfy `seasonal_min < dormancy < imminent < bloom <= seasonal_max`,
/// all within [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhenologyThresholds {
    /// Typical winter floor of the index
    pub seasonal_min: f64,
    /// At or below this level the canopy is considered dormant
    pub dormancy: f64,
    /// Level at which bloom is approaching
    pub imminent: f64,
    /// Level at which the canopy is in bloom
    pub bloom: f64,
    /// Typical seasonal peak of the index
    pub seasonal_max: f64,
}

impl PhenologyThresholds {
    /// Append a message to `errors` for every ordering or range violation.
    pub(crate) fn check(&self, crop: &str, errors: &mut Vec<String>) {
        let values = [
            ("seasonal_min", self.seasonal_min),
            ("dormancy", self.dormancy),
            ("imminent", self.imminent),
            ("bloom", self.bloom),
            ("seasonal_max", self.seasonal_max),
        ];
        for (name, v) in values {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                errors.push(format!(
                    "crops.{crop}.thresholds.{name} = {v} must be a finite value in [0, 1]"
                ));
            }
        }

        for pair in values[..4].windows(2) {
            let (lo_name, lo) = pair[0];
            let (hi_name, hi) = pair[1];
            if lo >= hi {
                errors.push(format!(
                    "crops.{crop}.thresholds: {lo_name} ({lo:.3}) must be < {hi_name} ({hi:.3})"
                ));
            }
        }
        if self.bloom > self.seasonal_max {
            errors.push(format!(
                "crops.{crop}.thresholds: bloom ({:.3}) must be <= seasonal_max ({:.3})",
                self.bloom, self.seasonal_max
            ));
        }
    }
}

// ============================================================================
// Crop Calibration
// ============================================================================

/// Static calibration for one crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropCalibration {
    /// Name used in messages and the crop listing
    #[serde(default)]
    pub display_name: String,
    /// Base temperature for growing degree days (°C)
    #[serde(default = "default_base_temperature")]
    pub base_temperature_c: f64,
    /// Typical peak bloom day-of-year
    pub peak_doy: u32,
    /// Earliest historical bloom day-of-year
    pub bloom_doy_earliest: u32,
    /// Latest historical bloom day-of-year
    pub bloom_doy_latest: u32,
    /// Standard deviation of historical bloom dates (days)
    pub historical_std_days: f64,
    /// Typical bloom duration (days)
    #[serde(default = "default_bloom_duration")]
    pub bloom_duration_days: u32,
    /// Typical winter vegetation index
    pub ndvi_base: f64,
    /// Typical vegetation index at peak
    pub ndvi_peak: f64,
    /// Pollination guidance appended to recommendations
    #[serde(default)]
    pub pollination_guidance: String,
    pub thresholds: PhenologyThresholds,
}

fn default_base_temperature() -> f64 { 10.0 }
fn default_bloom_duration() -> u32 { 10 }

impl CropCalibration {
    /// Validate one crop entry. Errors are appended to `errors`.
    pub(crate) fn check(&self, crop: &str, errors: &mut Vec<String>) {
        self.thresholds.check(crop, errors);

        if !(1..=366).contains(&self.bloom_doy_earliest)
            || !(1..=366).contains(&self.bloom_doy_latest)
            || self.bloom_doy_earliest > self.peak_doy
            || self.peak_doy > self.bloom_doy_latest
        {
            errors.push(format!(
                "crops.{crop}: bloom day-of-year range must satisfy 1 <= earliest ({}) <= peak ({}) <= latest ({}) <= 366",
                self.bloom_doy_earliest, self.peak_doy, self.bloom_doy_latest
            ));
        }

        if !self.historical_std_days.is_finite() || self.historical_std_days < 0.0 {
            errors.push(format!(
                "crops.{crop}.historical_std_days = {} must be finite and >= 0",
                self.historical_std_days
            ));
        }
        if !self.base_temperature_c.is_finite() {
            errors.push(format!("crops.{crop}.base_temperature_c must be finite"));
        }
        if !(0.0..=1.0).contains(&self.ndvi_base)
            || !(0.0..=1.0).contains(&self.ndvi_peak)
            || self.ndvi_base >= self.ndvi_peak
        {
            errors.push(format!(
                "crops.{crop}: ndvi_base ({:.3}) must be < ndvi_peak ({:.3}), both in [0, 1]",
                self.ndvi_base, self.ndvi_peak
            ));
        }
    }

    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.display_name.is_empty() {
            fallback
        } else {
            &self.display_name
        }
    }
}

// ============================================================================
// Built-in Table
// ============================================================================

/// Built-in calibration table used when no configuration file defines crops.
pub fn builtin_crops() -> BTreeMap<String, CropCalibration> {
    let mut crops = BTreeMap::new();
    crops.insert(
        "almond".to_string(),
        CropCalibration {
            display_name: "Almond".to_string(),
            base_temperature_c: 10.0,
            peak_doy: 50,
            bloom_doy_earliest: 32,
            bloom_doy_latest: 118,
            historical_std_days: 7.0,
            bloom_duration_days: 14,
            ndvi_base: 0.30,
            ndvi_peak: 0.75,
            pollination_guidance: "Almonds: 1.5-2.0 hives per acre recommended".to_string(),
            thresholds: PhenologyThresholds {
                seasonal_min: 0.20,
                dormancy: 0.35,
                imminent: 0.62,
                bloom: 0.72,
                seasonal_max: 0.80,
            },
        },
    );
    crops.insert(
        "apple".to_string(),
        CropCalibration {
            display_name: "Apple".to_string(),
            base_temperature_c: 10.0,
            peak_doy: 110,
            bloom_doy_earliest: 60,
            bloom_doy_latest: 148,
            historical_std_days: 6.0,
            bloom_duration_days: 10,
            ndvi_base: 0.25,
            ndvi_peak: 0.80,
            pollination_guidance: "Apples: 1 hive per acre recommended".to_string(),
            thresholds: PhenologyThresholds {
                seasonal_min: 0.18,
                dormancy: 0.35,
                imminent: 0.65,
                bloom: 0.76,
                seasonal_max: 0.85,
            },
        },
    );
    crops.insert(
        "cherry".to_string(),
        CropCalibration {
            display_name: "Cherry".to_string(),
            base_temperature_c: 10.0,
            peak_doy: 85,
            bloom_doy_earliest: 60,
            bloom_doy_latest: 148,
            historical_std_days: 6.0,
            bloom_duration_days: 8,
            ndvi_base: 0.28,
            ndvi_peak: 0.78,
            pollination_guidance: "Cherries: 2-2.5 hives per acre recommended".to_string(),
            thresholds: PhenologyThresholds {
                seasonal_min: 0.20,
                dormancy: 0.35,
                imminent: 0.64,
                bloom: 0.74,
                seasonal_max: 0.83,
            },
        },
    );
    crops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_crops_are_valid() {
        for (name, crop) in builtin_crops() {
            let mut errors = Vec::new();
            crop.check(&name, &mut errors);
            assert!(errors.is_empty(), "{name}: {errors:?}");
        }
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let mut crop = builtin_crops().remove("almond").unwrap();
        crop.thresholds.imminent = 0.30;
        let mut errors = Vec::new();
        crop.check("almond", &mut errors);
        assert!(errors.iter().any(|e| e.contains("dormancy") && e.contains("imminent")));
    }

    #[test]
    fn test_bloom_above_seasonal_max_rejected() {
        let mut crop = builtin_crops().remove("cherry").unwrap();
        crop.thresholds.bloom = 0.90;
        let mut errors = Vec::new();
        crop.check("cherry", &mut errors);
        assert!(errors.iter().any(|e| e.contains("seasonal_max")));
    }

    #[test]
    fn test_peak_outside_bloom_range_rejected() {
        let mut crop = builtin_crops().remove("apple").unwrap();
        crop.peak_doy = 200;
        let mut errors = Vec::new();
        crop.check("apple", &mut errors);
        assert!(errors.iter().any(|e| e.contains("day-of-year")));
    }
}
