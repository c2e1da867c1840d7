//! Vegetation index variants and cumulative climate features.

use crate::config::defaults::{DRY_DAY_THRESHOLD_MM, SIMPLE_RATIO_CAP};

/// Simple ratio `(1 + v) / (1 - v)`, i.e. NIR/Red recovered from NDVI.
///
/// Diverges as v approaches 1, so it is capped.
pub fn simple_ratio(ndvi: f64) -> f64 {
    let denom = 1.0 - ndvi;
    if denom <= 0.0 {
        return SIMPLE_RATIO_CAP;
    }
    ((1.0 + ndvi) / denom).min(SIMPLE_RATIO_CAP)
}

/// Kernel NDVI with the usual `sigma = 0.5 (NIR + Red)` choice: `tanh(v²)`.
pub fn kernel_ndvi(ndvi: f64) -> f64 {
    (ndvi * ndvi).tanh()
}

/// Growing degree days for one daily mean temperature.
pub fn degree_days(temperature: f64, base_temperature: f64) -> f64 {
    (temperature - base_temperature).max(0.0)
}

/// Running sum of growing degree days over the series.
pub fn cumulative_gdd(temperatures: &[f64], base_temperature: f64) -> Vec<f64> {
    temperatures
        .iter()
        .scan(0.0, |acc, &t| {
            *acc += degree_days(t, base_temperature);
            Some(*acc)
        })
        .collect()
}

/// Total precipitation over the trailing `days` (all days if shorter).
pub fn trailing_sum(values: &[f64], days: usize) -> f64 {
    let start = values.len().saturating_sub(days);
    values[start..].iter().sum()
}

/// Consecutive dry days ending at the latest observation.
pub fn dry_spell_days(precipitation: &[f64]) -> usize {
    precipitation
        .iter()
        .rev()
        .take_while(|&&p| p < DRY_DAY_THRESHOLD_MM)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_ratio_is_capped() {
        assert!((simple_ratio(0.5) - 3.0).abs() < 1e-12);
        assert_eq!(simple_ratio(1.0), SIMPLE_RATIO_CAP);
        assert_eq!(simple_ratio(0.999), SIMPLE_RATIO_CAP);
    }

    #[test]
    fn test_kernel_ndvi_monotonic() {
        assert!(kernel_ndvi(0.3) < kernel_ndvi(0.6));
        assert_eq!(kernel_ndvi(0.0), 0.0);
    }

    #[test]
    fn test_cumulative_gdd_ignores_cold_days() {
        let gdd = cumulative_gdd(&[5.0, 12.0, 15.0], 10.0);
        assert_eq!(gdd, vec![0.0, 2.0, 7.0]);
    }

    #[test]
    fn test_dry_spell_counts_trailing_days() {
        assert_eq!(dry_spell_days(&[3.0, 0.0, 0.0, 0.0]), 3);
        assert_eq!(dry_spell_days(&[0.0, 0.0, 1.2]), 0);
        assert_eq!(trailing_sum(&[1.0, 2.0, 3.0], 2), 5.0);
        assert_eq!(trailing_sum(&[1.0, 2.0], 30), 3.0);
    }
}
