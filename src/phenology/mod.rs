//! Phenology Classifier
//!
//! Deterministic growth-stage classification from the trailing vegetation
//! index trend, and the gate that decides whether a numeric forecast is valid.
//!
//! ## Decision
//!
//! Over the trailing `phenology_window_days` of the daily series:
//! - `level` = mean index, `slope` = least-squares slope per day
//! - `|slope| <= flat_slope_per_day` is flat
//!
//! | Level                      | Declining  | Otherwise                            |
//! |----------------------------|------------|--------------------------------------|
//! | `>= bloom`                 | post_bloom | bloom                                |
//! | `>= imminent`              | post_bloom | bloom_imminent                       |
//! | `> dormancy`               | post_bloom | pre_bloom_growth                     |
//! | `<= dormancy`              | dormant    | pre_bloom_growth if rising, dormant  |
//!
//! Only `pre_bloom_growth` and `bloom_imminent` open the gate. Every other
//! stage gets a bloom window estimated from the crop's historical
//! day-of-year range instead of a model forecast.
//!
//! No state is carried between calls.

use chrono::{Datelike, Duration, NaiveDate};
use tracing::debug;

use crate::config::{CropCalibration, EngineConfig, PhenologyThresholds};
use crate::features::{linear_slope, rolling::trailing};
use crate::types::{
    BloomWindow, PhenologyAssessment, PhenologyStage, TrendDirection, WindowConfidence,
};

/// Stage classifier for one engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct PhenologyClassifier {
    window_days: usize,
    flat_slope_per_day: f64,
}

impl PhenologyClassifier {
    pub const fn new(window_days: usize, flat_slope_per_day: f64) -> Self {
        Self {
            window_days,
            flat_slope_per_day,
        }
    }

    pub const fn from_engine(engine: &EngineConfig) -> Self {
        Self::new(engine.phenology_window_days, engine.flat_slope_per_day)
    }

    /// Classify the daily index series ending on `observation_date`.
    pub fn classify(
        &self,
        ndvi: &[f64],
        observation_date: NaiveDate,
        calibration: &CropCalibration,
    ) -> PhenologyAssessment {
        let recent = trailing(ndvi, self.window_days);
        #[allow(clippy::cast_precision_loss)]
        let level = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f64>() / recent.len() as f64
        };
        let slope = linear_slope(recent);
        let current = ndvi.last().copied().unwrap_or(level);

        let trend = if slope.abs() <= self.flat_slope_per_day {
            TrendDirection::Flat
        } else if slope > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Declining
        };

        let t = &calibration.thresholds;
        let stage = stage_for(level, trend, t);
        let confidence = band_confidence(level, t);

        let estimated_bloom_window = if stage.permits_forecast() {
            None
        } else {
            bloom_window(stage, observation_date, calibration)
        };

        let message = stage_message(stage, current, slope, estimated_bloom_window.as_ref());

        debug!(
            stage = %stage,
            level,
            slope,
            trend = %trend,
            confidence,
            "Classified phenology stage"
        );

        PhenologyAssessment {
            stage,
            confidence,
            message,
            index_level: level,
            current_index: current,
            slope_per_day: slope,
            trend,
            estimated_bloom_window,
        }
    }
}

fn stage_for(level: f64, trend: TrendDirection, t: &PhenologyThresholds) -> PhenologyStage {
    // Any decline above dormancy means the peak has passed.
    if trend == TrendDirection::Declining && level > t.dormancy {
        return PhenologyStage::PostBloom;
    }
    if level >= t.bloom {
        PhenologyStage::Bloom
    } else if level >= t.imminent {
        PhenologyStage::BloomImminent
    } else if level > t.dormancy || trend == TrendDirection::Rising {
        PhenologyStage::PreBloomGrowth
    } else {
        PhenologyStage::Dormant
    }
}

/// Normalized distance from `level` to the nearest edge of its band.
///
/// Bands: `[seasonal_min, dormancy]`, `(dormancy, imminent)`,
/// `[imminent, bloom)`, `[bloom, seasonal_max]`. Outside the outer edges the
/// classification is unambiguous and confidence is 1.
fn band_confidence(level: f64, t: &PhenologyThresholds) -> f64 {
    if level <= t.seasonal_min || level >= t.seasonal_max {
        return 1.0;
    }
    let edges = [t.seasonal_min, t.dormancy, t.imminent, t.bloom, t.seasonal_max];
    let Some(band) = edges.windows(2).find(|w| level >= w[0] && level <= w[1]) else {
        return 1.0;
    };
    let half_width = (band[1] - band[0]) / 2.0;
    if half_width <= 0.0 {
        return 1.0;
    }
    let distance = (level - band[0]).min(band[1] - level);
    (distance / half_width).clamp(0.0, 1.0)
}

/// Historical bloom window padded by variance, in the season relevant to `stage`.
fn bloom_window(
    stage: PhenologyStage,
    observation_date: NaiveDate,
    calibration: &CropCalibration,
) -> Option<BloomWindow> {
    #[allow(clippy::cast_possible_truncation)]
    let pad = calibration.historical_std_days.ceil().max(0.0) as i64;
    let earliest_offset = i64::from(calibration.bloom_doy_earliest) - 1 - pad;
    let latest_offset = i64::from(calibration.bloom_doy_latest) - 1 + pad;

    let year = observation_date.year();
    let window_in = |y: i32| {
        let jan1 = NaiveDate::from_ymd_opt(y, 1, 1)?;
        Some((
            jan1 + Duration::days(earliest_offset),
            jan1 + Duration::days(latest_offset),
        ))
    };

    let (earliest, latest) = (year - 1..=year + 1)
        .filter_map(window_in)
        .find(|&(start, end)| match stage {
            PhenologyStage::PostBloom => start > observation_date,
            _ => end >= observation_date,
        })?;

    let confidence = match stage {
        PhenologyStage::Bloom => WindowConfidence::High,
        _ => WindowConfidence::Low,
    };

    Some(BloomWindow {
        earliest,
        latest,
        confidence,
    })
}

fn stage_message(
    stage: PhenologyStage,
    current: f64,
    slope: f64,
    window: Option<&BloomWindow>,
) -> String {
    let window_text = window.map_or_else(String::new, |w| {
        format!(" Expected bloom window: {} to {}.", w.earliest, w.latest)
    });
    match stage {
        PhenologyStage::Dormant => format!(
            "Canopy is dormant (NDVI {current:.2}, no sustained green-up). A numeric forecast is not meaningful yet.{window_text}"
        ),
        PhenologyStage::PreBloomGrowth => format!(
            "Canopy is greening up (NDVI {current:.2}, {slope:+.4}/day). Bloom forecast available."
        ),
        PhenologyStage::BloomImminent => format!(
            "NDVI {current:.2} is approaching the seasonal peak. Bloom is imminent."
        ),
        PhenologyStage::Bloom => format!(
            "NDVI {current:.2} is at the seasonal peak. The crop is likely in bloom now.{window_text}"
        ),
        PhenologyStage::PostBloom => format!(
            "NDVI {current:.2} is declining from the seasonal peak. Bloom has likely passed for this season.{window_text}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_crops;

    fn almond() -> CropCalibration {
        builtin_crops().remove("almond").unwrap()
    }

    fn classifier() -> PhenologyClassifier {
        PhenologyClassifier::new(30, 0.001)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn linear(from: f64, to: f64, days: usize) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let step = (to - from) / (days - 1) as f64;
        (0..days).map(|i| from + step * i as f64).collect()
    }

    #[test]
    fn test_stage_table_edges() {
        let t = builtin_crops().remove("almond").unwrap().thresholds;
        let stage = |level, trend| stage_for(level, trend, &t);

        assert_eq!(stage(t.bloom, TrendDirection::Declining), PhenologyStage::PostBloom);
        assert_eq!(stage(t.imminent, TrendDirection::Flat), PhenologyStage::BloomImminent);
        assert_eq!(stage(t.bloom, TrendDirection::Rising), PhenologyStage::Bloom);
        // At or below dormancy a decline is still winter
        assert_eq!(stage(t.dormancy, TrendDirection::Declining), PhenologyStage::Dormant);
        assert_eq!(stage(t.dormancy, TrendDirection::Rising), PhenologyStage::PreBloomGrowth);
    }

    #[test]
    fn test_rising_mid_level_is_pre_bloom_growth() {
        let series = linear(0.30, 0.60, 90);
        let a = classifier().classify(&series, date(2025, 1, 20), &almond());
        assert_eq!(a.stage, PhenologyStage::PreBloomGrowth);
        assert_eq!(a.trend, TrendDirection::Rising);
        assert!(a.can_predict());
        assert!(a.estimated_bloom_window.is_none());
    }

    #[test]
    fn test_flat_winter_is_dormant_with_window() {
        let series = vec![0.28; 90];
        let a = classifier().classify(&series, date(2024, 12, 15), &almond());
        assert_eq!(a.stage, PhenologyStage::Dormant);
        assert!(!a.can_predict());
        let window = a.estimated_bloom_window.unwrap();
        // doy 32 - 7 and doy 118 + 7 of the coming season
        assert_eq!(window.earliest, date(2025, 1, 25));
        assert_eq!(window.latest, date(2025, 5, 5));
        assert_eq!(window.confidence, WindowConfidence::Low);
        assert!(a.message.contains("0.28"));
    }

    #[test]
    fn test_flat_mid_level_is_pre_bloom_growth() {
        let series = vec![0.50; 60];
        let a = classifier().classify(&series, date(2025, 1, 20), &almond());
        assert_eq!(a.stage, PhenologyStage::PreBloomGrowth);
    }

    #[test]
    fn test_high_rising_is_bloom_imminent() {
        let series = linear(0.55, 0.70, 60);
        let a = classifier().classify(&series, date(2025, 2, 5), &almond());
        assert_eq!(a.stage, PhenologyStage::BloomImminent);
        assert!(a.can_predict());
    }

    #[test]
    fn test_peak_is_bloom_with_high_confidence_window() {
        let series = vec![0.76; 60];
        let a = classifier().classify(&series, date(2025, 2, 20), &almond());
        assert_eq!(a.stage, PhenologyStage::Bloom);
        let window = a.estimated_bloom_window.unwrap();
        assert_eq!(window.confidence, WindowConfidence::High);
        assert!(window.earliest <= date(2025, 2, 20) && window.latest >= date(2025, 2, 20));
    }

    #[test]
    fn test_declining_is_post_bloom_next_season() {
        let series = linear(0.78, 0.60, 60);
        let a = classifier().classify(&series, date(2025, 5, 1), &almond());
        assert_eq!(a.stage, PhenologyStage::PostBloom);
        let window = a.estimated_bloom_window.unwrap();
        assert!(window.earliest > date(2025, 5, 1));
        assert_eq!(window.earliest.year(), 2026);
    }

    #[test]
    fn test_rising_below_dormancy_is_growth() {
        let series = linear(0.22, 0.34, 30);
        let a = classifier().classify(&series, date(2025, 1, 10), &almond());
        assert_eq!(a.stage, PhenologyStage::PreBloomGrowth);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let series = linear(0.40, 0.65, 75);
        let a = classifier().classify(&series, date(2025, 2, 1), &almond());
        let b = classifier().classify(&series, date(2025, 2, 1), &almond());
        assert_eq!(a.stage, b.stage);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.message, b.message);
    }

    #[test]
    fn test_confidence_peaks_mid_band() {
        let t = almond().thresholds;
        let mid = (t.dormancy + t.imminent) / 2.0;
        assert!((band_confidence(mid, &t) - 1.0).abs() < 1e-9);
        assert!(band_confidence(t.dormancy + 0.001, &t) < 0.05);
        assert_eq!(band_confidence(0.05, &t), 1.0);
        for level in [0.21, 0.3, 0.5, 0.7, 0.79] {
            let c = band_confidence(level, &t);
            assert!((0.0..=1.0).contains(&c));
        }
    }
}
