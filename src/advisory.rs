//! Operator guidance attached to full forecasts.
//!
//! Recommendations are bucketed by days until bloom, followed by the crop's
//! pollination guidance from calibration and a note on the data basis. The
//! historical comparison places the crop's typical peak day-of-year in the
//! predicted bloom year.

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::CropCalibration;

/// Ordered recommendation lines for a forecast `days_until_bloom` away.
pub fn recommendations(days_until_bloom: i64, crop: &str, calibration: &CropCalibration) -> Vec<String> {
    let name = calibration.name_or(crop);
    let mut lines: Vec<String> = if days_until_bloom < 0 {
        vec![
            format!("{name} bloom has likely already started"),
            "Verify bloom status with a field inspection".to_string(),
        ]
    } else if days_until_bloom < 7 {
        vec![
            format!("URGENT: {name} bloom expected within a week"),
            "Ensure hives are positioned in the orchard now".to_string(),
            "Monitor overnight temperatures for frost risk".to_string(),
            "Avoid irrigation and spraying during bloom".to_string(),
        ]
    } else if days_until_bloom < 14 {
        vec![
            format!("{name} bloom expected within two weeks"),
            "Contact beekeepers now to confirm delivery dates".to_string(),
            "Prepare hive placement sites".to_string(),
            "Check the extended weather forecast".to_string(),
        ]
    } else if days_until_bloom < 30 {
        vec![
            format!("{name} bloom expected within four weeks"),
            "Coordinate hive rental with beekeepers".to_string(),
            "Monitor temperature accumulation".to_string(),
            "Plan labor for the bloom period".to_string(),
        ]
    } else {
        vec![
            format!("{name} bloom expected in {days_until_bloom} days"),
            "Continue monitoring vegetation index trends".to_string(),
            "Review the forecast weekly".to_string(),
        ]
    };

    if !calibration.pollination_guidance.is_empty() {
        lines.push(calibration.pollination_guidance.clone());
    }
    lines.push("Forecast based on satellite vegetation index and climate observations".to_string());
    lines
}

/// Typical peak date in the predicted bloom year, and the prediction's shift
/// from it in days (positive = later than usual).
pub fn historical_comparison(calibration: &CropCalibration, predicted: NaiveDate) -> (NaiveDate, i64) {
    let historical = predicted.with_ordinal(1).map_or(predicted, |jan1| {
        jan1 + Duration::days(i64::from(calibration.peak_doy) - 1)
    });
    (historical, (predicted - historical).num_days())
}
