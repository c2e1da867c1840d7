//! Config Validation Tests
//!
//! Typo detection, threshold monotonicity, weight and engine range checks,
//! exercised through the public config API independently from the pipeline.

use std::io::Write;

use bloomwatch::config::validation::{
    known_config_keys, suggest_correction, validate_engine_ranges, validate_unknown_keys,
};
use bloomwatch::config::{BloomConfig, ConfigError, EngineConfig};

fn validation_errors(toml_str: &str) -> Vec<String> {
    match BloomConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => errors,
        Err(other) => panic!("expected validation errors, got {other}"),
        Ok(_) => panic!("expected validation errors, config was accepted"),
    }
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_engine_key_warns_with_suggestion() {
    let toml_str = r#"
[engine]
min_valid_pionts = 20
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("min_valid_pionts"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("engine.min_valid_points")
    );
}

#[test]
fn typo_in_crop_threshold_suggests_with_crop_name() {
    let toml_str = r#"
[crops.walnut.thresholds]
dormancey = 0.3
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "crops.walnut.thresholds.dormancey");
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("crops.walnut.thresholds.dormancy")
    );
}

#[test]
fn shipped_config_produces_zero_warnings() {
    let toml_str = include_str!("../bloom_config.toml");
    let warnings = validate_unknown_keys(toml_str);
    assert!(
        warnings.is_empty(),
        "Shipped config should produce 0 warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );
}

#[test]
fn shipped_config_matches_builtin_defaults() {
    let shipped = BloomConfig::from_toml_str(include_str!("../bloom_config.toml")).unwrap();
    let builtin = BloomConfig::default();
    assert_eq!(shipped.crops, builtin.crops);
    assert_eq!(shipped.ensemble_weights, builtin.ensemble_weights);
}

#[test]
fn unknown_section_warns() {
    let toml_str = r#"
[server]
addr = "0.0.0.0:8080"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.iter().any(|w| w.field == "server"));
}

#[test]
fn typo_does_not_reject_otherwise_valid_file() {
    let config = BloomConfig::from_toml_str(
        r#"
[engine]
window_days = 120
heartbeat_intervall_ms = 250
"#,
    )
    .unwrap();
    assert_eq!(config.engine.window_days, 120);
    // The misspelled key is ignored, the default stays
    assert_eq!(config.engine.heartbeat_interval_ms, 500);
}

#[test]
fn empty_toml_produces_zero_warnings() {
    assert!(validate_unknown_keys("").is_empty());
}

#[test]
fn known_keys_cover_every_section() {
    let keys = known_config_keys();
    for key in [
        "version",
        "engine.ingestion_timeout_secs",
        "ensemble_weights.boosted",
        "crops.*.peak_doy",
        "crops.*.thresholds.seasonal_max",
    ] {
        assert!(keys.contains(key), "missing {key}");
    }
}

#[test]
fn suggest_correction_returns_none_for_garbage() {
    let known = known_config_keys();
    assert!(suggest_correction("zzzzzzzzzzzzzzzz", &known).is_none());
}

// ============================================================================
// Calibration Validation
// ============================================================================

#[test]
fn non_monotonic_thresholds_are_rejected() {
    let errors = validation_errors(
        r#"
[crops.almond]
peak_doy = 50
bloom_doy_earliest = 32
bloom_doy_latest = 118
historical_std_days = 7.0
ndvi_base = 0.30
ndvi_peak = 0.75

[crops.almond.thresholds]
seasonal_min = 0.20
dormancy = 0.65
imminent = 0.62
bloom = 0.72
seasonal_max = 0.80
"#,
    );
    assert!(
        errors.iter().any(|e| e.contains("dormancy") && e.contains("imminent")),
        "{errors:?}"
    );
}

#[test]
fn bloom_range_must_contain_peak() {
    let errors = validation_errors(
        r#"
[crops.almond]
peak_doy = 150
bloom_doy_earliest = 32
bloom_doy_latest = 118
historical_std_days = 7.0
ndvi_base = 0.30
ndvi_peak = 0.75

[crops.almond.thresholds]
seasonal_min = 0.20
dormancy = 0.35
imminent = 0.62
bloom = 0.72
seasonal_max = 0.80
"#,
    );
    assert!(errors.iter().any(|e| e.contains("day-of-year")), "{errors:?}");
}

#[test]
fn custom_crop_table_replaces_builtins() {
    let config = BloomConfig::from_toml_str(
        r#"
[crops.walnut]
peak_doy = 100
bloom_doy_earliest = 80
bloom_doy_latest = 130
historical_std_days = 5.0
ndvi_base = 0.25
ndvi_peak = 0.70

[crops.walnut.thresholds]
seasonal_min = 0.15
dormancy = 0.30
imminent = 0.55
bloom = 0.65
seasonal_max = 0.75
"#,
    )
    .unwrap();
    assert_eq!(config.crop_names(), vec!["walnut".to_string()]);
    let walnut = config.crop("walnut").unwrap();
    assert_eq!(walnut.base_temperature_c, 10.0);
    assert_eq!(walnut.bloom_duration_days, 10);
}

// ============================================================================
// Weights and Engine Ranges
// ============================================================================

#[test]
fn weights_must_sum_to_one() {
    let errors = validation_errors(
        r#"
[ensemble_weights]
tree = 0.5
feed_forward = 0.5
sequence = 0.5
"#,
    );
    assert!(errors.iter().any(|e| e.contains("sum")), "{errors:?}");
}

#[test]
fn negative_weight_is_rejected() {
    let errors = validation_errors(
        r#"
[ensemble_weights]
tree = 1.2
feed_forward = -0.2
sequence = 0.0
"#,
    );
    assert!(errors.iter().any(|e| e.contains("feed_forward")), "{errors:?}");
}

#[test]
fn zero_timeout_is_error() {
    let engine = EngineConfig {
        ingestion_timeout_secs: 0,
        ..EngineConfig::default()
    };
    let (errors, _) = validate_engine_ranges(&engine);
    assert!(errors.iter().any(|e| e.contains("ingestion_timeout_secs")));
}

#[test]
fn window_shorter_than_minimum_is_error() {
    let engine = EngineConfig {
        window_days: 20,
        min_valid_points: 30,
        ..EngineConfig::default()
    };
    let (errors, _) = validate_engine_ranges(&engine);
    assert!(errors.iter().any(|e| e.contains("window_days")));
}

#[test]
fn long_timeout_is_warning_only() {
    let engine = EngineConfig {
        ingestion_timeout_secs: 3600,
        ..EngineConfig::default()
    };
    let (errors, warnings) = validate_engine_ranges(&engine);
    assert!(errors.is_empty());
    assert_eq!(warnings.len(), 1);
}

#[test]
fn all_defaults_pass_validation() {
    BloomConfig::default().validate().unwrap();
    let (errors, warnings) = validate_engine_ranges(&EngineConfig::default());
    assert!(errors.is_empty());
    assert!(warnings.is_empty());
}

// ============================================================================
// Files and Round Trip
// ============================================================================

#[test]
fn config_roundtrip_preserves_values() {
    let mut config = BloomConfig::default();
    config.engine.ingestion_timeout_secs = 15;
    config.ensemble_weights.tree = 0.5;
    config.ensemble_weights.feed_forward = 0.3;
    let text = config.to_toml().unwrap();
    let parsed = BloomConfig::from_toml_str(&text).unwrap();
    assert_eq!(parsed.engine.ingestion_timeout_secs, 15);
    assert_eq!(parsed.ensemble_weights, config.ensemble_weights);
    assert_eq!(parsed.crops, config.crops);
}

#[test]
fn load_from_file_reports_path_on_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[engine\nwindow_days = 90").unwrap();
    let err = BloomConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = BloomConfig::load_from_file(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}
