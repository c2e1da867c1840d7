//! Config validation: unknown-key detection with Levenshtein suggestions
//! and engine range checks.
//!
//! Two-pass parse: the raw TOML is first walked as a `toml::Value` tree and
//! every key path is compared against the known field names, emitting warnings
//! with "did you mean?" suggestions. Serde deserialization runs afterwards.
//! Warnings never break an otherwise valid file.

use std::collections::HashSet;

use super::EngineConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Placeholder segment standing in for any crop name under `[crops]`.
const CROP_WILDCARD: &str = "*";

/// Unknown keys further than this from every known key get no suggestion.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Returns the set of valid dotted key paths for `BloomConfig`.
///
/// Crop-specific keys use `*` in place of the crop name. Any new field added to
/// the config structs must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "version",
        // [engine]
        "engine",
        "engine.window_days",
        "engine.min_valid_points",
        "engine.ingestion_timeout_secs",
        "engine.heartbeat_interval_ms",
        "engine.phenology_window_days",
        "engine.flat_slope_per_day",
        "engine.out_of_range_tolerance_days",
        "engine.confidence_multiplier",
        "engine.agreement_scale_days",
        "engine.model_dir",
        // [ensemble_weights]
        "ensemble_weights",
        "ensemble_weights.tree",
        "ensemble_weights.feed_forward",
        "ensemble_weights.sequence",
        "ensemble_weights.boosted",
        // [crops.<name>]
        "crops",
        "crops.*",
        "crops.*.display_name",
        "crops.*.base_temperature_c",
        "crops.*.peak_doy",
        "crops.*.bloom_doy_earliest",
        "crops.*.bloom_doy_latest",
        "crops.*.historical_std_days",
        "crops.*.bloom_duration_days",
        "crops.*.ndvi_base",
        "crops.*.ndvi_peak",
        "crops.*.pollination_guidance",
        // [crops.<name>.thresholds]
        "crops.*.thresholds",
        "crops.*.thresholds.seasonal_min",
        "crops.*.thresholds.dormancy",
        "crops.*.thresholds.imminent",
        "crops.*.thresholds.bloom",
        "crops.*.thresholds.seasonal_max",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Dotted paths of every key in a parsed document, tables included.
/// `{ a = { b = 1 } }` gives `["a", "a.b"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut out = Vec::new();
    collect_paths(value, prefix, &mut out);
    out
}

fn collect_paths(value: &toml::Value, prefix: &str, out: &mut Vec<String>) {
    let Some(table) = value.as_table() else {
        return;
    };
    for (name, child) in table {
        let path = match prefix {
            "" => name.clone(),
            _ => format!("{prefix}.{name}"),
        };
        out.push(path.clone());
        collect_paths(child, &path, out);
    }
}

/// Replace the crop name segment with the wildcard: `crops.almond.peak_doy`
/// becomes `crops.*.peak_doy`.
fn normalize_key(key: &str) -> String {
    let mut parts: Vec<&str> = key.split('.').collect();
    if parts.len() >= 2 && parts[0] == "crops" {
        parts[1] = CROP_WILDCARD;
    }
    parts.join(".")
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Edit distance (insert, delete, substitute) over chars, single-row DP.
fn levenshtein(a: &str, b: &str) -> usize {
    let target: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=target.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in target.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (above + 1)
                .min(row[j] + 1)
                .min(diagonal + usize::from(ca != cb));
            diagonal = above;
        }
    }
    row[target.len()]
}

/// Closest known key within [`MAX_SUGGESTION_DISTANCE`] edits. Ties resolve
/// alphabetically so the suggestion is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|&(dist, _)| dist <= MAX_SUGGESTION_DISTANCE)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Never fails: parse errors are reported later by serde.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        let normalized = normalize_key(&key);
        if known.contains(normalized.as_str()) {
            continue;
        }
        // Suggest with the real crop name restored.
        let suggestion = suggest_correction(&normalized, &known).map(|s| {
            match key.split('.').nth(1) {
                Some(crop) if key.starts_with("crops.") => s.replacen(CROP_WILDCARD, crop, 1),
                _ => s,
            }
        });
        warnings.push(ValidationWarning {
            message: format!("Unknown config key '{key}'"),
            field: key,
            suggestion,
        });
    }

    warnings
}

// ============================================================================
// Engine Range Validation
// ============================================================================

/// Validate engine settings.
///
/// Returns (errors, warnings): errors are impossible values that must reject
/// the file; warnings are suspicious but usable.
pub fn validate_engine_ranges(engine: &EngineConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if engine.min_valid_points < 2 {
        errors.push(format!(
            "engine.min_valid_points = {} must be >= 2 (a trend needs two points)",
            engine.min_valid_points
        ));
    }
    if (engine.window_days as usize) < engine.min_valid_points {
        errors.push(format!(
            "engine.window_days ({}) must be >= min_valid_points ({})",
            engine.window_days, engine.min_valid_points
        ));
    }
    if engine.ingestion_timeout_secs == 0 {
        errors.push("engine.ingestion_timeout_secs must be > 0".to_string());
    }
    if engine.heartbeat_interval_ms == 0 {
        errors.push("engine.heartbeat_interval_ms must be > 0".to_string());
    }
    if engine.phenology_window_days < 2 {
        errors.push(format!(
            "engine.phenology_window_days = {} must be >= 2",
            engine.phenology_window_days
        ));
    }
    if engine.flat_slope_per_day < 0.0 {
        errors.push("engine.flat_slope_per_day cannot be negative".to_string());
    }
    if engine.out_of_range_tolerance_days < 0.0 {
        errors.push("engine.out_of_range_tolerance_days cannot be negative".to_string());
    }
    if engine.confidence_multiplier <= 0.0 {
        errors.push(format!(
            "engine.confidence_multiplier = {:.3} must be > 0",
            engine.confidence_multiplier
        ));
    }
    if engine.agreement_scale_days <= 0.0 {
        errors.push(format!(
            "engine.agreement_scale_days = {:.3} must be > 0 (used as divisor)",
            engine.agreement_scale_days
        ));
    }

    if engine.ingestion_timeout_secs > 600 {
        warnings.push(ValidationWarning {
            field: "engine.ingestion_timeout_secs".to_string(),
            message: format!(
                "ingestion_timeout_secs = {} is unusually long for an interactive request",
                engine.ingestion_timeout_secs
            ),
            suggestion: None,
        });
    }
    if engine.flat_slope_per_day > 0.01 {
        warnings.push(ValidationWarning {
            field: "engine.flat_slope_per_day".to_string(),
            message: format!(
                "flat_slope_per_day = {:.4} treats most seasonal green-up as flat",
                engine.flat_slope_per_day
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("dormancy", "dormancy"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("dormacy", "dormancy"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [crops.almond.thresholds]
            bloom = 0.72
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"crops".to_string()));
        assert!(keys.contains(&"crops.almond".to_string()));
        assert!(keys.contains(&"crops.almond.thresholds.bloom".to_string()));
    }

    #[test]
    fn test_any_crop_name_is_known() {
        let toml_str = r#"
[crops.pistachio]
peak_doy = 100

[crops.pistachio.thresholds]
dormancy = 0.3
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_typo_in_crop_key_suggests_real_crop_path() {
        let toml_str = r#"
[crops.almond.thresholds]
dormacy = 0.35
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("crops.almond.thresholds.dormancy")
        );
    }

    #[test]
    fn test_typo_engine_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[engine]
min_valid_pionts = 30
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("engine.min_valid_points")
        );
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_engine_defaults_clean() {
        let (errors, warnings) = validate_engine_ranges(&EngineConfig::default());
        assert!(errors.is_empty(), "{errors:?}");
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_window_smaller_than_minimum_is_error() {
        let engine = EngineConfig {
            window_days: 20,
            ..EngineConfig::default()
        };
        let (errors, _) = validate_engine_ranges(&engine);
        assert!(errors.iter().any(|e| e.contains("window_days")));
    }

    #[test]
    fn test_zero_agreement_scale_is_error() {
        let engine = EngineConfig {
            agreement_scale_days: 0.0,
            ..EngineConfig::default()
        };
        let (errors, _) = validate_engine_ranges(&engine);
        assert!(errors.iter().any(|e| e.contains("agreement_scale_days")));
    }
}
