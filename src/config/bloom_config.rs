//! Root configuration document: engine tuning, ensemble weights, and the
//! per-crop calibration table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::calibration::{builtin_crops, CropCalibration};
use super::defaults;
use crate::types::ModelKind;

// ============================================================================
// Root Config
// ============================================================================

/// Complete engine configuration. Wrapped in `Arc` and passed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Calibration table version
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub ensemble_weights: EnsembleWeightsConfig,

    /// Per-crop calibration. A file that defines `[crops.*]` replaces the
    /// built-in table entirely.
    #[serde(default = "builtin_crops")]
    pub crops: BTreeMap<String, CropCalibration>,
}

fn default_version() -> u32 { 1 }

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            engine: EngineConfig::default(),
            ensemble_weights: EnsembleWeightsConfig::default(),
            crops: builtin_crops(),
        }
    }
}

impl BloomConfig {
    /// Load configuration using the standard search order:
    /// 1. `$BLOOMWATCH_CONFIG` environment variable
    /// 2. `./bloom_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), crops = config.crops.len(), "Loaded config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(crops = config.crops.len(), "Loaded config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::ParseStr(inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys are logged as warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(ConfigError::ParseStr)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn crop(&self, name: &str) -> Option<&CropCalibration> {
        self.crops.get(name)
    }

    pub fn crop_names(&self) -> Vec<String> {
        self.crops.keys().cloned().collect()
    }

    /// Validate the whole document for internal consistency.
    ///
    /// Rules:
    /// - Crop thresholds strictly increasing, bloom day-of-year range ordered
    /// - Ensemble weights non-negative, summing to ~1.0, at least one positive
    /// - Engine sizes and multipliers positive
    /// - No NaN/Inf anywhere
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if !defaults::SUPPORTED_CONFIG_VERSIONS.contains(&self.version) {
            errors.push(format!(
                "version {} is not supported (supported: {:?})",
                self.version,
                defaults::SUPPORTED_CONFIG_VERSIONS
            ));
        }

        if self.crops.is_empty() {
            errors.push("crops: at least one crop must be calibrated".to_string());
        }
        for (name, crop) in &self.crops {
            crop.check(name, &mut errors);
        }

        self.ensemble_weights.check(&mut errors);

        let (range_errors, range_warnings) = super::validation::validate_engine_ranges(&self.engine);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if let Some(path) = first_non_finite(self) {
            errors.push(format!(
                "{path}: config contains NaN or Inf, all values must be finite numbers"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Sweep every float in the serialized document for NaN/Inf.
fn first_non_finite(config: &BloomConfig) -> Option<String> {
    fn walk(value: &toml::Value, path: &str) -> Option<String> {
        match value {
            toml::Value::Float(f) if !f.is_finite() => Some(path.to_string()),
            toml::Value::Table(table) => table.iter().find_map(|(k, v)| {
                let child = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                walk(v, &child)
            }),
            toml::Value::Array(items) => items.iter().find_map(|v| walk(v, path)),
            _ => None,
        }
    }
    let value = toml::Value::try_from(config).ok()?;
    walk(&value, "")
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config parse error: {0}")]
    ParseStr(#[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Config validation failed:\n{}", format_errors(.0))]
    Validation(Vec<String>),
}

fn format_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Engine
// ============================================================================

/// Operator-tunable pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trailing window requested from the ingestion adapter (days)
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Minimum valid observations after cleaning
    #[serde(default = "default_min_valid_points")]
    pub min_valid_points: usize,

    /// Upper bound on the ingestion wait (seconds)
    #[serde(default = "default_ingestion_timeout_secs")]
    pub ingestion_timeout_secs: u64,

    /// Interval between progress heartbeats while ingestion is outstanding (ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Trailing days used by the phenology classifier
    #[serde(default = "default_phenology_window_days")]
    pub phenology_window_days: usize,

    /// Slopes with magnitude at or below this are flat (index units per day)
    #[serde(default = "default_flat_slope_per_day")]
    pub flat_slope_per_day: f64,

    /// Tolerance before a model output outside [0, 365] becomes a failure (days)
    #[serde(default = "default_out_of_range_tolerance_days")]
    pub out_of_range_tolerance_days: f64,

    /// Interval half-width multiplier applied to inter-model spread
    #[serde(default = "default_confidence_multiplier")]
    pub confidence_multiplier: f64,

    /// Spread at which agreement falls to 0.5 (days)
    #[serde(default = "default_agreement_scale_days")]
    pub agreement_scale_days: f64,

    /// Root directory holding `<crop>/manifest.json` model artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
}

fn default_window_days() -> u32 { 90 }
fn default_min_valid_points() -> usize { 30 }
fn default_ingestion_timeout_secs() -> u64 { 60 }
fn default_heartbeat_interval_ms() -> u64 { 500 }
fn default_phenology_window_days() -> usize { 30 }
fn default_flat_slope_per_day() -> f64 { 0.001 }
fn default_out_of_range_tolerance_days() -> f64 { 5.0 }
fn default_confidence_multiplier() -> f64 { 1.96 }
fn default_agreement_scale_days() -> f64 { 10.0 }
fn default_model_dir() -> PathBuf { PathBuf::from("models") }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_valid_points: default_min_valid_points(),
            ingestion_timeout_secs: default_ingestion_timeout_secs(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            phenology_window_days: default_phenology_window_days(),
            flat_slope_per_day: default_flat_slope_per_day(),
            out_of_range_tolerance_days: default_out_of_range_tolerance_days(),
            confidence_multiplier: default_confidence_multiplier(),
            agreement_scale_days: default_agreement_scale_days(),
            model_dir: default_model_dir(),
        }
    }
}

// ============================================================================
// Ensemble Weights
// ============================================================================

/// Base weight per ensemble member. Renormalized over survivors at
/// aggregation time. A weight of 0 disables the member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeightsConfig {
    #[serde(default = "default_weight_tree")]
    pub tree: f64,
    #[serde(default = "default_weight_feed_forward")]
    pub feed_forward: f64,
    #[serde(default = "default_weight_sequence")]
    pub sequence: f64,
    #[serde(default)]
    pub boosted: f64,
}

fn default_weight_tree() -> f64 { 0.45 }
fn default_weight_feed_forward() -> f64 { 0.35 }
fn default_weight_sequence() -> f64 { 0.20 }

impl Default for EnsembleWeightsConfig {
    fn default() -> Self {
        Self {
            tree: default_weight_tree(),
            feed_forward: default_weight_feed_forward(),
            sequence: default_weight_sequence(),
            boosted: 0.0,
        }
    }
}

impl EnsembleWeightsConfig {
    pub const fn weight_for(&self, kind: ModelKind) -> f64 {
        match kind {
            ModelKind::Sequence => self.sequence,
            ModelKind::Tree => self.tree,
            ModelKind::FeedForward => self.feed_forward,
            ModelKind::Boosted => self.boosted,
        }
    }

    /// Members with a positive weight, in fixed iteration order.
    pub fn enabled(&self) -> Vec<(ModelKind, f64)> {
        ModelKind::ALL
            .iter()
            .map(|&k| (k, self.weight_for(k)))
            .filter(|&(_, w)| w > 0.0)
            .collect()
    }

    fn check(&self, errors: &mut Vec<String>) {
        let mut sum = 0.0;
        for kind in ModelKind::ALL {
            let w = self.weight_for(kind);
            if !w.is_finite() || w < 0.0 {
                errors.push(format!("ensemble_weights.{kind} = {w} must be finite and >= 0"));
            }
            sum += w;
        }
        if !(0.99..=1.01).contains(&sum) {
            errors.push(format!("ensemble_weights must sum to ~1.0, got {sum:.3}"));
        }
        if self.enabled().is_empty() {
            errors.push("ensemble_weights: at least one member must have a positive weight".to_string());
        }
    }
}
