//! System-wide default constants.
//!
//! Centralises magic numbers used across the pipeline. Operator-tunable values
//! live in [`super::EngineConfig`]; these are fixed by the feature schema or the
//! progress protocol.

// ============================================================================
// Configuration
// ============================================================================

/// Environment variable holding the path to the configuration file.
pub const CONFIG_ENV_VAR: &str = "BLOOMWATCH_CONFIG";

/// Configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "bloom_config.toml";

/// Calibration table versions this build understands.
pub const SUPPORTED_CONFIG_VERSIONS: &[u32] = &[1];

// ============================================================================
// Feature Engineering
// ============================================================================

/// Version of the flat feature order. Bump whenever names or order change.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Trailing windows for rolling statistics (days).
pub const ROLLING_WINDOWS: [usize; 4] = [7, 14, 30, 60];

/// Horizons for vegetation index rates of change (days).
pub const CHANGE_HORIZONS: [usize; 3] = [7, 14, 30];

/// Upper bound for the simple ratio index; `(1+v)/(1-v)` diverges as v → 1.
pub const SIMPLE_RATIO_CAP: f64 = 50.0;

/// Trailing window for accumulated precipitation (days).
pub const PRECIP_TOTAL_WINDOW_DAYS: usize = 30;

/// Precipitation below this counts as a dry day (mm).
pub const DRY_DAY_THRESHOLD_MM: f64 = 0.1;

// ============================================================================
// Results
// ============================================================================

/// Number of trailing daily index points echoed in a full result.
pub const TREND_POINTS: usize = 30;

/// Largest valid day offset.
pub const MAX_DAY_OFFSET: f64 = 365.0;

// ============================================================================
// Progress Protocol
// ============================================================================

/// Capacity of the per-request progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Highest percent a heartbeat may report while ingestion is outstanding.
pub const INGESTION_HEARTBEAT_CEILING: u8 = 34;
