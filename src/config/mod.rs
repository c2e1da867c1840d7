//! Engine Configuration Module
//!
//! Engine tuning, ensemble weights and the per-crop calibration table, loaded
//! from TOML. Calibration is configuration data: adding a crop or retuning a
//! threshold never requires a code change.
//!
//! ## Loading Order
//!
//! 1. `BLOOMWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `bloom_config.toml` in the current working directory
//! 3. Built-in defaults (almond, apple, cherry)
//!
//! ## Usage
//!
//! Load once at startup and hand the result to the engine:
//!
//! ```ignore
//! let config = Arc::new(BloomConfig::load());
//! let engine = ForecastEngine::new(config, store);
//! ```

mod bloom_config;
mod calibration;
pub mod defaults;
pub mod validation;

pub use bloom_config::*;
pub use calibration::*;
