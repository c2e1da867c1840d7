//! Ensemble Predictor
//!
//! A fixed set of independently trained models sharing one capability:
//! `predict(representation) -> day_offset | failure`.
//!
//! ## Members
//!
//! | Kind           | Input            | Default weight |
//! |----------------|------------------|----------------|
//! | `tree`         | flat vector      | 0.45           |
//! | `feed_forward` | flat vector      | 0.35           |
//! | `sequence`     | daily sequence   | 0.20           |
//! | `boosted`      | flat vector      | 0 (disabled)   |
//!
//! ## Output Contract
//!
//! A member's raw output is validated before aggregation:
//! - non-finite: member failure
//! - outside `[-tolerance, 365 + tolerance]`: member failure
//! - otherwise clamped to `[0, 365]`
//!
//! Member failures are recovered locally by exclusion; only an ensemble with
//! no survivors fails the request.

pub mod aggregator;
pub mod artifacts;
pub mod baseline;
pub mod models;
pub mod store;

pub use aggregator::{offset_to_date, AggregateEstimate, Aggregator};
pub use artifacts::{
    CropModels, FsModelSource, LoadedMember, MemoryModelSource, ModelManifest, ModelSource,
    MANIFEST_FILE,
};
pub use baseline::baseline_models;
pub use models::Predictor;
pub use store::ModelStore;

use tracing::{debug, warn};

use crate::config::defaults::MAX_DAY_OFFSET;
use crate::config::EnsembleWeightsConfig;
use crate::error::InferenceError;
use crate::features::FeatureRepresentation;
use crate::types::{ModelPrediction, PredictionOutcome};

/// Runs members against a representation and applies the output contract.
#[derive(Debug, Clone)]
pub struct EnsembleRunner {
    weights: EnsembleWeightsConfig,
    tolerance_days: f64,
}

impl EnsembleRunner {
    pub const fn new(weights: EnsembleWeightsConfig, tolerance_days: f64) -> Self {
        Self {
            weights,
            tolerance_days,
        }
    }

    /// Predict with one member. Never fails: errors become a failed outcome.
    pub fn predict_member(
        &self,
        member: &LoadedMember,
        rep: &FeatureRepresentation,
    ) -> ModelPrediction {
        let outcome = match member
            .predictor
            .predict(rep)
            .and_then(|raw| validate_output(raw, self.tolerance_days))
        {
            Ok(day_offset) => {
                debug!(model = %member.model_id, day_offset, "Member prediction");
                PredictionOutcome::Ok { day_offset }
            }
            Err(e) => {
                warn!(model = %member.model_id, error = %e, "Member prediction failed, excluding");
                PredictionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        ModelPrediction {
            model_id: member.model_id.clone(),
            kind: member.kind,
            outcome,
            weight: self.weights.weight_for(member.kind),
            effective_weight: 0.0,
        }
    }

    /// Predict with every member in order.
    pub fn predict_all(&self, models: &CropModels, rep: &FeatureRepresentation) -> Vec<ModelPrediction> {
        models
            .members
            .iter()
            .map(|m| self.predict_member(m, rep))
            .collect()
    }
}

/// Apply the numeric output contract to a raw day offset.
pub fn validate_output(raw: f64, tolerance_days: f64) -> Result<f64, InferenceError> {
    if !raw.is_finite() {
        return Err(InferenceError::NonFinite);
    }
    if raw < -tolerance_days || raw > MAX_DAY_OFFSET + tolerance_days {
        return Err(InferenceError::OutOfRange { value: raw });
    }
    Ok(raw.clamp(0.0, MAX_DAY_OFFSET))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_output_contract() {
        assert_eq!(validate_output(42.0, 5.0), Ok(42.0));
        assert_eq!(validate_output(-3.0, 5.0), Ok(0.0));
        assert_eq!(validate_output(368.0, 5.0), Ok(365.0));
        assert_eq!(validate_output(f64::NAN, 5.0), Err(InferenceError::NonFinite));
        assert_eq!(validate_output(f64::INFINITY, 5.0), Err(InferenceError::NonFinite));
        assert!(matches!(
            validate_output(-40.0, 5.0),
            Err(InferenceError::OutOfRange { .. })
        ));
        assert!(matches!(
            validate_output(900.0, 5.0),
            Err(InferenceError::OutOfRange { .. })
        ));
    }
}
