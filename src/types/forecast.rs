//! Forecast result types: per-model predictions and the two success shapes
//! (full ensemble forecast, phenology-gated estimate).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{BloomWindow, Location, PhenologyStage};

/// Ensemble member variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Recurrent model over the raw daily sequence
    Sequence,
    /// Random forest of regression trees over the flat vector
    Tree,
    /// Dense feed-forward network over the flat vector
    FeedForward,
    /// Gradient boosted trees over the flat vector (optional member)
    Boosted,
}

impl ModelKind {
    pub const ALL: [Self; 4] = [Self::Sequence, Self::Tree, Self::FeedForward, Self::Boosted];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Tree => "tree",
            Self::FeedForward => "feed_forward",
            Self::Boosted => "boosted",
        }
    }

    /// Artifact file name inside a crop's model directory.
    pub fn artifact_file(self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one ensemble member produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionOutcome {
    /// Days from the observation date to predicted bloom, within [0, 365]
    Ok { day_offset: f64 },
    /// Member failed individually and is excluded from aggregation
    Failed { reason: String },
}

/// One ensemble member's output, kept for transparency/debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_id: String,
    pub kind: ModelKind,
    #[serde(flatten)]
    pub outcome: PredictionOutcome,
    /// Configured base weight
    pub weight: f64,
    /// Weight actually applied after renormalizing over survivors (0 if failed)
    #[serde(default)]
    pub effective_weight: f64,
}

impl ModelPrediction {
    pub fn day_offset(&self) -> Option<f64> {
        match self.outcome {
            PredictionOutcome::Ok { day_offset } => Some(day_offset),
            PredictionOutcome::Failed { .. } => None,
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self.outcome, PredictionOutcome::Ok { .. })
    }
}

/// A dated vegetation index value echoed back for charting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Phenology context attached to a full forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenologyContext {
    pub stage: PhenologyStage,
    pub confidence: f64,
    pub message: String,
}

/// Full ensemble forecast. Invariant:
/// `confidence_low_date <= predicted_bloom_date <= confidence_high_date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub can_predict_bloom: bool,
    pub crop_type: String,
    pub location: Location,
    /// Date of the latest observation; day offsets are relative to it
    pub observation_date: NaiveDate,
    pub predicted_bloom_date: NaiveDate,
    pub confidence_low_date: NaiveDate,
    pub confidence_high_date: NaiveDate,
    pub days_until_bloom: i64,
    pub agreement_score: f64,
    pub individual_predictions: Vec<ModelPrediction>,
    pub vegetation_index_trend: Vec<TrendPoint>,
    pub phenology: PhenologyContext,
    pub recommendations: Vec<String>,
    /// Typical bloom date for this crop in the predicted bloom year
    pub historical_peak_date: NaiveDate,
    /// Predicted date minus the historical typical date (days)
    pub days_shift: i64,
}

/// Phenology-gated result: no numeric forecast, only a calibrated window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenologyOnlyResult {
    pub can_predict_bloom: bool,
    pub crop_type: String,
    pub location: Location,
    pub observation_date: NaiveDate,
    pub phenology_stage: PhenologyStage,
    pub phenology_confidence: f64,
    pub phenology_message: String,
    pub estimated_bloom_window: Option<BloomWindow>,
}

/// Successful terminal payload of a forecast request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForecastOutcome {
    Predicted(Box<EnsembleResult>),
    Gated(PhenologyOnlyResult),
}

impl ForecastOutcome {
    pub const fn can_predict_bloom(&self) -> bool {
        matches!(self, Self::Predicted(_))
    }

    pub fn phenology_stage(&self) -> PhenologyStage {
        match self {
            Self::Predicted(result) => result.phenology.stage,
            Self::Gated(result) => result.phenology_stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_outcome_flattens() {
        let prediction = ModelPrediction {
            model_id: "almond/tree".to_string(),
            kind: ModelKind::Tree,
            outcome: PredictionOutcome::Ok { day_offset: 21.5 },
            weight: 0.45,
            effective_weight: 0.45,
        };
        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["day_offset"], 21.5);
        assert_eq!(json["kind"], "tree");
    }

    #[test]
    fn test_failed_prediction_has_no_offset() {
        let prediction = ModelPrediction {
            model_id: "almond/sequence".to_string(),
            kind: ModelKind::Sequence,
            outcome: PredictionOutcome::Failed {
                reason: "non-finite output".to_string(),
            },
            weight: 0.2,
            effective_weight: 0.0,
        };
        assert!(prediction.day_offset().is_none());
        assert!(!prediction.is_ok());
    }

    #[test]
    fn test_artifact_file_names() {
        assert_eq!(ModelKind::FeedForward.artifact_file(), "feed_forward.json");
        assert_eq!(ModelKind::Sequence.artifact_file(), "sequence.json");
    }
}
