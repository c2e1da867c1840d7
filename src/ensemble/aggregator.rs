//! Combines surviving member predictions into a point estimate, confidence
//! interval and agreement score.
//!
//! ```text
//! w_i       = base_i / Σ base_surviving
//! point     = Σ w_i · d_i
//! spread    = population std-dev of surviving d_i
//! agreement = 1 - spread / (spread + scale)
//! interval  = point ± multiplier · spread
//! ```
//!
//! Agreement is exactly 1 when every survivor agrees and strictly decreases
//! as spread grows.

use chrono::{Duration, NaiveDate};
use statrs::statistics::Statistics;
use tracing::debug;

use crate::config::defaults::MAX_DAY_OFFSET;
use crate::config::EngineConfig;
use crate::error::ForecastError;
use crate::types::{ModelPrediction, PredictionOutcome};

/// Aggregated ensemble estimate, still expressed as day offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEstimate {
    pub day_offset: f64,
    pub low_offset: f64,
    pub high_offset: f64,
    pub spread_days: f64,
    pub agreement_score: f64,
    /// Every member's prediction, survivors carrying their renormalized weight
    pub predictions: Vec<ModelPrediction>,
}

impl AggregateEstimate {
    pub fn survivors(&self) -> usize {
        self.predictions.iter().filter(|p| p.is_ok()).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    confidence_multiplier: f64,
    agreement_scale_days: f64,
}

impl Aggregator {
    pub const fn new(confidence_multiplier: f64, agreement_scale_days: f64) -> Self {
        Self {
            confidence_multiplier,
            agreement_scale_days,
        }
    }

    pub const fn from_engine(engine: &EngineConfig) -> Self {
        Self::new(engine.confidence_multiplier, engine.agreement_scale_days)
    }

    /// Fails with [`ForecastError::EnsembleFailure`] when nothing survived.
    pub fn aggregate(
        &self,
        mut predictions: Vec<ModelPrediction>,
    ) -> Result<AggregateEstimate, ForecastError> {
        let surviving: Vec<(f64, f64)> = predictions
            .iter()
            .filter_map(|p| p.day_offset().map(|d| (d, p.weight)))
            .collect();
        let total_weight: f64 = surviving.iter().map(|&(_, w)| w).sum();

        if surviving.is_empty() || total_weight <= 1e-10 {
            let failures = predictions
                .iter()
                .map(|p| match &p.outcome {
                    PredictionOutcome::Failed { reason } => format!("{}: {reason}", p.model_id),
                    PredictionOutcome::Ok { .. } => format!("{}: zero weight", p.model_id),
                })
                .collect();
            return Err(ForecastError::EnsembleFailure {
                attempted: predictions.len(),
                failures,
            });
        }

        // Re-normalise over survivors
        for p in &mut predictions {
            p.effective_weight = if p.is_ok() {
                p.weight / total_weight
            } else {
                0.0
            };
        }

        let day_offset: f64 = surviving.iter().map(|&(d, w)| d * w / total_weight).sum();
        let spread_days = if surviving.len() > 1 {
            surviving.iter().map(|&(d, _)| d).population_std_dev()
        } else {
            0.0
        };
        let agreement_score = agreement(spread_days, self.agreement_scale_days);
        let margin = self.confidence_multiplier * spread_days;

        debug!(
            survivors = surviving.len(),
            day_offset,
            spread_days,
            agreement_score,
            "Aggregated ensemble"
        );

        Ok(AggregateEstimate {
            day_offset,
            low_offset: day_offset - margin,
            high_offset: day_offset + margin,
            spread_days,
            agreement_score,
            predictions,
        })
    }
}

/// `1 - spread / (spread + scale)`, clamped to [0, 1].
pub fn agreement(spread_days: f64, scale_days: f64) -> f64 {
    if !spread_days.is_finite() || spread_days < 0.0 {
        return 0.0;
    }
    (1.0 - spread_days / (spread_days + scale_days)).clamp(0.0, 1.0)
}

/// Calendar date `offset` days after `origin`. Offsets are rounded and clamped
/// to [0, 365]; both steps are monotone so interval ordering is preserved.
#[allow(clippy::cast_possible_truncation)]
pub fn offset_to_date(origin: NaiveDate, offset: f64) -> NaiveDate {
    let days = offset.round().clamp(0.0, MAX_DAY_OFFSET) as i64;
    origin + Duration::days(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelKind;

    fn ok(kind: ModelKind, d: f64, w: f64) -> ModelPrediction {
        ModelPrediction {
            model_id: format!("almond/{kind}"),
            kind,
            outcome: PredictionOutcome::Ok { day_offset: d },
            weight: w,
            effective_weight: 0.0,
        }
    }

    fn failed(kind: ModelKind, w: f64) -> ModelPrediction {
        ModelPrediction {
            model_id: format!("almond/{kind}"),
            kind,
            outcome: PredictionOutcome::Failed {
                reason: "model output is not finite".to_string(),
            },
            weight: w,
            effective_weight: 0.0,
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(1.96, 10.0)
    }

    #[test]
    fn test_full_ensemble_uses_base_weights() {
        let est = aggregator()
            .aggregate(vec![
                ok(ModelKind::Tree, 20.0, 0.45),
                ok(ModelKind::FeedForward, 30.0, 0.35),
                ok(ModelKind::Sequence, 40.0, 0.20),
            ])
            .unwrap();
        assert!((est.day_offset - 27.5).abs() < 1e-9);
        let weights: Vec<f64> = est.predictions.iter().map(|p| p.effective_weight).collect();
        assert!((weights[0] - 0.45).abs() < 1e-12);
        assert!((weights[1] - 0.35).abs() < 1e-12);
        assert!((weights[2] - 0.20).abs() < 1e-12);
    }

    #[test]
    fn test_failed_member_excluded_and_weights_renormalized() {
        let est = aggregator()
            .aggregate(vec![
                ok(ModelKind::Tree, 20.0, 0.45),
                ok(ModelKind::FeedForward, 30.0, 0.35),
                failed(ModelKind::Sequence, 0.20),
            ])
            .unwrap();
        let sum: f64 = est.predictions.iter().map(|p| p.effective_weight).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((est.predictions[0].effective_weight - 0.5625).abs() < 1e-12);
        assert_eq!(est.predictions[2].effective_weight, 0.0);
        // Spread over the two survivors only: std(20, 30) = 5
        assert!((est.spread_days - 5.0).abs() < 1e-12);
        assert!((est.agreement_score - (1.0 - 5.0 / 15.0)).abs() < 1e-12);
        assert_eq!(est.survivors(), 2);
    }

    #[test]
    fn test_all_failed_is_ensemble_failure() {
        let err = aggregator()
            .aggregate(vec![
                failed(ModelKind::Tree, 0.45),
                failed(ModelKind::FeedForward, 0.35),
                failed(ModelKind::Sequence, 0.20),
            ])
            .unwrap_err();
        match err {
            ForecastError::EnsembleFailure { attempted, failures } => {
                assert_eq!(attempted, 3);
                assert_eq!(failures.len(), 3);
            }
            other => panic!("expected EnsembleFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_predictions_agree_fully() {
        let est = aggregator()
            .aggregate(vec![
                ok(ModelKind::Tree, 25.0, 0.45),
                ok(ModelKind::FeedForward, 25.0, 0.35),
            ])
            .unwrap();
        assert_eq!(est.agreement_score, 1.0);
        assert_eq!(est.low_offset, est.high_offset);
    }

    #[test]
    fn test_agreement_strictly_decreases_with_spread() {
        let mut previous = agreement(0.0, 10.0);
        assert_eq!(previous, 1.0);
        for spread in [0.5, 1.0, 2.0, 5.0, 10.0, 50.0, 200.0] {
            let a = agreement(spread, 10.0);
            assert!(a < previous, "spread {spread}");
            assert!((0.0..=1.0).contains(&a));
            previous = a;
        }
    }

    #[test]
    fn test_interval_brackets_point() {
        let est = aggregator()
            .aggregate(vec![
                ok(ModelKind::Tree, 2.0, 0.45),
                ok(ModelKind::FeedForward, 40.0, 0.35),
                ok(ModelKind::Sequence, 360.0, 0.20),
            ])
            .unwrap();
        let origin = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        let low = offset_to_date(origin, est.low_offset);
        let mid = offset_to_date(origin, est.day_offset);
        let high = offset_to_date(origin, est.high_offset);
        assert!(low <= mid && mid <= high);
        // low margin exceeds the point, so it clamps to the origin
        assert_eq!(low, origin);
        assert_eq!(high, origin + Duration::days(365));
    }
}
