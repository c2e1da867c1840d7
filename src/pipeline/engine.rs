//! Forecast engine: one sequential pipeline per request.
//!
//! ```text
//! ingestion ─▶ features ─▶ phenology gate ─┬─▶ models ─▶ members ─▶ aggregate ─▶ Predicted
//!   (timeout, heartbeat)                   └─▶ Gated (phenology-only result)
//! ```
//!
//! The engine holds only read-only shared state (`Arc<BloomConfig>` and the
//! model store), so concurrent requests never contend on anything but the
//! first load of a crop's models.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::progress::{Disconnected, ForecastStream, ProgressReporter};
use super::source::ObservationSource;
use crate::advisory;
use crate::config::defaults::{INGESTION_HEARTBEAT_CEILING, PROGRESS_CHANNEL_CAPACITY, TREND_POINTS};
use crate::config::{BloomConfig, CropCalibration};
use crate::ensemble::{offset_to_date, Aggregator, EnsembleRunner, FsModelSource, ModelStore};
use crate::error::ForecastError;
use crate::features::FeatureEngineer;
use crate::phenology::PhenologyClassifier;
use crate::types::{
    EnsembleResult, ForecastOutcome, ForecastRequest, ObservationWindow, PhenologyContext,
    PhenologyOnlyResult, Stage, TrendPoint,
};

/// Why a pipeline run stopped before producing an outcome.
#[derive(Debug)]
enum Interrupt {
    /// Consumer dropped the stream; abandon without a terminal event
    Disconnected,
    Failed(ForecastError),
}

impl From<Disconnected> for Interrupt {
    fn from(_: Disconnected) -> Self {
        Self::Disconnected
    }
}

impl From<ForecastError> for Interrupt {
    fn from(e: ForecastError) -> Self {
        Self::Failed(e)
    }
}

/// Shared, cheaply clonable entry point for forecasts.
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    config: Arc<BloomConfig>,
    store: Arc<ModelStore>,
}

impl ForecastEngine {
    pub const fn new(config: Arc<BloomConfig>, store: Arc<ModelStore>) -> Self {
        Self { config, store }
    }

    /// Engine backed by artifacts under `engine.model_dir`.
    pub fn from_config(config: Arc<BloomConfig>) -> Self {
        let source = Arc::new(FsModelSource::new(config.engine.model_dir.clone()));
        let store = Arc::new(ModelStore::new(source, &config.ensemble_weights));
        Self::new(config, store)
    }

    pub fn config(&self) -> &BloomConfig {
        &self.config
    }

    pub const fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Start a forecast on a background task and return its event stream.
    ///
    /// Dropping the stream cancels the request at its next progress point.
    pub fn forecast(
        &self,
        request: ForecastRequest,
        source: Arc<dyn ObservationSource>,
    ) -> ForecastStream {
        let (mut reporter, stream) = ProgressReporter::channel(PROGRESS_CHANNEL_CAPACITY);
        let engine = self.clone();
        let span = info_span!(
            "forecast",
            request_id = %Uuid::new_v4(),
            crop = %request.crop_type,
            source = source.source_name(),
        );

        let guard = reporter.abort_guard();
        let work = tokio::spawn(
            async move {
                match engine.execute(&request, source.as_ref(), &mut reporter).await {
                    Ok(outcome) => {
                        info!(can_predict = outcome.can_predict_bloom(), "Forecast complete");
                        if reporter.finish(Ok(outcome)).await.is_err() {
                            debug!("Consumer gone before terminal event");
                        }
                    }
                    Err(Interrupt::Failed(e)) => {
                        warn!(kind = %e.kind(), error = %e, "Forecast failed");
                        if reporter.finish(Err(e)).await.is_err() {
                            debug!("Consumer gone before terminal event");
                        }
                    }
                    Err(Interrupt::Disconnected) => {
                        info!("Consumer disconnected, abandoning forecast");
                    }
                }
            }
            .instrument(span.clone()),
        );

        // A panic anywhere in the pipeline still ends the stream with one
        // terminal event.
        tokio::spawn(
            async move {
                if let Err(join_err) = work.await {
                    let e = ForecastError::Internal {
                        message: join_err.to_string(),
                    };
                    error!(error = %e, "Forecast task died");
                    guard.fail(&e).await;
                }
            }
            .instrument(span),
        );

        stream
    }

    /// Run a forecast to completion without progress events.
    pub async fn run(
        &self,
        request: &ForecastRequest,
        source: &dyn ObservationSource,
    ) -> Result<ForecastOutcome, ForecastError> {
        let span = info_span!(
            "forecast",
            request_id = %Uuid::new_v4(),
            crop = %request.crop_type,
            source = source.source_name(),
        );
        let mut reporter = ProgressReporter::silent();
        match self.execute(request, source, &mut reporter).instrument(span).await {
            Ok(outcome) => Ok(outcome),
            Err(Interrupt::Failed(e)) => Err(e),
            // A silent reporter has no consumer to lose
            Err(Interrupt::Disconnected) => Err(ForecastError::Internal {
                message: "silent reporter reported a disconnect".to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        request: &ForecastRequest,
        source: &dyn ObservationSource,
        reporter: &mut ProgressReporter,
    ) -> Result<ForecastOutcome, Interrupt> {
        let engine = &self.config.engine;
        reporter
            .progress(0, Stage::Start, format!("Starting {} forecast", request.crop_type))
            .await?;

        let crop = request.crop_type.as_str();
        let calibration = calibration_for(&self.config, crop)?;

        // ── Ingestion ──────────────────────────────────────────────────────
        let window = self.ingest(request, source, reporter).await?;

        // ── Features ───────────────────────────────────────────────────────
        reporter
            .progress(40, Stage::Features, "Cleaning and resampling observations")
            .await?;
        let features =
            FeatureEngineer::new(engine.min_valid_points).build(&window.observations, calibration)?;
        reporter
            .progress(
                50,
                Stage::Features,
                format!(
                    "Built {} features from {} days",
                    features.representation.flat.len(),
                    features.series.len()
                ),
            )
            .await?;

        // ── Phenology gate ─────────────────────────────────────────────────
        let assessment = PhenologyClassifier::from_engine(engine).classify(
            &features.series.ndvi,
            features.observation_date,
            calibration,
        );
        info!(
            stage = %assessment.stage,
            confidence = assessment.confidence,
            level = assessment.index_level,
            slope = assessment.slope_per_day,
            "Phenology classified"
        );
        reporter
            .progress(55, Stage::Phenology, assessment.message.clone())
            .await?;

        if !assessment.can_predict() {
            return Ok(ForecastOutcome::Gated(PhenologyOnlyResult {
                can_predict_bloom: false,
                crop_type: request.crop_type.clone(),
                location: request.location,
                observation_date: features.observation_date,
                phenology_stage: assessment.stage,
                phenology_confidence: assessment.confidence,
                phenology_message: assessment.message,
                estimated_bloom_window: assessment.estimated_bloom_window,
            }));
        }

        // ── Ensemble ───────────────────────────────────────────────────────
        reporter
            .progress(60, Stage::Ensemble, "Loading crop models")
            .await?;
        let models = self.store.get(crop).await?;

        let runner = EnsembleRunner::new(
            self.config.ensemble_weights.clone(),
            engine.out_of_range_tolerance_days,
        );
        let total = models.members.len();
        reporter
            .progress(65, Stage::Ensemble, format!("Running {total} ensemble members"))
            .await?;
        let mut predictions = Vec::with_capacity(total);
        for (i, member) in models.members.iter().enumerate() {
            let prediction = runner.predict_member(member, &features.representation);
            let message = match prediction.day_offset() {
                Some(d) => format!("{}: {d:.1} days", member.kind),
                None => format!("{}: excluded", member.kind),
            };
            predictions.push(prediction);
            reporter
                .progress(member_percent(i + 1, total), Stage::Ensemble, message)
                .await?;
        }

        // ── Aggregation ────────────────────────────────────────────────────
        reporter
            .progress(90, Stage::Aggregation, "Aggregating ensemble predictions")
            .await?;
        let estimate = Aggregator::from_engine(engine).aggregate(predictions)?;

        let origin = features.observation_date;
        let predicted = offset_to_date(origin, estimate.day_offset);
        let days_until_bloom = (predicted - origin).num_days();
        let (historical_peak_date, days_shift) =
            advisory::historical_comparison(calibration, predicted);

        let trend = trend_points(&features.series.dates, &features.series.ndvi);

        info!(
            predicted = %predicted,
            days_until_bloom,
            agreement = estimate.agreement_score,
            survivors = estimate.survivors(),
            "Ensemble forecast"
        );

        Ok(ForecastOutcome::Predicted(Box::new(EnsembleResult {
            can_predict_bloom: true,
            crop_type: request.crop_type.clone(),
            location: request.location,
            observation_date: origin,
            predicted_bloom_date: predicted,
            confidence_low_date: offset_to_date(origin, estimate.low_offset),
            confidence_high_date: offset_to_date(origin, estimate.high_offset),
            days_until_bloom,
            agreement_score: estimate.agreement_score,
            individual_predictions: estimate.predictions,
            vegetation_index_trend: trend,
            phenology: PhenologyContext {
                stage: assessment.stage,
                confidence: assessment.confidence,
                message: assessment.message,
            },
            recommendations: advisory::recommendations(days_until_bloom, crop, calibration),
            historical_peak_date,
            days_shift,
        })))
    }

    /// Fetch the observation window, emitting heartbeats while waiting.
    ///
    /// Bounded by `ingestion_timeout_secs`; abandoned as soon as the
    /// consumer disconnects.
    async fn ingest(
        &self,
        request: &ForecastRequest,
        source: &dyn ObservationSource,
        reporter: &mut ProgressReporter,
    ) -> Result<ObservationWindow, Interrupt> {
        let engine = &self.config.engine;
        let timeout_secs = engine.ingestion_timeout_secs;
        reporter
            .progress(
                5,
                Stage::Ingestion,
                format!("Fetching observations from {}", source.source_name()),
            )
            .await?;

        let started = Instant::now();
        let fetch = tokio::time::timeout(Duration::from_secs(timeout_secs), source.fetch(request));
        tokio::pin!(fetch);

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(engine.heartbeat_interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.tick().await;
        let mut percent = 5u8;

        let fetched = loop {
            tokio::select! {
                biased;
                result = &mut fetch => break result,
                () = reporter.closed() => return Err(Interrupt::Disconnected),
                _ = heartbeat.tick() => {
                    percent = (percent + 1).min(INGESTION_HEARTBEAT_CEILING);
                    reporter
                        .progress(
                            percent,
                            Stage::Ingestion,
                            format!(
                                "Waiting for observations ({:.1}s)",
                                started.elapsed().as_secs_f64()
                            ),
                        )
                        .await?;
                }
            }
        };

        let window = match fetched {
            Err(_) => {
                warn!(timeout_secs, "Ingestion timed out");
                return Err(ForecastError::Timeout { secs: timeout_secs }.into());
            }
            Ok(Err(e)) => {
                return Err(ForecastError::IngestionFailed {
                    source_name: source.source_name().to_string(),
                    message: format!("{e:#}"),
                }
                .into());
            }
            Ok(Ok(window)) => window,
        };

        info!(
            observations = window.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Ingestion complete"
        );
        reporter
            .progress(
                35,
                Stage::Ingestion,
                format!("Received {} observations", window.len()),
            )
            .await?;
        Ok(window)
    }
}

/// Percent after `done` of `total` ensemble members, spread over 65..=85.
fn member_percent(done: usize, total: usize) -> u8 {
    let span = 20 * done / total.max(1);
    65 + u8::try_from(span.min(20)).unwrap_or(20)
}

fn trend_points(dates: &[chrono::NaiveDate], ndvi: &[f64]) -> Vec<TrendPoint> {
    let start = dates.len().saturating_sub(TREND_POINTS);
    dates[start..]
        .iter()
        .zip(&ndvi[start..])
        .map(|(&date, &value)| TrendPoint { date, value })
        .collect()
}

/// Calibration lookup used by callers that build sources per crop.
pub fn calibration_for<'a>(
    config: &'a BloomConfig,
    crop: &str,
) -> Result<&'a CropCalibration, ForecastError> {
    config.crop(crop).ok_or_else(|| ForecastError::UnknownCrop {
        crop: crop.to_string(),
        known: config.crop_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_percent_spans_range() {
        assert_eq!(member_percent(1, 3), 71);
        assert_eq!(member_percent(2, 3), 78);
        assert_eq!(member_percent(3, 3), 85);
        assert_eq!(member_percent(1, 1), 85);
        assert_eq!(member_percent(0, 0), 65);
    }

    #[test]
    fn test_trend_points_keeps_latest() {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let dates: Vec<_> = (0..90).map(|i| start + chrono::Duration::days(i)).collect();
        let ndvi: Vec<f64> = (0..90).map(f64::from).collect();
        let trend = trend_points(&dates, &ndvi);
        assert_eq!(trend.len(), 30);
        assert_eq!(trend[0].value, 60.0);
        assert_eq!(trend[29].date, dates[89]);
    }
}
