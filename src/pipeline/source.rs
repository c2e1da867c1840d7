//! Observation source abstraction for the ingestion stage.
//!
//! The engine treats ingestion as an external collaborator: it asks a source
//! for the trailing window and waits (bounded by a timeout) for the answer.
//! Which source serves a request is decided by the caller; the engine never
//! falls back from one source to another.
//!
//! - [`CsvSource`]: `date,vegetation_index,temperature,precipitation` file
//! - [`SyntheticSource`]: seeded seasonal generator driven by crop calibration
//! - [`StaticSource`]: fixed in-memory window with optional latency/failure

use std::f64::consts::TAU;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};
use tracing::{debug, info, warn};

use crate::config::CropCalibration;
use crate::types::{ForecastRequest, Observation, ObservationWindow};

/// Where a request's observations come from.
///
/// Implementations do their own parsing and pacing. The engine calls
/// [`fetch`](ObservationSource::fetch) once per request, inside a timeout.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Trailing window of observations for `request`, oldest first.
    async fn fetch(&self, request: &ForecastRequest) -> Result<ObservationWindow>;

    /// Human-readable name for logging (e.g. "CSV", "synthetic").
    fn source_name(&self) -> &str;
}

/// Keep only observations within `days` of the latest one, sorted by date.
pub fn trailing_window(mut observations: Vec<Observation>, days: u32) -> Vec<Observation> {
    observations.sort_by_key(|o| o.date);
    let Some(last) = observations.last().map(|o| o.date) else {
        return observations;
    };
    let first = last - chrono::Duration::days(i64::from(days.max(1)) - 1);
    observations.retain(|o| o.date >= first);
    observations
}

// ============================================================================
// CSV Source
// ============================================================================

/// Reads observations from a CSV file on every fetch.
///
/// Malformed lines are logged and skipped, the same way a replayed sensor
/// file is treated; an unreadable file is an error.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ObservationSource for CsvSource {
    async fn fetch(&self, request: &ForecastRequest) -> Result<ObservationWindow> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let observations = parse_csv(&content);
        info!(
            count = observations.len(),
            path = %self.path.display(),
            "Loaded observations from CSV"
        );
        Ok(ObservationWindow::new(trailing_window(
            observations,
            request.window_days,
        )))
    }

    fn source_name(&self) -> &str {
        "CSV"
    }
}

/// Parse CSV content, skipping the header, blank and malformed lines.
pub fn parse_csv(content: &str) -> Vec<Observation> {
    let mut observations = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;
        let line = line.trim();
        if line.is_empty() || (line_num == 1 && line.starts_with("date")) {
            continue;
        }
        match parse_csv_line(line) {
            Ok(obs) => observations.push(obs),
            Err(e) => warn!(line = line_num, error = %e, "Error parsing CSV line"),
        }
    }
    observations
}

fn parse_csv_line(line: &str) -> Result<Observation> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        bail!("expected 4 fields, got {}", fields.len());
    }
    let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}'", fields[0]))?;
    let number = |i: usize, name: &str| -> Result<f64> {
        fields[i]
            .parse::<f64>()
            .with_context(|| format!("invalid {name} '{}'", fields[i]))
    };
    Ok(Observation::new(
        date,
        number(1, "vegetation_index")?,
        number(2, "temperature")?,
        number(3, "precipitation")?,
    ))
}

// ============================================================================
// Synthetic Source
// ============================================================================

/// Shape of the generated vegetation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SyntheticPattern {
    /// Calendar-driven season: winter floor, logistic green-up toward the
    /// calibrated peak, plateau, autumn decline
    #[default]
    Seasonal,
    /// Linear rise from the winter floor to just under the bloom threshold
    /// across the window
    GreenUp,
    /// Flat at the winter floor
    Dormant,
}

/// Seeded seasonal generator. Identical seeds produce identical windows.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    calibration: CropCalibration,
    pattern: SyntheticPattern,
    end_date: NaiveDate,
    seed: u64,
    noise_sd: f64,
}

impl SyntheticSource {
    pub fn new(calibration: CropCalibration, end_date: NaiveDate) -> Self {
        Self {
            calibration,
            pattern: SyntheticPattern::default(),
            end_date,
            seed: 42,
            noise_sd: 0.01,
        }
    }

    #[must_use]
    pub const fn with_pattern(mut self, pattern: SyntheticPattern) -> Self {
        self.pattern = pattern;
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Standard deviation of the index noise (0 disables it).
    #[must_use]
    pub const fn with_noise(mut self, noise_sd: f64) -> Self {
        self.noise_sd = noise_sd;
        self
    }

    /// Generate `days` daily observations ending at the configured end date.
    pub fn generate(&self, days: u32, latitude: f64) -> Result<Vec<Observation>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let index_noise = Normal::new(0.0, self.noise_sd.max(0.0)).map_err(|e| anyhow!("{e}"))?;
        let temp_noise = Normal::new(0.0, 2.5).map_err(|e| anyhow!("{e}"))?;
        let rain_amount = Exp::new(1.0 / 5.0).map_err(|e| anyhow!("{e}"))?;
        let base_temp = if latitude.abs() > 40.0 { 15.0 } else { 18.0 };

        let days = days.max(1);
        let start = self.end_date - chrono::Duration::days(i64::from(days) - 1);
        let observations = (0..days)
            .map(|i| {
                let date = start + chrono::Duration::days(i64::from(i));
                let doy = f64::from(date.ordinal());
                let progress = if days > 1 {
                    f64::from(i) / f64::from(days - 1)
                } else {
                    1.0
                };

                let ndvi = self.index_at(doy, progress) + index_noise.sample(&mut rng);

                let temperature =
                    base_temp + 12.0 * ((doy - 80.0) * TAU / 365.0).sin() + temp_noise.sample(&mut rng);

                let seasonal_factor = 1.5 - ((doy - 90.0) * TAU / 365.0).cos();
                let wet_season = !(150.0..=300.0).contains(&doy);
                let rain_probability = if wet_season {
                    0.3 * seasonal_factor
                } else {
                    0.1
                };
                let precipitation = if rng.gen::<f64>() < rain_probability {
                    rain_amount.sample(&mut rng) * seasonal_factor
                } else {
                    0.0
                };

                Observation::new(date, ndvi.clamp(0.0, 1.0), temperature, precipitation)
            })
            .collect();
        Ok(observations)
    }

    fn index_at(&self, doy: f64, progress: f64) -> f64 {
        let cal = &self.calibration;
        let base = cal.ndvi_base;
        let peak = cal.ndvi_peak;
        match self.pattern {
            SyntheticPattern::Dormant => base,
            SyntheticPattern::GreenUp => {
                let target = cal.thresholds.imminent.min(peak) - 0.02;
                base + (target - base) * progress
            }
            SyntheticPattern::Seasonal => {
                // Days relative to the historical peak, wrapped into one season
                let mut rel = doy - f64::from(cal.peak_doy);
                if rel < -182.0 {
                    rel += 365.0;
                } else if rel >= 183.0 {
                    rel -= 365.0;
                }
                let duration = f64::from(cal.bloom_duration_days);
                if rel < -60.0 {
                    base
                } else if rel < duration {
                    base + (peak - base) / (1.0 + (-(rel + 15.0) / 6.0).exp())
                } else if rel < 90.0 {
                    0.95 * peak
                } else {
                    let decline = ((rel - 90.0) / 60.0).min(1.0);
                    0.95 * peak - (0.95 * peak - base) * decline
                }
            }
        }
    }
}

#[async_trait]
impl ObservationSource for SyntheticSource {
    async fn fetch(&self, request: &ForecastRequest) -> Result<ObservationWindow> {
        let observations = self.generate(request.window_days, request.location.lat)?;
        debug!(
            count = observations.len(),
            pattern = ?self.pattern,
            seed = self.seed,
            "Generated synthetic observations"
        );
        Ok(ObservationWindow::new(observations))
    }

    fn source_name(&self) -> &str {
        "synthetic"
    }
}

// ============================================================================
// Static Source
// ============================================================================

/// Returns a fixed window, optionally after a delay or with a failure.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    observations: Vec<Observation>,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl StaticSource {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            ..Self::default()
        }
    }

    /// A source whose every fetch fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ObservationSource for StaticSource {
    async fn fetch(&self, _request: &ForecastRequest) -> Result<ObservationWindow> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(ObservationWindow::new(self.observations.clone()))
    }

    fn source_name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_crops;

    fn almond() -> CropCalibration {
        builtin_crops().remove("almond").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_csv_skips_header_and_bad_lines() {
        let csv = "date,vegetation_index,temperature,precipitation\n\
                   2025-01-01,0.31,11.5,0.0\n\
                   not-a-date,0.3,10,0\n\
                   \n\
                   2025-01-02,0.32,12.0,1.4\n\
                   2025-01-03,0.33\n";
        let obs = parse_csv(csv);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1].date, date(2025, 1, 2));
        assert_eq!(obs[1].precipitation, 1.4);
    }

    #[test]
    fn test_trailing_window_keeps_latest_days() {
        let obs: Vec<Observation> = (0..120)
            .rev()
            .map(|i| Observation::new(date(2025, 1, 1) + chrono::Duration::days(i), 0.4, 10.0, 0.0))
            .collect();
        let window = trailing_window(obs, 90);
        assert_eq!(window.len(), 90);
        assert_eq!(window[0].date, date(2025, 1, 31));
        assert_eq!(window[89].date, date(2025, 4, 30));
    }

    #[test]
    fn test_synthetic_is_deterministic_per_seed() {
        let source = SyntheticSource::new(almond(), date(2025, 2, 1)).with_seed(7);
        let a = source.generate(90, 37.5).unwrap();
        let b = source.generate(90, 37.5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 90);
        assert_eq!(a[89].date, date(2025, 2, 1));
        assert!(a.iter().all(Observation::is_valid));

        let c = source.clone().with_seed(8).generate(90, 37.5).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_synthetic_dormant_stays_at_floor() {
        let cal = almond();
        let obs = SyntheticSource::new(cal.clone(), date(2024, 12, 15))
            .with_pattern(SyntheticPattern::Dormant)
            .with_noise(0.0)
            .generate(90, 37.5)
            .unwrap();
        assert!(obs.iter().all(|o| (o.vegetation_index - cal.ndvi_base).abs() < 1e-12));
    }

    #[test]
    fn test_synthetic_seasonal_greens_up_before_peak() {
        let cal = almond();
        let obs = SyntheticSource::new(cal.clone(), date(2025, 2, 19))
            .with_noise(0.0)
            .generate(90, 37.5)
            .unwrap();
        // End date is the historical peak day-of-year (50)
        assert!(obs[0].vegetation_index < obs[89].vegetation_index);
        assert!((obs[0].vegetation_index - cal.ndvi_base).abs() < 1e-9);
        assert!(obs[89].vegetation_index > cal.thresholds.imminent);
    }

    #[tokio::test]
    async fn test_static_source_failure() {
        let req = ForecastRequest::new("almond", 37.5, -120.9, 90);
        let err = StaticSource::failing("upstream unavailable")
            .fetch(&req)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn test_csv_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.csv");
        std::fs::write(
            &path,
            "date,vegetation_index,temperature,precipitation\n2025-01-01,0.3,10,0\n2025-01-02,0.31,11,0.5\n",
        )
        .unwrap();
        let req = ForecastRequest::new("almond", 37.5, -120.9, 90);
        let window = CsvSource::new(&path).fetch(&req).await.unwrap();
        assert_eq!(window.len(), 2);

        let missing = CsvSource::new(dir.path().join("missing.csv")).fetch(&req).await;
        assert!(missing.is_err());
    }
}
