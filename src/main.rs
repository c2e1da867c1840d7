//! BloomWatch CLI
//!
//! ```text
//! bloomwatch forecast almond --lat 37.6 --lon -120.9 --csv orchard.csv
//! bloomwatch forecast almond --lat 37.6 --lon -120.9 --synthetic seasonal --end-date 2025-02-01
//! bloomwatch bootstrap            # write calibration baseline models
//! bloomwatch crops                # list calibrated crops
//! bloomwatch check-config bloom_config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use futures::StreamExt;
use tracing::{info, warn};

use bloomwatch::config::{BloomConfig, CropCalibration};
use bloomwatch::ensemble::{baseline_models, FsModelSource, MANIFEST_FILE};
use bloomwatch::pipeline::{
    calibration_for, CsvSource, ForecastEngine, ObservationSource, SyntheticPattern,
    SyntheticSource,
};
use bloomwatch::types::{ForecastOutcome, ForecastRequest, PipelineEvent, PredictionOutcome};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "bloomwatch")]
#[command(about = "Bloom-date forecasting from vegetation index and climate observations")]
#[command(version)]
struct CliArgs {
    /// Configuration file (default: $BLOOMWATCH_CONFIG, then ./bloom_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Forecast the bloom date for one orchard
    Forecast(ForecastArgs),

    /// Write calibration-derived baseline models for crops without trained artifacts
    Bootstrap {
        /// Only this crop (default: every calibrated crop)
        #[arg(long)]
        crop: Option<String>,
        /// Model directory (default: engine.model_dir)
        #[arg(long)]
        models: Option<PathBuf>,
        /// Overwrite existing artifacts
        #[arg(long)]
        force: bool,
    },

    /// List calibrated crops
    Crops,

    /// Validate a configuration file and report every problem
    CheckConfig {
        /// File to validate (default: ./bloom_config.toml)
        path: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct ForecastArgs {
    /// Crop type (e.g. almond, apple, cherry)
    crop: String,

    /// Latitude (echoed in the result)
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude (echoed in the result)
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Read observations from a CSV file
    #[arg(long, conflicts_with = "synthetic")]
    csv: Option<PathBuf>,

    /// Generate synthetic observations with this pattern
    #[arg(long, value_enum)]
    synthetic: Option<SyntheticPattern>,

    /// Last day of the synthetic window (default: today)
    #[arg(long, requires = "synthetic")]
    end_date: Option<NaiveDate>,

    /// Seed for the synthetic generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Trailing window length in days (default: engine.window_days)
    #[arg(long)]
    window_days: Option<u32>,

    /// Model directory (default: engine.model_dir)
    #[arg(long)]
    models: Option<PathBuf>,

    /// Print events and the result as JSON
    #[arg(long)]
    json: bool,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    match args.command {
        SubCommand::CheckConfig { path } => check_config(path),
        SubCommand::Crops => {
            let config = load_config(args.config.as_ref())?;
            list_crops(&config);
            Ok(())
        }
        SubCommand::Bootstrap { crop, models, force } => {
            let config = load_config(args.config.as_ref())?;
            bootstrap(&config, crop.as_deref(), models, force)
        }
        SubCommand::Forecast(forecast_args) => {
            let mut config = load_config(args.config.as_ref())?;
            if let Some(dir) = &forecast_args.models {
                config.engine.model_dir.clone_from(dir);
            }
            forecast(Arc::new(config), forecast_args).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BloomConfig> {
    match path {
        Some(path) => BloomConfig::load_from_file(path)
            .with_context(|| format!("invalid configuration {}", path.display())),
        None => Ok(BloomConfig::load()),
    }
}

// ============================================================================
// Subcommands
// ============================================================================

async fn forecast(config: Arc<BloomConfig>, args: ForecastArgs) -> Result<()> {
    let calibration = calibration_for(&config, &args.crop)?.clone();
    let window_days = args.window_days.unwrap_or(config.engine.window_days);
    let request = ForecastRequest::new(&args.crop, args.lat, args.lon, window_days);

    let source: Arc<dyn ObservationSource> = match (&args.csv, args.synthetic) {
        (Some(path), _) => Arc::new(CsvSource::new(path)),
        (None, Some(pattern)) => {
            let end_date = args
                .end_date
                .unwrap_or_else(|| chrono::Local::now().date_naive());
            Arc::new(
                SyntheticSource::new(calibration, end_date)
                    .with_pattern(pattern)
                    .with_seed(args.seed),
            )
        }
        (None, None) => bail!("choose an observation source: --csv <FILE> or --synthetic <PATTERN>"),
    };

    let engine = ForecastEngine::from_config(Arc::clone(&config));
    let mut stream = engine.forecast(request, source);

    while let Some(event) = stream.next().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            PipelineEvent::Progress(p) => {
                if !args.json {
                    eprintln!("[{:>3}%] {:<11} {}", p.percent, p.stage.to_string(), p.message);
                }
            }
            PipelineEvent::Completed { result } => {
                if !args.json {
                    print_outcome(&result);
                }
                return Ok(());
            }
            PipelineEvent::Failed { error } => {
                bail!("{}: {}", error.kind, error.message);
            }
        }
    }
    bail!("forecast ended without a result")
}

fn print_outcome(outcome: &ForecastOutcome) {
    match outcome {
        ForecastOutcome::Gated(r) => {
            println!("Crop:            {}", r.crop_type);
            println!("Observed:        {}", r.observation_date);
            println!("Stage:           {} ({:.0}% confidence)", r.phenology_stage, r.phenology_confidence * 100.0);
            println!("Forecast:        not available at this stage");
            println!("                 {}", r.phenology_message);
            if let Some(w) = &r.estimated_bloom_window {
                println!("Bloom window:    {} .. {} ({:?} confidence)", w.earliest, w.latest, w.confidence);
            }
        }
        ForecastOutcome::Predicted(r) => {
            println!("Crop:            {}", r.crop_type);
            println!("Observed:        {}", r.observation_date);
            println!("Stage:           {}", r.phenology.stage);
            println!("Predicted bloom: {} ({} days)", r.predicted_bloom_date, r.days_until_bloom);
            println!("Interval:        {} .. {}", r.confidence_low_date, r.confidence_high_date);
            println!("Agreement:       {:.2}", r.agreement_score);
            println!("Historical peak: {} (shift {:+} days)", r.historical_peak_date, r.days_shift);
            println!("Members:");
            for p in &r.individual_predictions {
                match &p.outcome {
                    PredictionOutcome::Ok { day_offset } => println!(
                        "  {:<14} {:>6.1} days  weight {:.2}",
                        p.kind.as_str(), day_offset, p.effective_weight
                    ),
                    PredictionOutcome::Failed { reason } => {
                        println!("  {:<14} excluded: {reason}", p.kind.as_str());
                    }
                }
            }
            println!("Recommendations:");
            for line in &r.recommendations {
                println!("  - {line}");
            }
        }
    }
}

fn bootstrap(
    config: &BloomConfig,
    only: Option<&str>,
    models: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let root = models.unwrap_or_else(|| config.engine.model_dir.clone());
    let source = FsModelSource::new(&root);

    let crops: Vec<(&str, &CropCalibration)> = match only {
        Some(crop) => vec![(crop, calibration_for(config, crop)?)],
        None => config.crops.iter().map(|(k, v)| (k.as_str(), v)).collect(),
    };

    for (crop, calibration) in crops {
        if !force && source.crop_dir(crop).join(MANIFEST_FILE).exists() {
            warn!(crop, "Artifacts already present, skipping (use --force to overwrite)");
            continue;
        }
        source
            .save(&baseline_models(crop, calibration))
            .with_context(|| format!("failed to write models for {crop}"))?;
        info!(crop, dir = %source.crop_dir(crop).display(), "Wrote baseline models");
    }
    Ok(())
}

fn list_crops(config: &BloomConfig) {
    println!(
        "{:<10} {:<10} {:>12} {:>11} {:>8}",
        "crop", "name", "typical peak", "bloom doy", "std (d)"
    );
    for (crop, cal) in &config.crops {
        // Peak day-of-year rendered in a non-leap year
        let peak = NaiveDate::from_yo_opt(2025, cal.peak_doy.min(365))
            .map_or_else(|| cal.peak_doy.to_string(), |d| d.format("%b %d").to_string());
        println!(
            "{:<10} {:<10} {:>12} {:>11} {:>8.1}",
            crop,
            cal.name_or(crop),
            peak,
            format!("{}-{}", cal.bloom_doy_earliest, cal.bloom_doy_latest),
            cal.historical_std_days
        );
    }
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(bloomwatch::config::defaults::CONFIG_FILE_NAME));
    match BloomConfig::load_from_file(&path) {
        Ok(config) => {
            println!(
                "{}: OK (version {}, {} crops: {})",
                path.display(),
                config.version,
                config.crops.len(),
                config.crop_names().join(", ")
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            bail!("configuration is invalid")
        }
    }
}
