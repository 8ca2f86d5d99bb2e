//! Forecast experiment runner
//!
//! - Reconciles pending forecasts against outcome tables
//! - Standardizes and fits treatment effects
//! - Prints the new assignment weights as JSON and saves them for the next run
//!
//! ```bash
//! forecast_ax generate-config
//! forecast_ax import --file submissions.json --records records.json
//! forecast_ax run --records records.json --outcomes outcomes.json
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use forecast_ax::experiment::records::parse_date;
use forecast_ax::{
    init_logging, trading_today, AssignmentWeights, ExperimentConfig, ExperimentCycle,
    ForecastRecord, JsonRecordStore, LogFormat, RecordStore, StaticOutcomeSource,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "forecast_ax")]
#[command(version, about = "Adaptive forecasting experiment runner", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "forecast_ax.toml", env = "FORECAST_AX_CONFIG")]
    config: String,

    /// Forecast record store (JSON)
    #[arg(long, default_value = "records.json", env = "FORECAST_AX_RECORDS")]
    records: PathBuf,

    /// Published assignment weights (default: weights.json next to the records)
    #[arg(long, env = "FORECAST_AX_WEIGHTS")]
    weights: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Directory for the rotated JSON log file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "forecast_ax.toml")]
        output: String,
    },
    /// Validate config without running
    ValidateConfig,
    /// Add newly submitted forecast records from a JSON array
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run one experiment cycle (default)
    Run {
        /// Outcome rows (JSON array of {question, date, outcome})
        #[arg(long, default_value = "outcomes.json")]
        outcomes: PathBuf,

        /// Cycle date, YYYY-MM-DD (default: today in New York)
        #[arg(long)]
        today: Option<String>,
    },
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::GenerateConfig { output }) => {
            generate_sample_config(output)?;
            return Ok(());
        }
        Some(Commands::ValidateConfig) => {
            let config = load_config(&cli)?;
            println!("Configuration is valid:\n{:#?}", config);
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let _guard = setup_logging(&config, &cli)?;
    let store = JsonRecordStore::open(&cli.records)?;
    let weights = cli
        .weights
        .clone()
        .unwrap_or_else(|| cli.records.with_file_name("weights.json"));

    match &cli.command {
        Some(Commands::Import { file }) => import_records(&store, file),
        Some(Commands::Run { outcomes, today }) => {
            run_cycle(&config, &store, &weights, outcomes, today.as_deref())
        }
        None => run_cycle(&config, &store, &weights, Path::new("outcomes.json"), None),
        Some(Commands::GenerateConfig { .. }) | Some(Commands::ValidateConfig) => Ok(()),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run_cycle(
    config: &ExperimentConfig,
    store: &JsonRecordStore,
    weights: &Path,
    outcomes: &Path,
    today: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let today: NaiveDate = match today {
        Some(s) => parse_date(s)?,
        None => trading_today(),
    };
    let source = if outcomes.exists() {
        StaticOutcomeSource::load_json(outcomes)?
    } else {
        StaticOutcomeSource::new()
    };

    info!(
        records = %store.path().display(),
        outcomes = %outcomes.display(),
        weights = %weights.display(),
        %today,
        "Starting experiment cycle"
    );

    let cycle = ExperimentCycle::with_snapshot(config, AssignmentWeights::load(weights)?);
    let report = cycle.run(store, &source, today)?;
    report.weights.save(weights)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn import_records(store: &JsonRecordStore, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(file)?;
    let records: Vec<ForecastRecord> = serde_json::from_str(&json)?;
    let n = records.len();
    store.insert(records)?;
    println!("Imported {n} records into {}", store.path().display());
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn load_config(cli: &Cli) -> Result<ExperimentConfig, Box<dyn std::error::Error>> {
    Ok(ExperimentConfig::load(&cli.config)?)
}

fn setup_logging(
    config: &ExperimentConfig,
    cli: &Cli,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        logging.format = format.parse::<LogFormat>()?;
    }
    if let Some(dir) = &cli.log_dir {
        logging.log_dir = Some(dir.clone());
    }
    Ok(init_logging(&logging, None)?)
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = format!(
        "# Forecast experiment configuration\n\
         # Every section is optional; omitted values use the defaults below.\n\n{}",
        ExperimentConfig::default().to_toml_string()?
    );
    std::fs::write(path, sample)?;
    println!("Sample config written to: {}", path);
    Ok(())
}
