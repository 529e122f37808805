//! Outbreak CLI Tool
//!
//! Train the anomaly model, run scoring and inspect published assessments.
//!
//! Usage:
//!   outbreak ingest <observations.json>
//!   outbreak train [--max-age-days <n>] [--force]
//!   outbreak predict [--horizon-days <n>] [--parallel]
//!   outbreak alerts [--threshold <score>] [--limit <n>]
//!   outbreak summary [<district>]
//!   outbreak models

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use outbreak_core::features::aggregate_observations;
use outbreak_core::storage::{DEFAULT_ALERT_LIMIT, DEFAULT_ALERT_THRESHOLD};
use outbreak_core::*;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "outbreak")]
#[command(version)]
#[command(about = "Score district outbreak risk from surveillance records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database connection string (sqlite://path, sqlite::memory: or a file path)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Model store directory
    #[arg(long, env = "OUTBREAK_MODEL_DIR", default_value = "models", global = true)]
    model_dir: PathBuf,

    /// Output format for command results
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load observations from a JSON file into the database
    Ingest {
        /// JSON object with "hospital", "pharma" and "social" arrays
        file: PathBuf,
    },

    /// Train the anomaly model if none is current
    Train {
        /// Retrain when the latest model is older than this many days
        #[arg(long, env = "OUTBREAK_RETRAIN_MAX_AGE_DAYS")]
        max_age_days: Option<u32>,

        /// Train even if a current model exists
        #[arg(long)]
        force: bool,

        /// Number of isolation trees
        #[arg(long, default_value_t = 100)]
        trees: usize,

        /// Expected share of anomalous district-days
        #[arg(long, default_value_t = 0.1)]
        contamination: f64,
    },

    /// Score every district and publish a new assessment set
    Predict {
        /// Days past the last observation to forecast
        #[arg(long, default_value_t = 2)]
        horizon_days: u32,

        /// Seasonal period of the case forecast in days
        #[arg(long, default_value_t = 1)]
        seasonality_days: u32,

        /// Score districts in parallel (requires parallel feature)
        #[arg(long)]
        parallel: bool,
    },

    /// List published assessments at or above a score
    Alerts {
        #[arg(long, default_value_t = DEFAULT_ALERT_THRESHOLD)]
        threshold: f64,

        #[arg(long, default_value_t = DEFAULT_ALERT_LIMIT)]
        limit: usize,
    },

    /// Show the published assessment per district
    Summary {
        /// Only this district
        district: Option<String>,
    },

    /// List stored model versions
    Models,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "command failed");
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let format = cli.format;
    let models = ModelStore::new(&cli.model_dir);

    // Listing models is the only command that needs no database
    if let Commands::Models = cli.command {
        return list_models(&models, format);
    }

    let database_url = cli.database_url.ok_or_else(|| {
        SurveillanceError::Configuration("DATABASE_URL is not set (use --database-url or the environment)".into())
    })?;
    let config = EngineConfig::new(database_url).with_model_dir(&cli.model_dir);
    let store = SqliteStore::open(&config.database_url)?;

    match cli.command {
        Commands::Ingest { file } => {
            let observations: Observations = serde_json::from_slice(&fs::read(&file)?)?;
            let inserted = store.insert_observations(&observations)?;
            tracing::info!(file = %file.display(), inserted, "observations ingested");
            println!("Inserted {} records from {}", inserted, file.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Train {
            max_age_days,
            force,
            trees,
            contamination,
        } => {
            let params = ForestParams::default()
                .with_n_trees(trees)
                .with_contamination(contamination);
            let policy = max_age_days.map_or(RetrainPolicy::Never, |days| RetrainPolicy::MaxAge { days });
            let config = config.with_forest(params).with_retrain_policy(policy);
            train(&store, &models, &config, force, format)
        }
        Commands::Predict {
            horizon_days,
            seasonality_days,
            parallel,
        } => {
            let forecast = ForecastConfig::default()
                .with_horizon_days(horizon_days)
                .with_seasonality_period_days(seasonality_days);
            let config = config.with_forecast(forecast).with_parallel(parallel);
            predict(&store, &models, &config, format)
        }
        Commands::Alerts { threshold, limit } => {
            let alerts = store.alerts_above(threshold, limit)?;
            print_assessments(&alerts, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Summary { district } => {
            let rows = match district {
                Some(d) => store.for_district(&d)?.into_iter().collect(),
                None => store.published()?,
            };
            print_assessments(&rows, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models => list_models(&models, format),
    }
}

fn train(
    store: &SqliteStore,
    models: &ModelStore,
    config: &EngineConfig,
    force: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let observations = store.load_observations()?;
    let table = aggregate_observations(&observations, AggregationMode::Dense);
    let trainer = ModelTrainer::new(config.forest);
    let outcome = trainer.ensure_model(models, &table, config.retrain_policy, Utc::now(), force)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome.entry())?),
        OutputFormat::Text => {
            let entry = outcome.entry();
            let verb = match outcome {
                TrainOutcome::Trained(_) => "Trained".green(),
                TrainOutcome::Skipped(_) => "Kept".yellow(),
            };
            println!(
                "{} model v{} ({} rows, trained {})",
                verb,
                entry.version,
                entry.training_rows,
                entry.trained_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn predict(store: &SqliteStore, models: &ModelStore, config: &EngineConfig, format: OutputFormat) -> Result<ExitCode> {
    let report = run_once(store, models, store, config);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => match &report.status {
            RunStatus::Published { set_version } => {
                println!(
                    "Published set {} with model v{}: {} districts, {} high alerts ({} ms)",
                    set_version,
                    report.model_version.unwrap_or_default(),
                    report.assessments,
                    report.high_alerts,
                    report.elapsed_ms
                );
                if report.aggregation.total_dropped() > 0 {
                    println!(
                        "{} {} records with unreadable timestamps were excluded",
                        "warning:".yellow().bold(),
                        report.aggregation.total_dropped()
                    );
                }
            }
            RunStatus::ModelUnavailable { reason } => {
                println!("{} {} (run `outbreak train` first)", "No model:".yellow().bold(), reason);
            }
            RunStatus::Failed { error } => {
                println!("{} {}", "Run failed:".red().bold(), error);
            }
        },
    }

    Ok(match report.status {
        RunStatus::Published { .. } => ExitCode::SUCCESS,
        RunStatus::ModelUnavailable { .. } => ExitCode::from(2),
        RunStatus::Failed { .. } => ExitCode::FAILURE,
    })
}

fn list_models(models: &ModelStore, format: OutputFormat) -> Result<ExitCode> {
    let versions = models.versions()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&versions)?),
        OutputFormat::Text => {
            if versions.is_empty() {
                println!("No models in {}", models.dir().display());
            }
            for entry in &versions {
                println!(
                    "v{:<4} {}  {:>6} rows  {}  {}",
                    entry.version,
                    entry.trained_at.format("%Y-%m-%d %H:%M"),
                    entry.training_rows,
                    &entry.sha256[..entry.sha256.len().min(12)],
                    entry.file
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_assessments(rows: &[RiskAssessment], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No assessments");
            }
            for a in rows {
                let level = match a.alert_level {
                    AlertLevel::High => a.alert_level.as_str().red().bold(),
                    AlertLevel::Medium => a.alert_level.as_str().yellow(),
                    AlertLevel::Low => a.alert_level.as_str().green(),
                };
                println!(
                    "{:<16} {}  {:>4.2}  {:<6}  cases={} severe={} pharma={} posts={} negative={}",
                    a.district,
                    a.date,
                    a.outbreak_risk_score,
                    level,
                    a.hospital_case_count,
                    a.severe_case_count,
                    a.pharma_sales_count,
                    a.social_posts_count,
                    a.negative_posts_count
                );
                println!("{:<16} {}", "", a.explanation.dimmed());
            }
        }
    }
    Ok(())
}
