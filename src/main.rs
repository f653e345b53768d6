//! cardiotwin: cardiovascular digital-twin pipeline CLI.
//!
//! Subcommands run the pipeline stages in order:
//! `ingest-cohort` → `generate-synth` → `aggregate-features` → `update-loop`.
//! `run-baseline` ingests the cohort and scores a logistic-regression baseline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cardiotwin::adapters::jsonl::JsonlSnapshotSink;
use cardiotwin::adapters::sanitize::SanitizingMakeWriter;
use cardiotwin::adapters::sqlite::SqliteFeatureStore;
use cardiotwin::adapters::synth::{generate_synthetic_data, SynthConfig, SynthDirectory};
use cardiotwin::application::baseline::METRICS_FILE;
use cardiotwin::application::report::{BASELINE_SUMMARY_FILE, SUMMARY_FILE};
use cardiotwin::application::{
    aggregate_features, ingest_cohort, run_baseline, write_baseline_summary, write_summary,
    BaselineConfig, CohortIndex, TwinUpdateService,
};
use cardiotwin::ports::{FeatureStore, COHORT_TABLE};
use cardiotwin::{PipelinePaths, UpdateConfig};

#[derive(Debug, Parser)]
#[command(name = "cardiotwin", version, about = "Cardiovascular digital twin pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the UCI heart CSV into the feature store
    IngestCohort {
        /// CSV path (defaults to the standard raw data locations)
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Ingest the cohort, then train and score the baseline classifier
    RunBaseline {
        /// CSV path (defaults to the standard raw data locations)
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        store: Option<PathBuf>,
        /// Seed for the stratified train/test split
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Metrics JSON path (defaults to reports/metrics.json)
        #[arg(long)]
        metrics: Option<PathBuf>,
        /// Summary path (defaults to reports/summary.md)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Generate seeded synthetic multimodal data for the cohort
    GenerateSynth {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 180)]
        days: usize,
        /// Last generated day, YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Merge synthetic summaries into the cohort feature table
    AggregateFeatures {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        synth_root: Option<PathBuf>,
    },
    /// Run the daily twin update loop
    UpdateLoop(UpdateArgs),
}

#[derive(Debug, Args)]
struct UpdateArgs {
    /// Number of most recent days to simulate
    #[arg(long)]
    days: Option<usize>,
    #[arg(long)]
    synth_root: Option<PathBuf>,
    /// Snapshot output directory
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    store: Option<PathBuf>,
    #[arg(long)]
    window_days: Option<usize>,
    #[arg(long)]
    smoothing_weight: Option<f64>,
    #[arg(long)]
    drift_bp_threshold: Option<f64>,
    #[arg(long)]
    drift_activity_threshold: Option<f64>,
    #[arg(long)]
    no_recalibrate: bool,
    /// Run summary path (defaults to reports/update_summary.md)
    #[arg(long)]
    report: Option<PathBuf>,
}

impl UpdateArgs {
    /// CLI flags override environment, environment overrides defaults.
    fn config(&self) -> UpdateConfig {
        let mut cfg = UpdateConfig::from_env_or_default();
        if let Some(days) = self.days {
            cfg.days = days;
        }
        if let Some(window) = self.window_days {
            cfg.window_days = window;
        }
        if let Some(w) = self.smoothing_weight {
            cfg.smoothing_weight = w;
        }
        if let Some(t) = self.drift_bp_threshold {
            cfg.drift_bp_threshold = t;
        }
        if let Some(t) = self.drift_activity_threshold {
            cfg.drift_activity_threshold = t;
        }
        if self.no_recalibrate {
            cfg.recalibrate_weekly = false;
        }
        cfg
    }
}

fn open_store(paths: &PipelinePaths, store: Option<PathBuf>) -> Result<SqliteFeatureStore> {
    let path = store.unwrap_or_else(|| paths.feature_store.clone());
    SqliteFeatureStore::new(&path)
        .with_context(|| format!("opening feature store {}", path.display()))
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // file | stderr | auto (file when CARDIOTWIN_LOG_FILE is set)
    let log_mode = std::env::var("CARDIOTWIN_LOG_MODE").unwrap_or_else(|_| "auto".to_string());
    let log_file = std::env::var("CARDIOTWIN_LOG_FILE").ok();

    let use_file = match log_mode.as_str() {
        "file" => true,
        "stderr" => false,
        _ => log_file.is_some(),
    };

    let (writer, guard) = if use_file {
        let log_file = log_file.unwrap_or_else(|| "reports/cardiotwin.log".to_string());
        if let Some(parent) = std::path::Path::new(&log_file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("opening log file {log_file}"))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;
    let paths = PipelinePaths::default();

    match cli.command {
        Command::IngestCohort { data, store } => {
            let csv = paths.resolve_csv(data.as_deref());
            let store = open_store(&paths, store)?;
            let schema = ingest_cohort(&store, &csv)
                .with_context(|| format!("ingesting cohort from {}", csv.display()))?;
            println!(
                "Ingested {} rows ({} feature columns) into {}",
                store.count_rows(COHORT_TABLE)?,
                schema.columns.len(),
                COHORT_TABLE
            );
        }
        Command::RunBaseline {
            data,
            store,
            seed,
            metrics,
            report,
        } => {
            let csv = paths.resolve_csv(data.as_deref());
            let store = open_store(&paths, store)?;
            ingest_cohort(&store, &csv)
                .with_context(|| format!("ingesting cohort from {}", csv.display()))?;

            let config = BaselineConfig {
                seed,
                ..BaselineConfig::default()
            };
            let metrics_path = metrics.unwrap_or_else(|| paths.reports_root.join(METRICS_FILE));
            let result = run_baseline(&store, &config, &metrics_path).context("running baseline")?;
            let report = report.unwrap_or_else(|| paths.reports_root.join(BASELINE_SUMMARY_FILE));
            write_baseline_summary(&result, &report)?;

            println!(
                "Baseline AUROC {:.4} / AUPRC {:.4} on {} held-out rows; metrics in {}",
                result.auroc,
                result.auprc,
                result.test_rows,
                metrics_path.display()
            );
        }
        Command::GenerateSynth {
            seed,
            days,
            end_date,
            store,
            out,
        } => {
            let store = open_store(&paths, store)?;
            let cohort = store
                .load_table(COHORT_TABLE)
                .context("loading cohort table (run ingest-cohort first)")?;
            let mut config = SynthConfig::ending_today();
            config.seed = seed;
            config.days = days;
            if let Some(end) = end_date {
                config.end_date = end;
            }
            let root = out.unwrap_or_else(|| paths.synth_root.clone());
            let output = generate_synthetic_data(&cohort, &config, &root)
                .context("generating synthetic data")?;
            println!(
                "Generated {} days for {} patients under {}",
                config.days,
                cohort.len(),
                output.root.display()
            );
        }
        Command::AggregateFeatures { store, synth_root } => {
            let store = open_store(&paths, store)?;
            let root = synth_root.unwrap_or_else(|| paths.synth_root.clone());
            let synth = SynthDirectory::open(&root)
                .with_context(|| format!("opening synthetic data {}", root.display()))?;
            let schema = aggregate_features(&store, &synth).context("aggregating features")?;
            println!("Merged feature table has {} columns", schema.columns.len());
        }
        Command::UpdateLoop(args) => {
            let config = args.config();
            let store = open_store(&paths, args.store.clone())?;
            let cohort = CohortIndex::load(&store).context("loading cohort for update loop")?;

            let synth_root = args.synth_root.clone().unwrap_or_else(|| paths.synth_root.clone());
            let source = SynthDirectory::open(&synth_root)
                .with_context(|| format!("opening synthetic data {}", synth_root.display()))?;
            let out = args.out.clone().unwrap_or_else(|| paths.state_root.clone());
            let sink = JsonlSnapshotSink::new(&out)
                .with_context(|| format!("creating snapshot directory {}", out.display()))?;

            let mut service = TwinUpdateService::new(source, sink, config)?;
            let run = service.run(&cohort).context("running update loop")?;

            let report = args
                .report
                .clone()
                .unwrap_or_else(|| paths.reports_root.join(SUMMARY_FILE));
            write_summary(&run, &report)?;

            println!(
                "Wrote {} snapshots ({} to {}) under {}",
                run.days.len(),
                run.start,
                run.end,
                out.display()
            );
        }
    }

    Ok(())
}
