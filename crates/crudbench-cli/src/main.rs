//! crudbench - benchmark CRUD, index and join operations across databases.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crudbench::config::{BenchConfig, DATABASE_URL_ENV, DEFAULT_RECORDS};
use crudbench::{BackendChoice, ReportPrinter, Scenario, Session};

/// crudbench command-line driver
#[derive(Parser, Debug)]
#[command(name = "crudbench")]
#[command(
    version,
    about = "Time CRUD, index and join operations on a document store and a relational store",
    long_about = "Time CRUD, index and join operations on a document store and a relational store.\n\n\
                  Backend calls carry no timeout: a backend that hangs hangs the benchmark."
)]
pub struct Args {
    /// Records seeded or inserted per run
    #[arg(short = 'n', long, default_value_t = DEFAULT_RECORDS)]
    pub records: usize,

    /// Repetitions per operation (default depends on the scenario)
    #[arg(short = 'r', long)]
    pub runs: Option<usize>,

    /// Scenario: insertion, retrieval, deletion, indexing, update, join or all
    #[arg(short = 's', long, default_value = "all")]
    pub scenario: Scenario,

    /// Backend to benchmark; repeat for several (default: document and sqlite)
    #[arg(short = 'b', long = "backend")]
    pub backends: Vec<BackendChoice>,

    /// Keep stores on disk in this directory instead of temporary storage
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// PostgreSQL connection URL (falls back to DATABASE_URL)
    #[arg(long)]
    pub postgres_url: Option<String>,
}

impl Args {
    /// Convert command-line arguments to a benchmark configuration.
    pub fn into_config(self) -> BenchConfig {
        let mut config = BenchConfig::new(self.scenario).with_records(self.records);

        if let Some(runs) = self.runs {
            config = config.with_runs(runs);
        }
        if !self.backends.is_empty() {
            config = config.with_backends(self.backends);
        }
        if let Some(dir) = self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(url) = self
            .postgres_url
            .or_else(|| std::env::var(DATABASE_URL_ENV).ok())
        {
            config = config.with_postgres_url(url);
        }

        config
    }
}

fn main() {
    // Logs go to stderr; stdout carries the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crudbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args.into_config()) {
        tracing::error!(error = %e, "benchmark aborted");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: BenchConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let repetitions = config.repetitions();
    let registry = config.registry();
    let backend_configs = config.backend_configs()?;

    tracing::info!(
        scenario = %config.scenario,
        records = config.records,
        repetitions,
        backends = ?config.backends,
        data_dir = ?config.data_dir,
        "configuration loaded"
    );

    if let Some(dir) = &config.data_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut session = Session::connect(&backend_configs)?;

    let mut printer = ReportPrinter::stdout();
    printer.banner(config.scenario.name(), config.records, repetitions);

    let report = session.run(&registry, repetitions, &mut printer);
    printer.comparison(&report);
    session.close();

    if report.is_complete() {
        tracing::info!("benchmark complete");
    } else {
        tracing::warn!(
            failed = report.failures.len(),
            "benchmark complete with failed operations"
        );
    }

    Ok(())
}
