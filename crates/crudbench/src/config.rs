//! Benchmark configuration.

use std::path::PathBuf;

use crate::backends::{BackendChoice, BackendConfig};
use crate::error::{Error, Result};
use crate::operation::{OperationRegistry, Scenario};

/// Default number of fixture records.
pub const DEFAULT_RECORDS: usize = 10_000;

/// Environment variable holding the PostgreSQL connection URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Backends benchmarked when none are selected.
pub const DEFAULT_BACKENDS: [BackendChoice; 2] = [BackendChoice::Document, BackendChoice::Sqlite];

/// Benchmark configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// Records seeded or inserted per run.
    pub records: usize,

    /// Repetitions per operation. `None` uses the scenario default.
    pub runs: Option<usize>,

    /// Operations to benchmark.
    pub scenario: Scenario,

    /// Backends to benchmark, in report order.
    pub backends: Vec<BackendChoice>,

    /// Directory for on-disk stores. `None` keeps every store temporary.
    pub data_dir: Option<PathBuf>,

    /// PostgreSQL connection URL.
    pub postgres_url: Option<String>,
}

impl BenchConfig {
    /// Configuration for `scenario` with default settings.
    pub fn new(scenario: Scenario) -> Self {
        Self {
            records: DEFAULT_RECORDS,
            runs: None,
            scenario,
            backends: DEFAULT_BACKENDS.to_vec(),
            data_dir: None,
            postgres_url: None,
        }
    }

    /// Set the record count.
    pub fn with_records(mut self, records: usize) -> Self {
        self.records = records;
        self
    }

    /// Set the repetition count.
    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Replace the backend selection.
    pub fn with_backends(mut self, backends: impl IntoIterator<Item = BackendChoice>) -> Self {
        self.backends = backends.into_iter().collect();
        self
    }

    /// Keep stores on disk under `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the PostgreSQL connection URL.
    pub fn with_postgres_url(mut self, url: impl Into<String>) -> Self {
        self.postgres_url = Some(url.into());
        self
    }

    /// Repetitions per operation.
    pub fn repetitions(&self) -> usize {
        self.runs.unwrap_or_else(|| self.scenario.default_runs())
    }

    /// Reject configurations that cannot produce a summary.
    pub fn validate(&self) -> Result<()> {
        if self.records == 0 {
            return Err(Error::Config("records must be at least 1".to_string()));
        }
        if self.repetitions() == 0 {
            return Err(Error::Config("runs must be at least 1".to_string()));
        }
        if self.backends.is_empty() {
            return Err(Error::Config("no backend selected".to_string()));
        }
        Ok(())
    }

    /// Operations of the configured scenario.
    pub fn registry(&self) -> OperationRegistry {
        OperationRegistry::for_scenario(self.scenario, self.records)
    }

    /// Connection settings for every selected backend.
    pub fn backend_configs(&self) -> Result<Vec<BackendConfig>> {
        let mut seen = Vec::with_capacity(self.backends.len());
        let mut configs = Vec::with_capacity(self.backends.len());
        for &choice in &self.backends {
            if seen.contains(&choice) {
                continue;
            }
            seen.push(choice);
            configs.push(self.backend_config(choice)?);
        }
        Ok(configs)
    }

    fn backend_config(&self, choice: BackendChoice) -> Result<BackendConfig> {
        let in_data_dir = |name: &str| self.data_dir.as_ref().map(|dir| dir.join(name));

        match choice {
            BackendChoice::Document => Ok(BackendConfig::Document {
                path: in_data_dir("document"),
            }),
            BackendChoice::Sqlite => Ok(BackendConfig::Sqlite {
                path: in_data_dir("bench.sqlite"),
            }),
            #[cfg(feature = "postgres")]
            BackendChoice::Postgres => {
                let url = self.postgres_url.clone().ok_or_else(|| {
                    Error::Config(format!(
                        "postgres needs --postgres-url or {}",
                        DATABASE_URL_ENV
                    ))
                })?;
                Ok(BackendConfig::Postgres { url })
            }
            #[cfg(not(feature = "postgres"))]
            BackendChoice::Postgres => Err(Error::Config(
                "postgres support not compiled in (enable the `postgres` feature)".to_string(),
            )),
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new(Scenario::All)
    }
}
