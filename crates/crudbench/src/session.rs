//! Benchmark session: every registered operation on every backend.
//!
//! Backends are connected up front and closed on every exit path. A failing
//! operation/backend pairing is recorded and the session moves on; only a
//! connection failure ends the session.

use std::io::Write;

use crate::backends::{Backend, BackendConfig};
use crate::error::{Error, Result};
use crate::operation::OperationRegistry;
use crate::report::ReportPrinter;
use crate::runner::BenchmarkRunner;
use crate::stats::Summary;

/// Operation name -> Summary for one backend, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    entries: Vec<(String, Summary)>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the summary for `operation`.
    pub fn insert(&mut self, operation: impl Into<String>, summary: Summary) {
        let operation = operation.into();
        match self.entries.iter_mut().find(|(name, _)| *name == operation) {
            Some((_, existing)) => *existing = summary,
            None => self.entries.push((operation, summary)),
        }
    }

    pub fn get(&self, operation: &str) -> Option<&Summary> {
        self.entries
            .iter()
            .find(|(name, _)| name == operation)
            .map(|(_, summary)| summary)
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.get(operation).is_some()
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Summary)> {
        self.entries.iter().map(|(name, summary)| (name.as_str(), summary))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A pairing that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRun {
    pub backend: String,
    pub operation: String,
    pub error: String,
}

/// Results of one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResults {
    pub backend: String,
    pub table: ResultTable,
}

/// One row of the cross-backend comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub operation: String,
    /// One summary per backend, in backend order.
    pub summaries: Vec<Summary>,
}

/// An operation that completed on some backends but not all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOnly {
    pub operation: String,
    pub backends: Vec<String>,
}

/// Everything a session produced. Partial tables are valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    pub backends: Vec<BackendResults>,
    pub failures: Vec<FailedRun>,
}

impl SessionReport {
    pub fn push_backend(&mut self, backend: impl Into<String>, table: ResultTable) {
        self.backends.push(BackendResults {
            backend: backend.into(),
            table,
        });
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.backend.as_str()).collect()
    }

    pub fn table(&self, backend: &str) -> Option<&ResultTable> {
        self.backends
            .iter()
            .find(|b| b.backend == backend)
            .map(|b| &b.table)
    }

    /// Operation names in first-seen order across all tables.
    fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for results in &self.backends {
            for name in results.table.operations() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Operations present in every backend's table.
    pub fn comparison(&self) -> Vec<ComparisonRow> {
        if self.backends.is_empty() {
            return Vec::new();
        }

        self.operations()
            .into_iter()
            .filter_map(|name| {
                let summaries = self
                    .backends
                    .iter()
                    .map(|b| b.table.get(name).copied())
                    .collect::<Option<Vec<_>>>()?;
                Some(ComparisonRow {
                    operation: name.to_string(),
                    summaries,
                })
            })
            .collect()
    }

    /// Operations present in some tables but not all.
    pub fn backend_only(&self) -> Vec<BackendOnly> {
        self.operations()
            .into_iter()
            .filter_map(|name| {
                let backends: Vec<String> = self
                    .backends
                    .iter()
                    .filter(|b| b.table.contains(name))
                    .map(|b| b.backend.clone())
                    .collect();
                (backends.len() < self.backends.len()).then(|| BackendOnly {
                    operation: name.to_string(),
                    backends,
                })
            })
            .collect()
    }

    /// Whether every pairing completed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Open backends for the duration of one benchmark run.
pub struct Session {
    backends: Vec<Box<dyn Backend>>,
}

impl Session {
    /// Connect every configured backend. On the first failure, backends
    /// already opened are closed and the connection error is returned.
    pub fn connect(configs: &[BackendConfig]) -> Result<Self> {
        let mut session = Self::from_backends(Vec::new());
        for config in configs {
            match config.connect() {
                Ok(backend) => session.backends.push(backend),
                Err(e) => {
                    tracing::error!(backend = config.name(), error = %e, "connection failed");
                    session.close();
                    return Err(e);
                }
            }
        }

        if session.backends.is_empty() {
            return Err(Error::Config("no backend configured".to_string()));
        }
        Ok(session)
    }

    /// Wrap already-open backends.
    pub fn from_backends(backends: Vec<Box<dyn Backend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Run every registry entry on every backend, backend by backend.
    pub fn run<W: Write>(
        &mut self,
        registry: &OperationRegistry,
        repetitions: usize,
        printer: &mut ReportPrinter<W>,
    ) -> SessionReport {
        let mut report = SessionReport::default();

        for backend in self.backends.iter_mut() {
            let backend_name = backend.name().to_string();
            tracing::info!(backend = %backend_name, operations = registry.len(), "benchmarking backend");
            printer.backend_header(&backend_name);

            let mut table = ResultTable::new();
            for entry in registry.iter() {
                if !backend.supports(&entry.operation) {
                    tracing::info!(backend = %backend_name, operation = entry.name(), "operation not supported, skipping");
                    continue;
                }

                let result = BenchmarkRunner::new(printer).run_operation(
                    entry,
                    backend.as_mut(),
                    repetitions,
                );

                match result {
                    Ok(measurement) => table.insert(entry.name(), measurement.summary),
                    Err(e) => {
                        tracing::warn!(
                            backend = %backend_name,
                            operation = entry.name(),
                            error = %e,
                            "operation failed, continuing with next"
                        );
                        report.failures.push(FailedRun {
                            backend: backend_name.clone(),
                            operation: entry.name().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            report.push_backend(backend_name, table);
        }

        report
    }

    /// Close every backend. Close failures are logged; closing twice is a no-op.
    pub fn close(&mut self) {
        for mut backend in self.backends.drain(..) {
            match backend.close() {
                Ok(()) => tracing::info!(backend = backend.name(), "backend closed"),
                Err(e) => tracing::warn!(backend = backend.name(), error = %e, "failed to close backend"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
