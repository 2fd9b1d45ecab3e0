//! Database backends under test.
//!
//! Every engine implements [`Backend`], so the runner is written once
//! against the trait. Calls are blocking and carry no timeout: a hanging
//! engine hangs the benchmark.

pub mod document;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use document::DocumentBackend;
pub use sqlite::SqliteBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

use crate::error::{BackendError, Error};
use crate::operation::{Operation, Outcome, ResetScope};

/// Engine family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Document,
    Relational,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Document => write!(f, "document"),
            BackendKind::Relational => write!(f, "relational"),
        }
    }
}

/// Capability interface of a database engine under test.
pub trait Backend {
    /// Backend identity used in reports and errors.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Whether the backend implements `operation`.
    fn supports(&self, _operation: &Operation) -> bool {
        true
    }

    /// Run one operation.
    fn execute(&mut self, operation: &Operation) -> Result<Outcome, BackendError>;

    /// Restore a dataset scope. Restoring a scope that already holds is a no-op
    /// in effect.
    fn reset(&mut self, scope: &ResetScope) -> Result<(), BackendError>;

    /// Release the connection. Safe to call repeatedly and after failures.
    fn close(&mut self) -> Result<(), BackendError>;
}

/// Connection settings for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// sled document store; temporary when `path` is `None`.
    Document { path: Option<PathBuf> },
    /// SQLite relational store; in-memory when `path` is `None`.
    Sqlite { path: Option<PathBuf> },
    /// PostgreSQL relational store.
    #[cfg(feature = "postgres")]
    Postgres { url: String },
}

impl BackendConfig {
    /// Backend identity this configuration connects to.
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Document { .. } => document::NAME,
            BackendConfig::Sqlite { .. } => sqlite::NAME,
            #[cfg(feature = "postgres")]
            BackendConfig::Postgres { .. } => postgres::NAME,
        }
    }

    /// Open the backend.
    pub fn connect(&self) -> Result<Box<dyn Backend>, Error> {
        let connection_error = |e: BackendError| Error::Connection {
            backend: self.name().to_string(),
            reason: e.to_string(),
        };

        let backend: Box<dyn Backend> = match self {
            BackendConfig::Document { path } => Box::new(
                DocumentBackend::open(path.as_deref()).map_err(connection_error)?,
            ),
            BackendConfig::Sqlite { path } => Box::new(
                SqliteBackend::open(path.as_deref()).map_err(connection_error)?,
            ),
            #[cfg(feature = "postgres")]
            BackendConfig::Postgres { url } => {
                Box::new(PostgresBackend::connect(url).map_err(connection_error)?)
            }
        };

        tracing::info!(backend = backend.name(), kind = %backend.kind(), "backend connected");
        Ok(backend)
    }
}

/// Backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Document,
    Sqlite,
    Postgres,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" | "doc" | "sled" => Ok(BackendChoice::Document),
            "sqlite" => Ok(BackendChoice::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(BackendChoice::Postgres),
            other => Err(format!(
                "unknown backend `{}` (expected document, sqlite or postgres)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Document => write!(f, "document"),
            BackendChoice::Sqlite => write!(f, "sqlite"),
            BackendChoice::Postgres => write!(f, "postgres"),
        }
    }
}

/// Common row types returned by the relational backends.
pub mod rows {
    /// Record row.
    #[derive(Debug, Clone)]
    pub struct RecordRow {
        pub id: i64,
        pub test_field: String,
        pub status: String,
        pub category_id: i64,
    }

    /// Record joined with its category.
    #[derive(Debug, Clone)]
    pub struct JoinRow {
        pub record_id: i64,
        pub test_field: String,
        pub label: String,
    }
}

/// Escape `%`, `_` and `\` so `prefix` matches literally in a `LIKE ... ESCAPE '\'`.
pub(crate) fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
