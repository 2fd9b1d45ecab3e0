//! crudbench
//!
//! A benchmark harness that times CRUD, indexing and join operations against
//! a document store and a relational store, and compares the results.
//!
//! # Components
//!
//! - **Backends**: sled document store, SQLite, and PostgreSQL behind the
//!   `postgres` feature, all behind the [`Backend`] trait
//! - **Operations**: the [`OperationRegistry`] of named, parameterized
//!   operations with the dataset state each one needs
//! - **Runner**: sequential repetitions with reset, timing and aggregation
//! - **Session**: every operation on every backend, with per-backend result
//!   tables and a cross-backend comparison
//!
//! Backend calls are blocking and carry no timeout. A hanging engine hangs
//! the benchmark.

pub mod backends;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod operation;
pub mod report;
pub mod runner;
pub mod session;
pub mod stats;
pub mod timer;

pub use backends::{
    Backend, BackendChoice, BackendConfig, BackendKind, DocumentBackend, SqliteBackend,
};
#[cfg(feature = "postgres")]
pub use backends::PostgresBackend;
pub use config::BenchConfig;
pub use error::{BackendError, Error, Result};
pub use operation::{
    Field, Operation, OperationRegistry, Outcome, RegisteredOperation, ResetScope, Scenario,
};
pub use report::ReportPrinter;
pub use runner::{BenchmarkRunner, Measurement};
pub use session::{ResultTable, Session, SessionReport};
pub use stats::{summarize, SampleSet, Summary};
pub use timer::{measure, Measured};
