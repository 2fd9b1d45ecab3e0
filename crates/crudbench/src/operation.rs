//! Operation registry.
//!
//! An [`Operation`] describes *what* to run; each backend decides *how*.
//! A [`RegisteredOperation`] pairs an operation with the dataset state it
//! needs: a `setup` scope prepared once before the run and a `reset` scope
//! restored before every iteration.
//!
//! # Backend contract
//!
//! - `create_index` checks for the index first and reports
//!   `Index { created: false }` when it already exists.
//! - `pattern_lookup`, `bulk_update` and `bulk_delete` match records whose
//!   `test_field` starts with the prefix. Backends may use different
//!   mechanisms (index range scans, `LIKE`), the match set is the same.
//! - `indexed_lookup` fails with `MissingIndex` when the index is absent.
//! - `join` returns at most `limit` record/category pairs.

use std::fmt;
use std::str::FromStr;

use crate::fixtures;

/// A record field that operations can filter on or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    TestField,
    Status,
    CategoryId,
}

impl Field {
    /// Column / document key name.
    pub fn name(&self) -> &'static str {
        match self {
            Field::TestField => "test_field",
            Field::Status => "status",
            Field::CategoryId => "category_id",
        }
    }

    pub fn all() -> [Field; 3] {
        [Field::TestField, Field::Status, Field::CategoryId]
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, parameterized unit of database work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Insert a single record.
    InsertOne { value: String },
    /// Insert `count` records one at a time, committed together.
    BulkInsert { count: usize },
    /// Find one record by exact `test_field`.
    PointLookup { value: String },
    /// Find every record whose `test_field` starts with `prefix`.
    PatternLookup { prefix: String },
    /// Set `status` on the first record matching `value`.
    UpdateOne { value: String, status: String },
    /// Set `status` on every record whose `test_field` starts with `prefix`.
    BulkUpdate { prefix: String, status: String },
    /// Delete the first record matching `value`.
    DeleteOne { value: String },
    /// Delete every record whose `test_field` starts with `prefix`.
    BulkDelete { prefix: String },
    /// Create a secondary index on `field` unless it exists.
    CreateIndex { field: Field },
    /// Find records by exact `field` value through its secondary index.
    IndexedLookup { field: Field, value: String },
    /// Records joined with their category, first `limit` matches.
    Join { limit: usize },
}

impl Operation {
    /// Stable operation name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::InsertOne { .. } => "insert_one",
            Operation::BulkInsert { .. } => "bulk_insert",
            Operation::PointLookup { .. } => "point_lookup",
            Operation::PatternLookup { .. } => "pattern_lookup",
            Operation::UpdateOne { .. } => "update_one",
            Operation::BulkUpdate { .. } => "bulk_update",
            Operation::DeleteOne { .. } => "delete_one",
            Operation::BulkDelete { .. } => "bulk_delete",
            Operation::CreateIndex { .. } => "create_index",
            Operation::IndexedLookup { .. } => "indexed_lookup",
            Operation::Join { .. } => "join",
        }
    }

    /// Whether the operation writes to the dataset.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::InsertOne { .. }
                | Operation::BulkInsert { .. }
                | Operation::UpdateOne { .. }
                | Operation::BulkUpdate { .. }
                | Operation::DeleteOne { .. }
                | Operation::BulkDelete { .. }
        )
    }
}

/// Outcome shape of an executed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Records inserted, updated or deleted.
    Written(u64),
    /// Records (or joined rows) returned by a lookup.
    Matched(usize),
    /// Index creation; `created` is false when the index already existed.
    Index { created: bool },
}

impl Outcome {
    /// Whether a lookup found anything.
    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Matched(n) if *n > 0)
    }
}

/// A dataset state a backend can restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// No records, no categories. Index definitions are kept.
    Empty,
    /// Exactly `records` fixture records plus the fixture categories.
    Seeded { records: usize },
    /// `Seeded` plus a secondary index on `field`.
    Indexed { records: usize, field: Field },
    /// Every secondary index dropped; data untouched.
    Unindexed,
}

/// An operation plus the dataset preparation it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredOperation {
    pub operation: Operation,
    /// Prepared once before the first iteration.
    pub setup: Option<ResetScope>,
    /// Restored before every iteration, including the first.
    pub reset: Option<ResetScope>,
}

impl RegisteredOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            setup: None,
            reset: None,
        }
    }

    pub fn with_setup(mut self, scope: ResetScope) -> Self {
        self.setup = Some(scope);
        self
    }

    pub fn with_reset(mut self, scope: ResetScope) -> Self {
        self.reset = Some(scope);
        self
    }

    pub fn name(&self) -> &'static str {
        self.operation.name()
    }
}

/// A named group of operations with its default repetition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Insertion,
    Retrieval,
    Deletion,
    Indexing,
    Update,
    Join,
    All,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Insertion => "insertion",
            Scenario::Retrieval => "retrieval",
            Scenario::Deletion => "deletion",
            Scenario::Indexing => "indexing",
            Scenario::Update => "update",
            Scenario::Join => "join",
            Scenario::All => "all",
        }
    }

    /// Repetitions used when none are configured.
    pub fn default_runs(&self) -> usize {
        match self {
            Scenario::Retrieval => 30,
            Scenario::Join => 10,
            _ => 5,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insertion" | "insert" => Ok(Scenario::Insertion),
            "retrieval" | "lookup" => Ok(Scenario::Retrieval),
            "deletion" | "delete" => Ok(Scenario::Deletion),
            "indexing" | "index" => Ok(Scenario::Indexing),
            "update" => Ok(Scenario::Update),
            "join" => Ok(Scenario::Join),
            "all" => Ok(Scenario::All),
            other => Err(format!(
                "unknown scenario `{}` (expected insertion, retrieval, deletion, indexing, update, join or all)",
                other
            )),
        }
    }
}

/// Ordered set of operations to benchmark.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    entries: Vec<RegisteredOperation>,
}

impl OperationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. A later entry with the same name replaces the
    /// earlier one in place.
    pub fn register(&mut self, entry: RegisteredOperation) -> &mut Self {
        match self.entries.iter_mut().find(|e| e.name() == entry.name()) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// Every operation, over a dataset of `records` fixture records.
    pub fn full(records: usize) -> Self {
        let lookup = fixtures::lookup_value(records);
        let mut registry = Self::new();

        registry
            .register(
                RegisteredOperation::new(Operation::InsertOne {
                    value: fixtures::test_value(0),
                })
                .with_reset(ResetScope::Empty),
            )
            .register(
                RegisteredOperation::new(Operation::BulkInsert { count: records })
                    .with_reset(ResetScope::Empty),
            )
            .register(
                RegisteredOperation::new(Operation::PointLookup {
                    value: lookup.clone(),
                })
                .with_setup(ResetScope::Seeded { records }),
            )
            .register(
                RegisteredOperation::new(Operation::PatternLookup {
                    prefix: fixtures::PATTERN_PREFIX.to_string(),
                })
                .with_setup(ResetScope::Seeded { records }),
            )
            .register(
                RegisteredOperation::new(Operation::UpdateOne {
                    value: lookup.clone(),
                    status: fixtures::UPDATED_STATUS.to_string(),
                })
                .with_reset(ResetScope::Seeded { records }),
            )
            .register(
                RegisteredOperation::new(Operation::BulkUpdate {
                    prefix: fixtures::VALUE_PREFIX.to_string(),
                    status: fixtures::UPDATED_STATUS.to_string(),
                })
                .with_reset(ResetScope::Seeded { records }),
            )
            .register(
                RegisteredOperation::new(Operation::DeleteOne {
                    value: lookup.clone(),
                })
                .with_reset(ResetScope::Seeded { records }),
            )
            .register(
                RegisteredOperation::new(Operation::BulkDelete {
                    prefix: fixtures::VALUE_PREFIX.to_string(),
                })
                .with_reset(ResetScope::Seeded { records }),
            )
            .register(
                RegisteredOperation::new(Operation::CreateIndex {
                    field: Field::TestField,
                })
                .with_setup(ResetScope::Seeded { records })
                .with_reset(ResetScope::Unindexed),
            )
            .register(
                RegisteredOperation::new(Operation::IndexedLookup {
                    field: Field::TestField,
                    value: lookup,
                })
                .with_setup(ResetScope::Indexed {
                    records,
                    field: Field::TestField,
                }),
            )
            .register(
                RegisteredOperation::new(Operation::Join {
                    limit: fixtures::JOIN_WINDOW,
                })
                .with_setup(ResetScope::Seeded { records }),
            );

        registry
    }

    /// The operations of one scenario.
    pub fn for_scenario(scenario: Scenario, records: usize) -> Self {
        let names: &[&str] = match scenario {
            Scenario::Insertion => &["bulk_insert"],
            Scenario::Retrieval => &["point_lookup"],
            Scenario::Deletion => &["bulk_delete"],
            Scenario::Indexing => &["create_index"],
            Scenario::Update => &["update_one", "bulk_update"],
            Scenario::Join => &["join"],
            Scenario::All => return Self::full(records),
        };

        let full = Self::full(records);
        Self {
            entries: full
                .entries
                .into_iter()
                .filter(|e| names.contains(&e.name()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredOperation> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// Operation names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredOperation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
