//! Test data generation for benchmarks.
//!
//! Generators are seeded so every backend, and every iteration, sees the
//! same dataset.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Prefix shared by every fixture `test_field` value.
pub const VALUE_PREFIX: &str = "test_value_";

/// Prefix used by pattern lookups.
pub const PATTERN_PREFIX: &str = "test_value_1";

/// Status written by update operations.
pub const UPDATED_STATUS: &str = "archived";

/// Row window returned by joins.
pub const JOIN_WINDOW: usize = 1000;

/// Number of fixture categories.
pub const CATEGORY_COUNT: usize = 10;

/// Preferred index of the record used for point lookups.
const LOOKUP_INDEX: usize = 1000;

const SEED: u64 = 12345;

const STATUSES: [&str; 4] = ["active", "inactive", "pending", "admin"];

const CATEGORY_LABELS: [&str; CATEGORY_COUNT] = [
    "books",
    "clothing",
    "electronics",
    "food",
    "garden",
    "music",
    "sports",
    "tools",
    "toys",
    "travel",
];

/// Record fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData {
    pub test_field: String,
    pub status: String,
    pub category_id: i64,
}

/// Category fixture, the join target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryData {
    pub id: i64,
    pub label: String,
}

/// The `test_field` value of record `index`.
pub fn test_value(index: usize) -> String {
    format!("{}{}", VALUE_PREFIX, index)
}

/// A `test_field` value guaranteed to exist in a dataset of `records`.
pub fn lookup_value(records: usize) -> String {
    test_value(LOOKUP_INDEX.min(records.saturating_sub(1)))
}

/// Generate `count` records.
pub fn generate_records(count: usize) -> Vec<RecordData> {
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count)
        .map(|i| RecordData {
            test_field: test_value(i),
            status: STATUSES[rng.gen_range(0..STATUSES.len())].to_string(),
            category_id: (i % CATEGORY_COUNT) as i64,
        })
        .collect()
}

/// Generate the fixture categories.
pub fn generate_categories() -> Vec<CategoryData> {
    CATEGORY_LABELS
        .iter()
        .enumerate()
        .map(|(id, label)| CategoryData {
            id: id as i64,
            label: label.to_string(),
        })
        .collect()
}

/// Number of records in a dataset of `records` whose `test_field` starts
/// with `prefix`.
pub fn expected_prefix_matches(records: usize, prefix: &str) -> usize {
    (0..records)
        .filter(|&i| test_value(i).starts_with(prefix))
        .count()
}
