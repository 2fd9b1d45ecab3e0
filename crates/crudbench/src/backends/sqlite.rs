//! SQLite relational backend.
//!
//! Records live in `test_table`, categories in `categories`. Secondary
//! indexes are named `idx_test_table_<column>`.
//!
//! `LIKE` runs with `case_sensitive_like` on, so prefix matches compare
//! bytes like the document store and PostgreSQL do.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::BackendError;
use crate::fixtures::{generate_categories, generate_records};
use crate::operation::{Field, Operation, Outcome, ResetScope};

use super::rows::{JoinRow, RecordRow};
use super::{like_prefix_pattern, Backend, BackendKind};

/// Backend identity.
pub const NAME: &str = "sqlite";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS test_table (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        test_field TEXT NOT NULL,
        status TEXT NOT NULL,
        category_id INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY,
        label TEXT NOT NULL
    );
"#;

const RECORD_COLUMNS: &str = "id, test_field, status, category_id";

/// SQLite backend.
pub struct SqliteBackend {
    conn: Option<Connection>,
}

impl SqliteBackend {
    /// Open a database file, or an in-memory database when `path` is `None`,
    /// and create the schema.
    pub fn open(path: Option<&Path>) -> Result<Self, BackendError> {
        let conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn: Some(conn) })
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self, BackendError> {
        Self::open(None)
    }

    fn conn(&self) -> Result<&Connection, BackendError> {
        self.conn.as_ref().ok_or(BackendError::Closed)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, BackendError> {
        self.conn.as_mut().ok_or(BackendError::Closed)
    }

    fn index_name(field: Field) -> String {
        format!("idx_test_table_{}", field.name())
    }

    /// Whether the secondary index on `field` exists.
    pub fn has_index(&self, field: Field) -> Result<bool, BackendError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [Self::index_name(field)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Create the index on `field` unless it exists. Returns whether it was created.
    pub fn create_index(&self, field: Field) -> Result<bool, BackendError> {
        if self.has_index(field)? {
            return Ok(false);
        }

        self.conn()?.execute(
            &format!(
                "CREATE INDEX {} ON test_table ({})",
                Self::index_name(field),
                field.name()
            ),
            [],
        )?;
        Ok(true)
    }

    fn drop_indexes(&self) -> Result<(), BackendError> {
        let conn = self.conn()?;
        for field in Field::all() {
            conn.execute(
                &format!("DROP INDEX IF EXISTS {}", Self::index_name(field)),
                [],
            )?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.conn()?
            .execute_batch("DELETE FROM test_table; DELETE FROM categories;")?;
        Ok(())
    }

    fn seed(&mut self, records: usize) -> Result<(), BackendError> {
        let conn = self.conn_mut()?;
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM test_table; DELETE FROM categories;")?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO categories (id, label) VALUES (?1, ?2)")?;
            for category in generate_categories() {
                stmt.execute(params![category.id, &category.label])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO test_table (test_field, status, category_id) VALUES (?1, ?2, ?3)",
            )?;
            for record in generate_records(records) {
                stmt.execute(params![&record.test_field, &record.status, record.category_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    fn insert_one(&self, value: &str) -> Result<Outcome, BackendError> {
        let written = self.conn()?.execute(
            "INSERT INTO test_table (test_field, status, category_id) VALUES (?1, ?2, ?3)",
            params![value, "active", 0i64],
        )?;
        Ok(Outcome::Written(written as u64))
    }

    /// One INSERT per record, committed once at the end.
    fn bulk_insert(&mut self, count: usize) -> Result<Outcome, BackendError> {
        let conn = self.conn_mut()?;
        let tx = conn.transaction()?;
        let mut written = 0u64;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_table (test_field, status, category_id) VALUES (?1, ?2, ?3)",
            )?;
            for record in generate_records(count) {
                written +=
                    stmt.execute(params![&record.test_field, &record.status, record.category_id])?
                        as u64;
            }
        }
        tx.commit()?;
        Ok(Outcome::Written(written))
    }

    fn point_lookup(&self, value: &str) -> Result<Outcome, BackendError> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM test_table WHERE test_field = ?1 LIMIT 1",
                    RECORD_COLUMNS
                ),
                [value],
                record_row,
            )
            .optional()?;
        Ok(Outcome::Matched(usize::from(row.is_some())))
    }

    fn pattern_lookup(&self, prefix: &str) -> Result<Outcome, BackendError> {
        let mut stmt = self.conn()?.prepare(&format!(
            r"SELECT {} FROM test_table WHERE test_field LIKE ?1 ESCAPE '\'",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map([like_prefix_pattern(prefix)], record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Outcome::Matched(rows.len()))
    }

    fn update_one(&self, value: &str, status: &str) -> Result<Outcome, BackendError> {
        let written = self.conn()?.execute(
            "UPDATE test_table SET status = ?1 \
             WHERE id = (SELECT id FROM test_table WHERE test_field = ?2 LIMIT 1)",
            params![status, value],
        )?;
        Ok(Outcome::Written(written as u64))
    }

    fn bulk_update(&self, prefix: &str, status: &str) -> Result<Outcome, BackendError> {
        let written = self.conn()?.execute(
            r"UPDATE test_table SET status = ?1 WHERE test_field LIKE ?2 ESCAPE '\'",
            params![status, like_prefix_pattern(prefix)],
        )?;
        Ok(Outcome::Written(written as u64))
    }

    fn delete_one(&self, value: &str) -> Result<Outcome, BackendError> {
        let written = self.conn()?.execute(
            "DELETE FROM test_table \
             WHERE id = (SELECT id FROM test_table WHERE test_field = ?1 LIMIT 1)",
            [value],
        )?;
        Ok(Outcome::Written(written as u64))
    }

    fn bulk_delete(&self, prefix: &str) -> Result<Outcome, BackendError> {
        let written = self.conn()?.execute(
            r"DELETE FROM test_table WHERE test_field LIKE ?1 ESCAPE '\'",
            [like_prefix_pattern(prefix)],
        )?;
        Ok(Outcome::Written(written as u64))
    }

    /// Lookup forced through the index with `INDEXED BY`.
    fn indexed_lookup(&self, field: Field, value: &str) -> Result<Outcome, BackendError> {
        if !self.has_index(field)? {
            return Err(BackendError::MissingIndex(field.name()));
        }

        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {} FROM test_table INDEXED BY {} WHERE {} = ?1",
            RECORD_COLUMNS,
            Self::index_name(field),
            field.name()
        ))?;
        let rows = stmt
            .query_map([value], record_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Outcome::Matched(rows.len()))
    }

    fn join(&self, limit: usize) -> Result<Outcome, BackendError> {
        let mut stmt = self.conn()?.prepare(
            "SELECT r.id, r.test_field, c.label \
             FROM test_table r JOIN categories c ON r.category_id = c.id \
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(JoinRow {
                    record_id: row.get(0)?,
                    test_field: row.get(1)?,
                    label: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Outcome::Matched(rows.len()))
    }
}

fn record_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        test_field: row.get(1)?,
        status: row.get(2)?,
        category_id: row.get(3)?,
    })
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn execute(&mut self, operation: &Operation) -> Result<Outcome, BackendError> {
        match operation {
            Operation::InsertOne { value } => self.insert_one(value),
            Operation::BulkInsert { count } => self.bulk_insert(*count),
            Operation::PointLookup { value } => self.point_lookup(value),
            Operation::PatternLookup { prefix } => self.pattern_lookup(prefix),
            Operation::UpdateOne { value, status } => self.update_one(value, status),
            Operation::BulkUpdate { prefix, status } => self.bulk_update(prefix, status),
            Operation::DeleteOne { value } => self.delete_one(value),
            Operation::BulkDelete { prefix } => self.bulk_delete(prefix),
            Operation::CreateIndex { field } => Ok(Outcome::Index {
                created: self.create_index(*field)?,
            }),
            Operation::IndexedLookup { field, value } => self.indexed_lookup(*field, value),
            Operation::Join { limit } => self.join(*limit),
        }
    }

    fn reset(&mut self, scope: &ResetScope) -> Result<(), BackendError> {
        match *scope {
            ResetScope::Empty => self.clear(),
            ResetScope::Seeded { records } => self.seed(records),
            ResetScope::Indexed { records, field } => {
                self.seed(records)?;
                self.create_index(field)?;
                Ok(())
            }
            ResetScope::Unindexed => self.drop_indexes(),
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| BackendError::from(e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{expected_prefix_matches, PATTERN_PREFIX, VALUE_PREFIX};

    fn seeded(records: usize) -> SqliteBackend {
        let mut backend = SqliteBackend::in_memory().unwrap();
        backend.reset(&ResetScope::Seeded { records }).unwrap();
        backend
    }

    fn count(backend: &SqliteBackend) -> i64 {
        backend
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM test_table", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_prefix_match_is_case_sensitive() {
        let mut backend = SqliteBackend::in_memory().unwrap();
        for value in ["TEST_VALUE_1", "test_value_1", "Test_value_2"] {
            backend
                .execute(&Operation::InsertOne {
                    value: value.to_string(),
                })
                .unwrap();
        }

        let prefix = VALUE_PREFIX.to_string();
        assert_eq!(
            backend
                .execute(&Operation::PatternLookup {
                    prefix: prefix.clone(),
                })
                .unwrap(),
            Outcome::Matched(1)
        );
        assert_eq!(
            backend
                .execute(&Operation::BulkUpdate {
                    prefix: prefix.clone(),
                    status: "archived".to_string(),
                })
                .unwrap(),
            Outcome::Written(1)
        );
        assert_eq!(
            backend.execute(&Operation::BulkDelete { prefix }).unwrap(),
            Outcome::Written(1)
        );
        assert_eq!(count(&backend), 2);
    }

    #[test]
    fn test_join_with_unbounded_limit() {
        let mut backend = seeded(15);
        assert_eq!(
            backend
                .execute(&Operation::Join { limit: usize::MAX })
                .unwrap(),
            Outcome::Matched(15)
        );
    }

    #[test]
    fn test_bulk_insert_and_clear() {
        let mut backend = SqliteBackend::in_memory().unwrap();
        let outcome = backend.execute(&Operation::BulkInsert { count: 100 }).unwrap();
        assert_eq!(outcome, Outcome::Written(100));
        assert_eq!(count(&backend), 100);

        backend.reset(&ResetScope::Empty).unwrap();
        backend.reset(&ResetScope::Empty).unwrap();
        assert_eq!(count(&backend), 0);
    }

    #[test]
    fn test_point_lookup() {
        let mut backend = seeded(100);
        let found = backend
            .execute(&Operation::PointLookup {
                value: "test_value_42".to_string(),
            })
            .unwrap();
        assert!(found.is_found());

        let missing = backend
            .execute(&Operation::PointLookup {
                value: "test_value_4200".to_string(),
            })
            .unwrap();
        assert_eq!(missing, Outcome::Matched(0));
    }

    #[test]
    fn test_pattern_lookup_is_literal_prefix() {
        let mut backend = seeded(200);
        let outcome = backend
            .execute(&Operation::PatternLookup {
                prefix: PATTERN_PREFIX.to_string(),
            })
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Matched(expected_prefix_matches(200, PATTERN_PREFIX))
        );

        // `_` must not act as a wildcard
        let outcome = backend
            .execute(&Operation::PatternLookup {
                prefix: "testXvalue".to_string(),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Matched(0));
    }

    #[test]
    fn test_updates() {
        let mut backend = seeded(50);
        let one = backend
            .execute(&Operation::UpdateOne {
                value: "test_value_3".to_string(),
                status: "archived".to_string(),
            })
            .unwrap();
        assert_eq!(one, Outcome::Written(1));

        let all = backend
            .execute(&Operation::BulkUpdate {
                prefix: VALUE_PREFIX.to_string(),
                status: "archived".to_string(),
            })
            .unwrap();
        assert_eq!(all, Outcome::Written(50));
    }

    #[test]
    fn test_deletes() {
        let mut backend = seeded(50);
        let one = backend
            .execute(&Operation::DeleteOne {
                value: "test_value_3".to_string(),
            })
            .unwrap();
        assert_eq!(one, Outcome::Written(1));
        assert_eq!(count(&backend), 49);

        let rest = backend
            .execute(&Operation::BulkDelete {
                prefix: VALUE_PREFIX.to_string(),
            })
            .unwrap();
        assert_eq!(rest, Outcome::Written(49));
        assert_eq!(count(&backend), 0);
    }

    #[test]
    fn test_create_index_is_idempotent() {
        let mut backend = seeded(10);
        let op = Operation::CreateIndex {
            field: Field::TestField,
        };
        assert_eq!(backend.execute(&op).unwrap(), Outcome::Index { created: true });
        assert_eq!(backend.execute(&op).unwrap(), Outcome::Index { created: false });
        assert!(backend.has_index(Field::TestField).unwrap());

        backend.reset(&ResetScope::Unindexed).unwrap();
        assert!(!backend.has_index(Field::TestField).unwrap());
        assert_eq!(count(&backend), 10);
    }

    #[test]
    fn test_indexed_lookup_requires_index() {
        let mut backend = seeded(10);
        let op = Operation::IndexedLookup {
            field: Field::TestField,
            value: "test_value_5".to_string(),
        };
        assert!(matches!(
            backend.execute(&op),
            Err(BackendError::MissingIndex("test_field"))
        ));

        backend
            .reset(&ResetScope::Indexed {
                records: 10,
                field: Field::TestField,
            })
            .unwrap();
        assert_eq!(backend.execute(&op).unwrap(), Outcome::Matched(1));
    }

    #[test]
    fn test_join_window() {
        let mut backend = seeded(30);
        assert_eq!(
            backend.execute(&Operation::Join { limit: 1000 }).unwrap(),
            Outcome::Matched(30)
        );
        assert_eq!(
            backend.execute(&Operation::Join { limit: 7 }).unwrap(),
            Outcome::Matched(7)
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut backend = SqliteBackend::in_memory().unwrap();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(matches!(
            backend.execute(&Operation::Join { limit: 1 }),
            Err(BackendError::Closed)
        ));
    }
}
