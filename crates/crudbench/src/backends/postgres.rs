//! PostgreSQL relational backend.
//!
//! Requires a running PostgreSQL instance. Enable with `--features postgres`.
//! The backend owns a private current-thread Tokio runtime and blocks on
//! every call, so calls stay sequential like the other backends.

use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row};
use tokio::runtime::Runtime;

use crate::error::BackendError;
use crate::fixtures::{generate_categories, generate_records};
use crate::operation::{Field, Operation, Outcome, ResetScope};

use super::rows::{JoinRow, RecordRow};
use super::{like_prefix_pattern, Backend, BackendKind};

/// Backend identity.
pub const NAME: &str = "postgres";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS test_table (
        id BIGSERIAL PRIMARY KEY,
        test_field VARCHAR(255) NOT NULL,
        status TEXT NOT NULL,
        category_id BIGINT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS categories (
        id BIGINT PRIMARY KEY,
        label TEXT NOT NULL
    );
"#;

const INSERT_RECORD: &str =
    "INSERT INTO test_table (test_field, status, category_id) VALUES ($1, $2, $3)";

/// PostgreSQL backend.
pub struct PostgresBackend {
    pool: Option<PgPool>,
    rt: Runtime,
}

impl PostgresBackend {
    /// Connect and create the schema.
    pub fn connect(database_url: &str) -> Result<Self, BackendError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BackendError::Postgres(sqlx::Error::Io(e)))?;

        let pool = rt.block_on(async {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect(database_url)
                .await?;
            sqlx::raw_sql(SCHEMA).execute(&pool).await?;
            Ok::<_, sqlx::Error>(pool)
        })?;

        Ok(Self {
            pool: Some(pool),
            rt,
        })
    }

    fn pool(&self) -> Result<&PgPool, BackendError> {
        self.pool.as_ref().ok_or(BackendError::Closed)
    }

    fn index_name(field: Field) -> String {
        format!("idx_test_table_{}", field.name())
    }

    /// Whether the secondary index on `field` exists.
    pub fn has_index(&self, field: Field) -> Result<bool, BackendError> {
        let pool = self.pool()?;
        let exists = self.rt.block_on(async {
            sqlx::query(
                "SELECT EXISTS (SELECT 1 FROM pg_indexes \
                 WHERE tablename = 'test_table' AND indexname = $1)",
            )
            .bind(Self::index_name(field))
            .fetch_one(pool)
            .await
            .map(|row| row.get::<bool, _>(0))
        })?;
        Ok(exists)
    }

    /// Create the index on `field` unless it exists. Returns whether it was created.
    pub fn create_index(&self, field: Field) -> Result<bool, BackendError> {
        if self.has_index(field)? {
            return Ok(false);
        }

        let pool = self.pool()?;
        let statement = format!(
            "CREATE INDEX {} ON test_table ({})",
            Self::index_name(field),
            field.name()
        );
        self.rt
            .block_on(async { sqlx::query(&statement).execute(pool).await })?;
        Ok(true)
    }

    fn drop_indexes(&self) -> Result<(), BackendError> {
        let pool = self.pool()?;
        self.rt.block_on(async {
            for field in Field::all() {
                sqlx::query(&format!("DROP INDEX IF EXISTS {}", Self::index_name(field)))
                    .execute(pool)
                    .await?;
            }
            Ok::<_, sqlx::Error>(())
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        let pool = self.pool()?;
        self.rt.block_on(async {
            sqlx::raw_sql("DELETE FROM test_table; DELETE FROM categories;")
                .execute(pool)
                .await
        })?;
        Ok(())
    }

    fn seed(&self, records: usize) -> Result<(), BackendError> {
        let pool = self.pool()?;
        self.rt.block_on(async {
            let mut tx = pool.begin().await?;
            sqlx::raw_sql("DELETE FROM test_table; DELETE FROM categories;")
                .execute(&mut *tx)
                .await?;

            for category in generate_categories() {
                sqlx::query("INSERT INTO categories (id, label) VALUES ($1, $2)")
                    .bind(category.id)
                    .bind(&category.label)
                    .execute(&mut *tx)
                    .await?;
            }

            for record in generate_records(records) {
                sqlx::query(INSERT_RECORD)
                    .bind(&record.test_field)
                    .bind(&record.status)
                    .bind(record.category_id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await
        })?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    fn insert_one(&self, value: &str) -> Result<Outcome, BackendError> {
        let pool = self.pool()?;
        let result = self.rt.block_on(async {
            sqlx::query(INSERT_RECORD)
                .bind(value)
                .bind("active")
                .bind(0i64)
                .execute(pool)
                .await
        })?;
        Ok(Outcome::Written(result.rows_affected()))
    }

    /// One INSERT per record, committed once at the end.
    fn bulk_insert(&self, count: usize) -> Result<Outcome, BackendError> {
        let pool = self.pool()?;
        let written = self.rt.block_on(async {
            let mut tx = pool.begin().await?;
            let mut written = 0u64;
            for record in generate_records(count) {
                written += sqlx::query(INSERT_RECORD)
                    .bind(&record.test_field)
                    .bind(&record.status)
                    .bind(record.category_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(written)
        })?;
        Ok(Outcome::Written(written))
    }

    fn fetch_records<'q, T>(
        &self,
        query: &'q str,
        bind: T,
    ) -> Result<Vec<RecordRow>, BackendError>
    where
        T: 'q + Send + sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres>,
    {
        let pool = self.pool()?;
        let rows = self.rt.block_on(async {
            sqlx::query(query)
                .bind(bind)
                .fetch_all(pool)
                .await
                .map(|rows| {
                    rows.into_iter()
                        .map(|row| RecordRow {
                            id: row.get("id"),
                            test_field: row.get("test_field"),
                            status: row.get("status"),
                            category_id: row.get("category_id"),
                        })
                        .collect::<Vec<_>>()
                })
        })?;
        Ok(rows)
    }

    fn write(
        &self,
        statement: &str,
        first: &str,
        second: Option<&str>,
    ) -> Result<Outcome, BackendError> {
        let pool = self.pool()?;
        let result = self.rt.block_on(async {
            let mut query = sqlx::query(statement).bind(first);
            if let Some(second) = second {
                query = query.bind(second);
            }
            query.execute(pool).await
        })?;
        Ok(Outcome::Written(result.rows_affected()))
    }

    fn indexed_lookup(&self, field: Field, value: &str) -> Result<Outcome, BackendError> {
        if !self.has_index(field)? {
            return Err(BackendError::MissingIndex(field.name()));
        }

        let query = indexed_lookup_query(field);
        // Bind in the column's own type so the index stays usable.
        let rows = match field {
            Field::TestField | Field::Status => self.fetch_records(&query, value.to_string())?,
            Field::CategoryId => match value.parse::<i64>() {
                Ok(id) => self.fetch_records(&query, id)?,
                Err(_) => Vec::new(),
            },
        };
        Ok(Outcome::Matched(rows.len()))
    }

    fn join(&self, limit: usize) -> Result<Outcome, BackendError> {
        let pool = self.pool()?;
        let rows = self.rt.block_on(async {
            sqlx::query(
                "SELECT r.id, r.test_field, c.label \
                 FROM test_table r JOIN categories c ON r.category_id = c.id \
                 LIMIT $1",
            )
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await
            .map(|rows| {
                rows.into_iter()
                    .map(|row| JoinRow {
                        record_id: row.get(0),
                        test_field: row.get(1),
                        label: row.get(2),
                    })
                    .collect::<Vec<_>>()
            })
        })?;
        Ok(Outcome::Matched(rows.len()))
    }
}

/// Equality lookup on the bare column, so `idx_test_table_<field>` applies.
fn indexed_lookup_query(field: Field) -> String {
    format!(
        "SELECT id, test_field, status, category_id FROM test_table WHERE {} = $1",
        field.name()
    )
}

impl Backend for PostgresBackend {
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
            Operation::PointLookup { value } => {
                let rows = self.fetch_records(
                    "SELECT id, test_field, status, category_id FROM test_table \
                     WHERE test_field = $1 LIMIT 1",
                    value.clone(),
                )?;
                Ok(Outcome::Matched(rows.len()))
            }
            Operation::PatternLookup { prefix } => {
                let rows = self.fetch_records(
                    r"SELECT id, test_field, status, category_id FROM test_table WHERE test_field LIKE $1 ESCAPE '\'",
                    like_prefix_pattern(prefix),
                )?;
                Ok(Outcome::Matched(rows.len()))
            }
            Operation::UpdateOne { value, status } => self.write(
                "UPDATE test_table SET status = $1 \
                 WHERE id = (SELECT id FROM test_table WHERE test_field = $2 LIMIT 1)",
                status,
                Some(value.as_str()),
            ),
            Operation::BulkUpdate { prefix, status } => self.write(
                r"UPDATE test_table SET status = $1 WHERE test_field LIKE $2 ESCAPE '\'",
                status,
                Some(like_prefix_pattern(prefix).as_str()),
            ),
            Operation::DeleteOne { value } => self.write(
                "DELETE FROM test_table \
                 WHERE id = (SELECT id FROM test_table WHERE test_field = $1 LIMIT 1)",
                value,
                None,
            ),
            Operation::BulkDelete { prefix } => self.write(
                r"DELETE FROM test_table WHERE test_field LIKE $1 ESCAPE '\'",
                &like_prefix_pattern(prefix),
                None,
            ),
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
        if let Some(pool) = self.pool.take() {
            self.rt.block_on(pool.close());
        }
        Ok(())
    }
}

impl Drop for PostgresBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
