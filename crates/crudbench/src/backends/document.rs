//! Document store backend on sled.
//!
//! Documents are JSON bodies keyed by a generated id in the
//! `testcollection` tree; categories live in their own tree. Secondary
//! indexes are one tree per field.
//!
//! Index key format: `[field value][0x00][document id:8 BE]`, empty value.
//! Fixture values never contain `0x00`, so a prefix scan over the raw value
//! bytes is a "starts with" scan and a scan over `value + 0x00` is an exact
//! match.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};

use crate::error::BackendError;
use crate::fixtures::{generate_categories, generate_records, RecordData};
use crate::operation::{Field, Operation, Outcome, ResetScope};

use super::{Backend, BackendKind};

/// Backend identity.
pub const NAME: &str = "document";

const COLLECTION_TREE: &str = "testcollection";
const CATEGORY_TREE: &str = "categories";
const INDEX_CATALOG_TREE: &str = "index:catalog";

/// Tree name prefix for secondary indexes.
pub const INDEX_TREE_PREFIX: &str = "index:testcollection:";

const INDEX_SEPARATOR: u8 = 0x00;

const EMPTY: &[u8] = &[];

/// A document in the record collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: u64,
    pub test_field: String,
    pub status: String,
    pub category_id: i64,
}

impl Document {
    fn from_record(id: u64, record: RecordData) -> Self {
        Self {
            id,
            test_field: record.test_field,
            status: record.status,
            category_id: record.category_id,
        }
    }

    fn field_value(&self, field: Field) -> String {
        match field {
            Field::TestField => self.test_field.clone(),
            Field::Status => self.status.clone(),
            Field::CategoryId => self.category_id.to_string(),
        }
    }
}

/// A document in the category collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDocument {
    #[serde(rename = "_id")]
    pub id: i64,
    pub label: String,
}

/// A record document with its category looked up.
#[derive(Debug, Clone)]
pub struct JoinedDocument {
    pub record: Document,
    pub category: CategoryDocument,
}

fn index_key(value: &str, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + 9);
    key.extend_from_slice(value.as_bytes());
    key.push(INDEX_SEPARATOR);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn exact_prefix(value: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(value.len() + 1);
    prefix.extend_from_slice(value.as_bytes());
    prefix.push(INDEX_SEPARATOR);
    prefix
}

fn id_from_index_key(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Open handles of a live store.
struct Store {
    db: Db,
    collection: Tree,
    categories: Tree,
    catalog: Tree,
    /// Fields with a secondary index, mirrored from the catalog tree.
    indexed: Vec<Field>,
}

impl Store {
    fn open(db: Db) -> Result<Self, BackendError> {
        let collection = db.open_tree(COLLECTION_TREE)?;
        let categories = db.open_tree(CATEGORY_TREE)?;
        let catalog = db.open_tree(INDEX_CATALOG_TREE)?;

        let mut indexed = Vec::new();
        for entry in catalog.iter() {
            let (name, _) = entry?;
            if let Some(field) = Field::all()
                .into_iter()
                .find(|f| f.name().as_bytes() == name.as_ref())
            {
                indexed.push(field);
            }
        }

        Ok(Self {
            db,
            collection,
            categories,
            catalog,
            indexed,
        })
    }

    fn index_tree(&self, field: Field) -> Result<Tree, BackendError> {
        Ok(self
            .db
            .open_tree(format!("{}{}", INDEX_TREE_PREFIX, field.name()))?)
    }

    fn is_indexed(&self, field: Field) -> bool {
        self.indexed.contains(&field)
    }

    fn commit(&self) -> Result<(), BackendError> {
        self.db.flush()?;
        Ok(())
    }

    fn get(&self, id: u64) -> Result<Option<Document>, BackendError> {
        match self.collection.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn documents(&self) -> impl Iterator<Item = Result<Document, BackendError>> + '_ {
        self.collection.iter().map(|entry| -> Result<Document, BackendError> {
            let (_, bytes) = entry?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }

    /// Documents whose index key for `field` starts with `prefix`.
    fn by_index_prefix(&self, field: Field, prefix: &[u8]) -> Result<Vec<Document>, BackendError> {
        let tree = self.index_tree(field)?;
        let mut docs = Vec::new();
        for entry in tree.scan_prefix(prefix) {
            let (key, _) = entry?;
            let Some(id) = id_from_index_key(&key) else {
                continue;
            };
            if let Some(doc) = self.get(id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn find_one(&self, value: &str) -> Result<Option<Document>, BackendError> {
        if self.is_indexed(Field::TestField) {
            let tree = self.index_tree(Field::TestField)?;
            return match tree.scan_prefix(exact_prefix(value)).next() {
                Some(entry) => {
                    let (key, _) = entry?;
                    match id_from_index_key(&key) {
                        Some(id) => self.get(id),
                        None => Ok(None),
                    }
                }
                None => Ok(None),
            };
        }

        for doc in self.documents() {
            let doc = doc?;
            if doc.test_field == value {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    fn find_prefix(&self, prefix: &str) -> Result<Vec<Document>, BackendError> {
        if self.is_indexed(Field::TestField) {
            return self.by_index_prefix(Field::TestField, prefix.as_bytes());
        }

        let mut docs = Vec::new();
        for doc in self.documents() {
            let doc = doc?;
            if doc.test_field.starts_with(prefix) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn insert(&self, record: RecordData) -> Result<(), BackendError> {
        let doc = Document::from_record(self.db.generate_id()?, record);
        self.collection
            .insert(doc.id.to_be_bytes(), serde_json::to_vec(&doc)?)?;
        for &field in &self.indexed {
            self.index_tree(field)?
                .insert(index_key(&doc.field_value(field), doc.id), EMPTY)?;
        }
        Ok(())
    }

    fn replace(&self, old: &Document, new: &Document) -> Result<(), BackendError> {
        self.collection
            .insert(new.id.to_be_bytes(), serde_json::to_vec(new)?)?;
        for &field in &self.indexed {
            let (before, after) = (old.field_value(field), new.field_value(field));
            if before != after {
                let tree = self.index_tree(field)?;
                tree.remove(index_key(&before, old.id))?;
                tree.insert(index_key(&after, new.id), EMPTY)?;
            }
        }
        Ok(())
    }

    fn remove(&self, doc: &Document) -> Result<(), BackendError> {
        self.collection.remove(doc.id.to_be_bytes())?;
        for &field in &self.indexed {
            self.index_tree(field)?
                .remove(index_key(&doc.field_value(field), doc.id))?;
        }
        Ok(())
    }

    fn create_index(&mut self, field: Field) -> Result<bool, BackendError> {
        if self.catalog.contains_key(field.name())? {
            return Ok(false);
        }

        let tree = self.index_tree(field)?;
        let mut batch = Batch::default();
        for doc in self.documents() {
            let doc = doc?;
            batch.insert(index_key(&doc.field_value(field), doc.id), EMPTY);
        }
        tree.apply_batch(batch)?;
        self.catalog.insert(field.name(), EMPTY)?;
        self.indexed.push(field);
        self.commit()?;
        Ok(true)
    }

    /// Each field leaves the catalog and `indexed` only once its tree is gone.
    fn drop_indexes(&mut self) -> Result<(), BackendError> {
        for field in self.indexed.clone() {
            self.db
                .drop_tree(format!("{}{}", INDEX_TREE_PREFIX, field.name()))?;
            self.catalog.remove(field.name())?;
            self.indexed.retain(|&f| f != field);
        }
        self.catalog.clear()?;
        self.commit()
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.collection.clear()?;
        self.categories.clear()?;
        for &field in &self.indexed {
            self.index_tree(field)?.clear()?;
        }
        self.commit()
    }

    fn seed(&self, records: usize) -> Result<(), BackendError> {
        self.clear()?;

        let mut categories = Batch::default();
        for category in generate_categories() {
            let doc = CategoryDocument {
                id: category.id,
                label: category.label,
            };
            categories.insert(doc.id.to_be_bytes().to_vec(), serde_json::to_vec(&doc)?);
        }
        self.categories.apply_batch(categories)?;

        let mut docs = Batch::default();
        let mut index_batches: Vec<(Field, Batch)> =
            self.indexed.iter().map(|&f| (f, Batch::default())).collect();
        for record in generate_records(records) {
            let doc = Document::from_record(self.db.generate_id()?, record);
            for (field, batch) in &mut index_batches {
                batch.insert(index_key(&doc.field_value(*field), doc.id), EMPTY);
            }
            docs.insert(doc.id.to_be_bytes().to_vec(), serde_json::to_vec(&doc)?);
        }
        self.collection.apply_batch(docs)?;
        for (field, batch) in index_batches {
            self.index_tree(field)?.apply_batch(batch)?;
        }

        self.commit()
    }

    /// `$lookup` of each record's category, first `limit` matches.
    fn join(&self, limit: usize) -> Result<Vec<JoinedDocument>, BackendError> {
        let mut joined = Vec::with_capacity(limit.min(self.collection.len()));
        for doc in self.documents() {
            if joined.len() >= limit {
                break;
            }
            let record = doc?;
            if let Some(bytes) = self.categories.get(record.category_id.to_be_bytes())? {
                let category: CategoryDocument = serde_json::from_slice(&bytes)?;
                joined.push(JoinedDocument { record, category });
            }
        }
        Ok(joined)
    }
}

/// sled-backed document store.
pub struct DocumentBackend {
    store: Option<Store>,
}

impl DocumentBackend {
    /// Open a store at `path`, or a temporary store when `path` is `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, BackendError> {
        let config = match path {
            Some(path) => sled::Config::new().path(path),
            None => sled::Config::new().temporary(true),
        };
        let store = Store::open(config.open()?)?;

        Ok(Self { store: Some(store) })
    }

    /// Open a temporary store.
    pub fn temporary() -> Result<Self, BackendError> {
        Self::open(None)
    }

    fn store(&self) -> Result<&Store, BackendError> {
        self.store.as_ref().ok_or(BackendError::Closed)
    }

    fn store_mut(&mut self) -> Result<&mut Store, BackendError> {
        self.store.as_mut().ok_or(BackendError::Closed)
    }

    /// Whether a secondary index on `field` exists.
    pub fn has_index(&self, field: Field) -> Result<bool, BackendError> {
        Ok(self.store()?.catalog.contains_key(field.name())?)
    }

    /// Number of documents in the record collection.
    pub fn len(&self) -> Result<usize, BackendError> {
        Ok(self.store()?.collection.len())
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.store()?.collection.is_empty())
    }

    fn insert_one(&self, value: &str) -> Result<Outcome, BackendError> {
        let store = self.store()?;
        store.insert(RecordData {
            test_field: value.to_string(),
            status: "active".to_string(),
            category_id: 0,
        })?;
        store.commit()?;
        Ok(Outcome::Written(1))
    }

    /// One document insert per record, flushed once at the end.
    fn bulk_insert(&self, count: usize) -> Result<Outcome, BackendError> {
        let store = self.store()?;
        let mut written = 0u64;
        for record in generate_records(count) {
            store.insert(record)?;
            written += 1;
        }
        store.commit()?;
        Ok(Outcome::Written(written))
    }

    fn update(&self, matches: Vec<Document>, status: &str) -> Result<Outcome, BackendError> {
        let store = self.store()?;
        for old in &matches {
            let new = Document {
                status: status.to_string(),
                ..old.clone()
            };
            store.replace(old, &new)?;
        }
        store.commit()?;
        Ok(Outcome::Written(matches.len() as u64))
    }

    fn delete(&self, matches: Vec<Document>) -> Result<Outcome, BackendError> {
        let store = self.store()?;
        for doc in &matches {
            store.remove(doc)?;
        }
        store.commit()?;
        Ok(Outcome::Written(matches.len() as u64))
    }

    fn indexed_lookup(&self, field: Field, value: &str) -> Result<Outcome, BackendError> {
        let store = self.store()?;
        if !store.is_indexed(field) {
            return Err(BackendError::MissingIndex(field.name()));
        }
        let docs = store.by_index_prefix(field, &exact_prefix(value))?;
        Ok(Outcome::Matched(docs.len()))
    }
}

impl Backend for DocumentBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn execute(&mut self, operation: &Operation) -> Result<Outcome, BackendError> {
        match operation {
            Operation::InsertOne { value } => self.insert_one(value),
            Operation::BulkInsert { count } => self.bulk_insert(*count),
            Operation::PointLookup { value } => {
                let found = self.store()?.find_one(value)?;
                Ok(Outcome::Matched(usize::from(found.is_some())))
            }
            Operation::PatternLookup { prefix } => {
                Ok(Outcome::Matched(self.store()?.find_prefix(prefix)?.len()))
            }
            Operation::UpdateOne { value, status } => {
                let matches = self.store()?.find_one(value)?.into_iter().collect();
                self.update(matches, status)
            }
            Operation::BulkUpdate { prefix, status } => {
                let matches = self.store()?.find_prefix(prefix)?;
                self.update(matches, status)
            }
            Operation::DeleteOne { value } => {
                let matches = self.store()?.find_one(value)?.into_iter().collect();
                self.delete(matches)
            }
            Operation::BulkDelete { prefix } => {
                let matches = self.store()?.find_prefix(prefix)?;
                self.delete(matches)
            }
            Operation::CreateIndex { field } => Ok(Outcome::Index {
                created: self.store_mut()?.create_index(*field)?,
            }),
            Operation::IndexedLookup { field, value } => self.indexed_lookup(*field, value),
            Operation::Join { limit } => Ok(Outcome::Matched(self.store()?.join(*limit)?.len())),
        }
    }

    fn reset(&mut self, scope: &ResetScope) -> Result<(), BackendError> {
        match *scope {
            ResetScope::Empty => self.store()?.clear(),
            ResetScope::Seeded { records } => self.store()?.seed(records),
            ResetScope::Indexed { records, field } => {
                let store = self.store_mut()?;
                store.seed(records)?;
                store.create_index(field)?;
                Ok(())
            }
            ResetScope::Unindexed => self.store_mut()?.drop_indexes(),
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        match self.store.take() {
            Some(store) => store.commit(),
            None => Ok(()),
        }
    }
}

impl Drop for DocumentBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(backend = NAME, error = %e, "failed to flush on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{expected_prefix_matches, PATTERN_PREFIX, VALUE_PREFIX};

    fn seeded(records: usize) -> DocumentBackend {
        let mut backend = DocumentBackend::temporary().unwrap();
        backend.reset(&ResetScope::Seeded { records }).unwrap();
        backend
    }

    #[test]
    fn test_index_key_roundtrip_id() {
        let key = index_key("test_value_7", 42);
        assert!(key.starts_with(b"test_value_7\0"));
        assert_eq!(id_from_index_key(&key), Some(42));
    }

    #[test]
    fn test_bulk_insert_and_clear() {
        let mut backend = DocumentBackend::temporary().unwrap();
        let outcome = backend.execute(&Operation::BulkInsert { count: 100 }).unwrap();
        assert_eq!(outcome, Outcome::Written(100));
        assert_eq!(backend.len().unwrap(), 100);

        backend.reset(&ResetScope::Empty).unwrap();
        backend.reset(&ResetScope::Empty).unwrap();
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn test_point_lookup_with_and_without_index() {
        let mut backend = seeded(100);
        let op = Operation::PointLookup {
            value: "test_value_42".to_string(),
        };
        assert!(backend.execute(&op).unwrap().is_found());

        backend
            .execute(&Operation::CreateIndex {
                field: Field::TestField,
            })
            .unwrap();
        assert!(backend.execute(&op).unwrap().is_found());

        let missing = Operation::PointLookup {
            value: "test_value_4200".to_string(),
        };
        assert_eq!(backend.execute(&missing).unwrap(), Outcome::Matched(0));
    }

    #[test]
    fn test_pattern_lookup_counts() {
        let mut backend = seeded(200);
        let op = Operation::PatternLookup {
            prefix: PATTERN_PREFIX.to_string(),
        };
        let expected = Outcome::Matched(expected_prefix_matches(200, PATTERN_PREFIX));
        assert_eq!(backend.execute(&op).unwrap(), expected);

        backend
            .execute(&Operation::CreateIndex {
                field: Field::TestField,
            })
            .unwrap();
        assert_eq!(backend.execute(&op).unwrap(), expected);
    }

    #[test]
    fn test_updates_maintain_status_index() {
        let mut backend = seeded(40);
        backend
            .execute(&Operation::CreateIndex {
                field: Field::Status,
            })
            .unwrap();

        let outcome = backend
            .execute(&Operation::BulkUpdate {
                prefix: VALUE_PREFIX.to_string(),
                status: "archived".to_string(),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Written(40));

        let archived = backend
            .execute(&Operation::IndexedLookup {
                field: Field::Status,
                value: "archived".to_string(),
            })
            .unwrap();
        assert_eq!(archived, Outcome::Matched(40));

        let active = backend
            .execute(&Operation::IndexedLookup {
                field: Field::Status,
                value: "active".to_string(),
            })
            .unwrap();
        assert_eq!(active, Outcome::Matched(0));
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
        assert_eq!(backend.len().unwrap(), 49);

        let rest = backend
            .execute(&Operation::BulkDelete {
                prefix: VALUE_PREFIX.to_string(),
            })
            .unwrap();
        assert_eq!(rest, Outcome::Written(49));
        assert!(backend.is_empty().unwrap());
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
        backend.reset(&ResetScope::Unindexed).unwrap();
        assert!(!backend.has_index(Field::TestField).unwrap());
        assert_eq!(backend.len().unwrap(), 10);
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
    fn test_reseed_rebuilds_index_entries() {
        let mut backend = DocumentBackend::temporary().unwrap();
        backend
            .reset(&ResetScope::Indexed {
                records: 20,
                field: Field::TestField,
            })
            .unwrap();
        backend.reset(&ResetScope::Seeded { records: 20 }).unwrap();

        let outcome = backend
            .execute(&Operation::IndexedLookup {
                field: Field::TestField,
                value: "test_value_19".to_string(),
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Matched(1));
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
        let mut backend = DocumentBackend::temporary().unwrap();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(matches!(
            backend.execute(&Operation::Join { limit: 1 }),
            Err(BackendError::Closed)
        ));
    }

    #[test]
    fn test_indexes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut backend = DocumentBackend::open(Some(dir.path())).unwrap();
            backend.reset(&ResetScope::Seeded { records: 5 }).unwrap();
            backend
                .execute(&Operation::CreateIndex {
                    field: Field::TestField,
                })
                .unwrap();
            backend.close().unwrap();
        }

        let backend = DocumentBackend::open(Some(dir.path())).unwrap();
        assert!(backend.has_index(Field::TestField).unwrap());
        assert_eq!(backend.len().unwrap(), 5);
    }

    #[test]
    fn test_dropped_indexes_stay_dropped_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut backend = DocumentBackend::open(Some(dir.path())).unwrap();
            backend
                .reset(&ResetScope::Indexed {
                    records: 5,
                    field: Field::TestField,
                })
                .unwrap();
            backend
                .execute(&Operation::CreateIndex {
                    field: Field::Status,
                })
                .unwrap();
            backend.reset(&ResetScope::Unindexed).unwrap();

            let store = backend.store().unwrap();
            assert!(store.indexed.is_empty());
            assert!(store.catalog.is_empty());
            backend.close().unwrap();
        }

        let mut backend = DocumentBackend::open(Some(dir.path())).unwrap();
        assert!(!backend.has_index(Field::TestField).unwrap());
        assert!(!backend.has_index(Field::Status).unwrap());
        assert_eq!(
            backend
                .execute(&Operation::CreateIndex {
                    field: Field::TestField,
                })
                .unwrap(),
            Outcome::Index { created: true }
        );
        assert_eq!(
            backend
                .execute(&Operation::IndexedLookup {
                    field: Field::TestField,
                    value: "test_value_2".to_string(),
                })
                .unwrap(),
            Outcome::Matched(1)
        );
    }
}
