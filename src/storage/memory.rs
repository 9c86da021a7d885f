use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{Document, Storage, StorageError};

/// In-memory document store backed by a map of collections.
///
/// Intended for tests and single-process embedding. Tracks how many times
/// each operation ran so callers can assert on write suppression.
pub struct MemoryStorage {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    finds: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            collections: RwLock::new(HashMap::new()),
            finds: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        }
    }

    /// Number of `find`/`find_one` calls served.
    pub fn find_count(&self) -> u64 {
        self.finds.load(Ordering::SeqCst)
    }

    /// Number of `insert_one` calls served.
    pub fn insert_count(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of `find_one_and_update` calls served.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, StorageError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::LockPoisoned("find"))?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, StorageError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::LockPoisoned("find_one"))?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| matches(doc, filter)).cloned()))
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> Result<String, StorageError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let id = match doc.get("_id") {
            None => {
                let id = Uuid::new_v4().to_string();
                doc.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
            Some(Value::String(id)) => id.clone(),
            Some(other) => return Err(StorageError::BadId(other.to_string())),
        };
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned("insert_one"))?;
        collections.entry(collection.to_string()).or_default().push(doc);
        Ok(id)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: Document,
    ) -> Result<Option<Document>, StorageError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned("find_one_and_update"))?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.iter_mut().find(|doc| matches(doc, filter)) else {
            return Ok(None);
        };
        for (field, value) in set {
            doc.insert(field, value);
        }
        Ok(Some(doc.clone()))
    }
}
