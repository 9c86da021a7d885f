use std::sync::Arc;

use async_trait::async_trait;
use rederive::{Assoc, Domain, Document, MemoryStorage, Storage, StorageError, TypeDef};
use serde_json::{json, Value};

pub fn doc(value: Value) -> Document {
    value.as_object().expect("fixture docs are objects").clone()
}

/// Root `things` hasMany `parts`; `total_weight` sums the parts' weights.
pub fn things_domain() -> Arc<Domain> {
    Arc::new(
        Domain::builder("things")
            .ty(
                "things",
                TypeDef::new()
                    .has_many("parts", Assoc::to("parts", "thing_id"))
                    .derived("total_weight", |thing| {
                        let total: i64 = thing
                            .many("parts")
                            .iter()
                            .filter_map(|part| part.field("weight").and_then(Value::as_i64))
                            .sum();
                        json!(total)
                    }),
            )
            .ty("parts", TypeDef::new())
            .build()
            .expect("valid fixture domain"),
    )
}

/// Same shape plus a back-reference: `parts` hasOne `thing`, closing a
/// cycle through the root's subgraph.
pub fn cyclic_domain() -> Arc<Domain> {
    Arc::new(
        Domain::builder("things")
            .ty(
                "things",
                TypeDef::new().has_many("parts", Assoc::to("parts", "thing_id")),
            )
            .ty(
                "parts",
                TypeDef::new().has_one("thing", Assoc::to("things", "thing_id").owner_key()),
            )
            .build()
            .expect("valid cyclic fixture domain"),
    )
}

/// Three levels with derived props at two of them: `things` hasMany
/// `parts`, `parts` hasMany `bolts`; `bolt_count` per part, `total_bolts`
/// per thing (read off the parts' derived cells).
pub fn deep_domain() -> Arc<Domain> {
    Arc::new(
        Domain::builder("things")
            .ty(
                "things",
                TypeDef::new()
                    .has_many("parts", Assoc::to("parts", "thing_id"))
                    .derived("total_bolts", |thing| {
                        let total: i64 = thing
                            .many("parts")
                            .iter()
                            .filter_map(|part| {
                                part.derived_value("bolt_count").and_then(|v| v.as_i64())
                            })
                            .sum();
                        json!(total)
                    }),
            )
            .ty(
                "parts",
                TypeDef::new()
                    .has_many("bolts", Assoc::to("bolts", "part_id"))
                    .derived("bolt_count", |part| json!(part.many("bolts").len())),
            )
            .ty("bolts", TypeDef::new())
            .build()
            .expect("valid deep fixture domain"),
    )
}

/// Delegates to a real `MemoryStorage`, failing selected operations so
/// failure paths can be exercised.
pub struct FailingStorage {
    inner: Arc<MemoryStorage>,
    fail_updates_in: Option<String>,
    fail_reads_of: Option<String>,
}

impl FailingStorage {
    pub fn new(inner: Arc<MemoryStorage>) -> Self {
        FailingStorage {
            inner,
            fail_updates_in: None,
            fail_reads_of: None,
        }
    }

    /// Every `find_one_and_update` against `collection` fails.
    pub fn failing_updates_in(mut self, collection: &str) -> Self {
        self.fail_updates_in = Some(collection.to_string());
        self
    }

    /// Every `find_one` whose filter selects `_id == key` fails.
    pub fn failing_reads_of(mut self, key: &str) -> Self {
        self.fail_reads_of = Some(key.to_string());
        self
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, StorageError> {
        self.inner.find(collection, filter).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, StorageError> {
        if let Some(key) = &self.fail_reads_of {
            if filter.get("_id").and_then(Value::as_str) == Some(key.as_str()) {
                return Err(StorageError::Backend(format!(
                    "injected read failure for '{}'",
                    key
                )));
            }
        }
        self.inner.find_one(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, StorageError> {
        self.inner.insert_one(collection, doc).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: Document,
    ) -> Result<Option<Document>, StorageError> {
        if self.fail_updates_in.as_deref() == Some(collection) {
            return Err(StorageError::Backend(format!(
                "injected write failure in '{}'",
                collection
            )));
        }
        self.inner.find_one_and_update(collection, filter, set).await
    }
}

pub async fn seed_thing(storage: &MemoryStorage, thing_id: &str, weights: &[i64]) {
    storage
        .insert_one("things", doc(json!({"_id": thing_id, "name": "X"})))
        .await
        .unwrap();
    for (i, weight) in weights.iter().enumerate() {
        storage
            .insert_one(
                "parts",
                doc(json!({
                    "_id": format!("{}-p{}", thing_id, i),
                    "thing_id": thing_id,
                    "weight": weight,
                })),
            )
            .await
            .unwrap();
    }
}
