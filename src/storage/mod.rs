//! Storage collaborator seam.
//!
//! The engine only ever talks to the document store through the [`Storage`]
//! trait: equality-filtered reads, single-document inserts, and `$set`-style
//! partial updates. Collection names are domain type names. The crate ships
//! [`MemoryStorage`] as the in-process backend; embedding applications
//! provide their own implementation for a real store.

mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryStorage;

/// A JSON document, keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Error type for storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A lock guarding backend state was poisoned.
    LockPoisoned(&'static str),
    /// The document carries an `_id` that is not a JSON string.
    BadId(String),
    /// Backend-specific failure.
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::LockPoisoned(operation) => {
                write!(f, "storage lock poisoned during {}", operation)
            }
            StorageError::BadId(detail) => write!(f, "document has unusable _id: {}", detail),
            StorageError::Backend(message) => write!(f, "storage backend error: {}", message),
        }
    }
}

impl std::error::Error for StorageError {}

/// Async document-store operations the engine requires.
///
/// `filter` arguments are equality filters: a document matches when every
/// filter field is structurally equal to the same field on the document.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All documents in `collection` matching `filter`.
    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, StorageError>;

    /// First document in `collection` matching `filter`, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, StorageError>;

    /// Insert one document, returning its id. An `_id` is assigned when the
    /// document does not carry one.
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, StorageError>;

    /// Apply a `$set`-style shallow merge of `set` onto the first matching
    /// document, returning the updated document, or `None` when nothing
    /// matched.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: Document,
    ) -> Result<Option<Document>, StorageError>;
}

/// Equality filter selecting a document by `_id`.
pub fn id_filter(key: &str) -> Document {
    let mut filter = Document::new();
    filter.insert("_id".to_string(), Value::String(key.to_string()));
    filter
}

/// Read a document's `_id` as a string key.
pub fn doc_id(doc: &Document) -> Option<String> {
    doc.get("_id").and_then(Value::as_str).map(str::to_string)
}
