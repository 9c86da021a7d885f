use std::fmt;

use crate::storage::StorageError;

/// One failed write-back during the persist pass.
#[derive(Debug)]
pub struct PersistFailure {
    pub collection: String,
    pub id: String,
    pub source: StorageError,
}

impl fmt::Display for PersistFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.collection, self.id, self.source)
    }
}

/// Error type for a single materialize+derive pass.
#[derive(Debug)]
pub enum DeriveError {
    /// A document the pass needed does not exist.
    Missing { type_name: String, key: String },
    /// A storage read failed while loading part of the graph.
    Load {
        type_name: String,
        key: String,
        source: StorageError,
    },
    /// A fetched document has no usable string `_id`.
    BadId { type_name: String, detail: String },
    /// One or more write-backs failed; the rest were still attempted.
    Persist { failures: Vec<PersistFailure> },
    /// A storage operation outside graph loading failed.
    Storage(StorageError),
    /// The cache entry map lock was poisoned.
    CachePoisoned,
}

impl fmt::Display for DeriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeriveError::Missing { type_name, key } => {
                write!(f, "no {} document with key '{}'", type_name, key)
            }
            DeriveError::Load {
                type_name,
                key,
                source,
            } => write!(f, "failed to load {} '{}': {}", type_name, key, source),
            DeriveError::BadId { type_name, detail } => {
                write!(f, "{} document has unusable _id: {}", type_name, detail)
            }
            DeriveError::Persist { failures } => {
                write!(
                    f,
                    "{} derived-property write-back(s) failed: ",
                    failures.len()
                )?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", failure)?;
                }
                Ok(())
            }
            DeriveError::Storage(source) => write!(f, "storage error: {}", source),
            DeriveError::CachePoisoned => write!(f, "instance cache lock poisoned"),
        }
    }
}

impl std::error::Error for DeriveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeriveError::Load { source, .. } | DeriveError::Storage(source) => Some(source),
            _ => None,
        }
    }
}

impl From<StorageError> for DeriveError {
    fn from(err: StorageError) -> Self {
        DeriveError::Storage(err)
    }
}
