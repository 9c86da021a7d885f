use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::error::DeriveError;
use crate::instance::Instance;
use crate::storage::{id_filter, Document, Storage};

type Entry = Arc<OnceCell<Arc<Instance>>>;

/// Per-pass instance cache and load deduplicator.
///
/// One `Cache` is constructed per materialize+derive pass; reusing it across
/// passes would defeat the visit stamping, since every cached instance
/// already looks visited. Each `(type, key)` maps to a one-shot cell, so
/// concurrent `load` calls collapse into a single storage fetch and all
/// callers share the resulting instance.
pub struct Cache {
    storage: Arc<dyn Storage>,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl Cache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Cache {
            storage,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn entry(&self, type_name: &str, key: &str) -> Result<Entry, DeriveError> {
        let mut entries = self.entries.lock().map_err(|_| DeriveError::CachePoisoned)?;
        Ok(entries
            .entry((type_name.to_string(), key.to_string()))
            .or_default()
            .clone())
    }

    /// The cached instance for `(type_name, key)`, fetching it from storage
    /// at most once no matter how many callers arrive concurrently.
    pub async fn load(&self, type_name: &str, key: &str) -> Result<Arc<Instance>, DeriveError> {
        let cell = self.entry(type_name, key)?;
        let instance = cell
            .get_or_try_init(|| async {
                match self.storage.find_one(type_name, &id_filter(key)).await {
                    Ok(Some(doc)) => Ok(Arc::new(Instance::new(doc))),
                    Ok(None) => Err(DeriveError::Missing {
                        type_name: type_name.to_string(),
                        key: key.to_string(),
                    }),
                    Err(source) => Err(DeriveError::Load {
                        type_name: type_name.to_string(),
                        key: key.to_string(),
                        source,
                    }),
                }
            })
            .await?;
        Ok(instance.clone())
    }

    /// Seed the cache with an already-fetched document, bypassing storage.
    ///
    /// Within a pass the first instance wins: priming a key that is already
    /// cached returns the existing instance instead of replacing it, so a
    /// node reached twice (diamonds, cycles) keeps its identity and its
    /// visit stamp.
    pub async fn prime(
        &self,
        type_name: &str,
        key: &str,
        doc: Document,
    ) -> Result<Arc<Instance>, DeriveError> {
        let cell = self.entry(type_name, key)?;
        let instance = cell
            .get_or_init(|| async move { Arc::new(Instance::new(doc)) })
            .await;
        Ok(instance.clone())
    }

    /// Evict an entry.
    pub fn clear(&self, type_name: &str, key: &str) -> Result<(), DeriveError> {
        let mut entries = self.entries.lock().map_err(|_| DeriveError::CachePoisoned)?;
        entries.remove(&(type_name.to_string(), key.to_string()));
        Ok(())
    }
}
