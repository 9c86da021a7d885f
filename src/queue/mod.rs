//! Change tracking: a typed decorator over a [`Storage`] backend that
//! watches inserts into domain collections, resolves the affected root
//! keys in the background, and lets callers drain and flush the
//! accumulated work on demand.
//!
//! ## Example
//!
//! ```ignore
//! use rederive::{DomainStore, MemoryStorage, Storage};
//!
//! let store = DomainStore::new(domain, Arc::new(MemoryStorage::new()));
//! store.insert_one("parts", part).await?;
//! store.wait_for_drain().await;
//! store.flush_pending_updates().await?;
//! ```

mod barrier;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use serde_json::Value;

use crate::config::DeriveConfig;
use crate::error::DeriveError;
use crate::resolve::find_root_keys_into;
use crate::schema::Domain;
use crate::storage::{Document, Storage, StorageError};
use crate::update::Updater;

use barrier::Barrier;

/// Error type for [`DomainStore::flush_pending_updates`]: the keys whose
/// updates failed, alongside their causes. Successful siblings completed.
#[derive(Debug)]
pub struct FlushError {
    pub failures: Vec<(String, DeriveError)>,
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flush failed for {} root(s): ", self.failures.len())?;
        for (i, (key, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "'{}': {}", key, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for FlushError {}

struct TrackerState {
    storage: Arc<dyn Storage>,
    domain: Arc<Domain>,
    updater: Updater,
    pending: Mutex<HashSet<String>>,
    barrier: Barrier,
}

/// Storage decorator that tracks writes to domain collections.
///
/// Reads and updates pass straight through to the wrapped backend. An
/// `insert_one` into a collection named in the domain additionally counts
/// as in-flight work on the completion barrier until the inserted
/// document's root keys have been resolved into the pending accumulator.
/// The accumulator and the barrier are independent surfaces: one answers
/// "what needs recomputing", the other "has everything in flight finished".
#[derive(Clone)]
pub struct DomainStore {
    state: Arc<TrackerState>,
}

impl DomainStore {
    pub fn new(domain: Arc<Domain>, storage: Arc<dyn Storage>) -> Self {
        Self::with_config(domain, storage, DeriveConfig::default())
    }

    pub fn with_config(
        domain: Arc<Domain>,
        storage: Arc<dyn Storage>,
        config: DeriveConfig,
    ) -> Self {
        let updater = Updater::with_config(domain.clone(), storage.clone(), config);
        DomainStore {
            state: Arc::new(TrackerState {
                storage,
                domain,
                updater,
                pending: Mutex::new(HashSet::new()),
                barrier: Barrier::new(),
            }),
        }
    }

    /// The orchestrator driving this store's recomputations.
    pub fn updater(&self) -> &Updater {
        &self.state.updater
    }

    /// Snapshot of the root keys awaiting recomputation.
    pub fn pending_keys(&self) -> HashSet<String> {
        self.state
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notify the tracker of an insert performed outside this decorator.
    /// No-op for collections the domain does not declare.
    pub fn on_insert(&self, collection: &str, doc: &Document) {
        if self.state.domain.type_def(collection).is_none() {
            return;
        }
        self.state.barrier.enqueue();
        spawn_resolution(self.state.clone(), collection.to_string(), doc.clone());
    }

    /// Resolve when every currently in-flight root-key resolution has
    /// finished. Work enqueued after this call needs a new wait.
    pub async fn wait_for_drain(&self) {
        Barrier::wait(self.state.barrier.waiter()).await;
    }

    /// Drain in-flight resolutions, then run one update per distinct
    /// pending root key, in parallel.
    ///
    /// The waiter is taken and the accumulator snapshot-and-cleared before
    /// waiting, so keys resolved by work that starts afterwards stay queued
    /// for the next flush.
    pub async fn flush_pending_updates(&self) -> Result<(), FlushError> {
        let waiter = self.state.barrier.waiter();
        let keys: Vec<String> = {
            let mut pending = self
                .state
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.drain().collect()
        };
        Barrier::wait(waiter).await;
        debug!("flush_pending_updates: {} root key(s)", keys.len());

        let outcomes = join_all(keys.iter().map(|key| self.state.updater.update(key))).await;
        let failures: Vec<(String, DeriveError)> = keys
            .into_iter()
            .zip(outcomes)
            .filter_map(|(key, outcome)| outcome.err().map(|err| (key, err)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlushError { failures })
        }
    }
}

fn spawn_resolution(state: Arc<TrackerState>, collection: String, doc: Document) {
    tokio::spawn(async move {
        let mut keys = HashSet::new();
        let outcome =
            find_root_keys_into(&state.domain, state.storage.as_ref(), &collection, &doc, &mut keys)
                .await;
        if let Err(err) = outcome {
            warn!(
                "root-key resolution failed for insert into '{}': {}",
                collection, err
            );
        }
        // Keys gathered before a mid-climb failure still count.
        if !keys.is_empty() {
            let mut pending = state.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.extend(keys);
        }
        state.barrier.dequeue();
    });
}

#[async_trait]
impl Storage for DomainStore {
    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, StorageError> {
        self.state.storage.find(collection, filter).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, StorageError> {
        self.state.storage.find_one(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, StorageError> {
        if self.state.domain.type_def(collection).is_none() {
            return self.state.storage.insert_one(collection, doc).await;
        }
        self.state.barrier.enqueue();
        let mut tracked = doc.clone();
        let id = match self.state.storage.insert_one(collection, doc).await {
            Ok(id) => id,
            Err(err) => {
                self.state.barrier.dequeue();
                return Err(err);
            }
        };
        tracked
            .entry("_id".to_string())
            .or_insert_with(|| Value::String(id.clone()));
        spawn_resolution(self.state.clone(), collection.to_string(), tracked);
        Ok(id)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: Document,
    ) -> Result<Option<Document>, StorageError> {
        self.state
            .storage
            .find_one_and_update(collection, filter, set)
            .await
    }
}
