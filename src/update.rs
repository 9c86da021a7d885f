use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use log::debug;

use crate::cache::Cache;
use crate::config::DeriveConfig;
use crate::derive::derive;
use crate::error::DeriveError;
use crate::materialize::materialize;
use crate::schema::Domain;
use crate::storage::{doc_id, Document, Storage};

/// Error type for [`Updater::resync`].
#[derive(Debug)]
pub enum ResyncError {
    /// The root-collection scan itself failed; nothing ran.
    Scan(crate::storage::StorageError),
    /// Some roots failed to update; the rest completed.
    Roots(Vec<(String, DeriveError)>),
}

impl fmt::Display for ResyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncError::Scan(source) => write!(f, "resync scan failed: {}", source),
            ResyncError::Roots(failures) => {
                write!(f, "resync failed for {} root(s): ", failures.len())?;
                for (i, (key, err)) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "'{}': {}", key, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ResyncError {}

/// Composes materialization and derivation into per-root update passes.
///
/// The pass counter is owned here and shared by every concurrent `update`
/// call, so overlapping passes interleave under one versioning space: a
/// node claimed by a newer pass is skipped by older ones. Exactly-once
/// recomputation under concurrent triggers on the same root is deliberately
/// not guaranteed; `resync` is the corrective.
pub struct Updater {
    domain: Arc<Domain>,
    storage: Arc<dyn Storage>,
    config: DeriveConfig,
    passes: AtomicU64,
}

impl Updater {
    pub fn new(domain: Arc<Domain>, storage: Arc<dyn Storage>) -> Self {
        Self::with_config(domain, storage, DeriveConfig::default())
    }

    pub fn with_config(
        domain: Arc<Domain>,
        storage: Arc<dyn Storage>,
        config: DeriveConfig,
    ) -> Self {
        Updater {
            domain,
            storage,
            config,
            passes: AtomicU64::new(0),
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Recompute one root: materialize the reachable graph under a fresh
    /// pass counter and cache, then derive and persist what changed.
    pub async fn update(&self, key: &str) -> Result<(), DeriveError> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("update: root '{}', pass {}", key, pass);
        let cache = Cache::new(self.storage.clone());
        materialize(&cache, &self.domain, self.domain.root(), key.to_string(), pass).await?;
        derive(&cache, &self.domain, &self.config, key).await
    }

    /// Recompute every root in the store. Roots run in parallel and fail
    /// independently; the error lists each failed root.
    pub async fn resync(&self) -> Result<(), ResyncError> {
        let docs = self
            .storage
            .find(self.domain.root(), &Document::new())
            .await
            .map_err(ResyncError::Scan)?;
        let keys: Vec<String> = docs.iter().filter_map(doc_id).collect();
        debug!("resync: {} root(s)", keys.len());

        let outcomes = join_all(keys.iter().map(|key| self.update(key))).await;
        let failures: Vec<(String, DeriveError)> = keys
            .into_iter()
            .zip(outcomes)
            .filter_map(|(key, outcome)| outcome.err().map(|err| (key, err)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ResyncError::Roots(failures))
        }
    }
}
