//! Incremental derived-property engine for document stores.
//!
//! Given a domain schema (types, `hasMany`/`hasOne` associations, derived
//! properties) and a changed document, `rederive` resolves which root
//! aggregates are affected, materializes the dependency graph reachable
//! from each root, recomputes every derived property through lazy memoized
//! cells, and persists only the snapshots that actually changed.

mod cache;
mod config;
mod derive;
mod error;
mod instance;
mod lazy;
mod materialize;
mod queue;
mod resolve;
mod schema;
mod storage;
mod update;

pub use cache::Cache;
pub use config::DeriveConfig;
pub use derive::{derive as derive_graph, traverse};
pub use error::{DeriveError, PersistFailure};
pub use instance::{AssocValue, Instance};
pub use lazy::Lazy;
pub use materialize::materialize;
pub use queue::{DomainStore, FlushError};
pub use resolve::{find_root_keys, find_root_keys_into};
pub use schema::{Assoc, DerivedProp, Domain, DomainBuilder, SchemaError, TypeDef};
pub use storage::{doc_id, id_filter, Document, MemoryStorage, Storage, StorageError};
pub use update::{ResyncError, Updater};
