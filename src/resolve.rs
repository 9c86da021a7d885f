//! Root-key resolution: given a changed leaf document, the set of root
//! aggregate keys whose derived state may now be stale.
//!
//! The walk climbs the schema's reverse edges — every type with an
//! association pointing at the changed type — fetching intermediate
//! instances until it reaches the root, at which point the changed
//! document's own foreign key is the root key. Diamond shapes collapse in
//! the set accumulator; cycles below the root are rejected at schema build
//! time, so the climb always terminates.

use std::collections::HashSet;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use serde_json::Value;

use crate::schema::Domain;
use crate::storage::{id_filter, Document, Storage};

/// Resolve the root keys affected by a change to `doc` of type `type_name`.
pub async fn find_root_keys(
    domain: &Domain,
    storage: &dyn Storage,
    type_name: &str,
    doc: &Document,
) -> Result<HashSet<String>, crate::storage::StorageError> {
    let mut keys = HashSet::new();
    find_root_keys_into(domain, storage, type_name, doc, &mut keys).await?;
    Ok(keys)
}

/// Like [`find_root_keys`], folding results into a caller-owned accumulator.
pub async fn find_root_keys_into(
    domain: &Domain,
    storage: &dyn Storage,
    type_name: &str,
    doc: &Document,
    keys: &mut HashSet<String>,
) -> Result<(), crate::storage::StorageError> {
    climb(domain, storage, type_name, doc.clone(), keys).await
}

fn climb<'a>(
    domain: &'a Domain,
    storage: &'a dyn Storage,
    type_name: &'a str,
    doc: Document,
    keys: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<(), crate::storage::StorageError>> {
    async move {
        for (referring, assoc) in domain.referring_types(type_name) {
            debug!(
                "find_root_keys: {} referred by {} via '{}'",
                type_name,
                referring,
                assoc.foreign_key()
            );
            let key = match doc.get(assoc.foreign_key()).and_then(Value::as_str) {
                Some(key) => key,
                None => {
                    warn!(
                        "find_root_keys: {} document carries no usable '{}' field, skipping branch",
                        type_name,
                        assoc.foreign_key()
                    );
                    continue;
                }
            };
            if referring == domain.root() {
                keys.insert(key.to_string());
                continue;
            }
            match storage.find_one(referring, &id_filter(key)).await? {
                Some(other) => climb(domain, storage, referring, other, keys).await?,
                None => warn!(
                    "find_root_keys: dangling foreign key, no {} with _id '{}'",
                    referring, key
                ),
            }
        }
        Ok(())
    }
    .boxed()
}
