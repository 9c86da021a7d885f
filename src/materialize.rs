//! Graph materialization: load the full association graph reachable from a
//! root key into the pass cache, attaching a lazy accessor per relation.
//!
//! Each reachable instance is loaded at most once (the cache deduplicates)
//! and visited at most once per pass (the visit stamp short-circuits), so
//! traversal terminates on cyclic schemas. Sibling relations fan out in
//! parallel; every branch runs to completion before the first error, if
//! any, propagates.

use std::sync::{Arc, Weak};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use log::{debug, warn};
use serde_json::Value;

use crate::cache::Cache;
use crate::error::DeriveError;
use crate::instance::{AssocValue, Instance};
use crate::lazy::Lazy;
use crate::schema::{Assoc, Domain};
use crate::storage::{doc_id, id_filter, Document};

/// Load the subgraph under `(type_name, key)` into `cache`, stamped with
/// `pass`. Returns the entry instance.
pub fn materialize<'a>(
    cache: &'a Cache,
    domain: &'a Domain,
    type_name: &'a str,
    key: String,
    pass: u64,
) -> BoxFuture<'a, Result<Arc<Instance>, DeriveError>> {
    async move {
        let instance = cache.load(type_name, &key).await?;
        if !instance.claim(pass) {
            debug!("materialize: {} '{}' already visited in pass {}", type_name, key, pass);
            return Ok(instance);
        }
        // Build-time validation guarantees every traversed type is declared;
        // an undeclared one is a leaf, as in the derivation walk.
        let Some(type_def) = domain.type_def(type_name) else {
            return Ok(instance);
        };

        let mut branches = Vec::new();
        for (relation, assoc) in type_def.many_assocs() {
            branches.push(load_relation(cache, domain, &instance, relation, assoc, true, pass));
        }
        for (relation, assoc) in type_def.one_assocs() {
            branches.push(load_relation(cache, domain, &instance, relation, assoc, false, pass));
        }

        // All sibling branches run to completion; only then does the first
        // failure surface, so no branch is silently dropped mid-flight.
        let outcomes = join_all(branches).await;
        for outcome in outcomes {
            outcome?;
        }
        Ok(instance)
    }
    .boxed()
}

async fn load_relation(
    cache: &Cache,
    domain: &Domain,
    owner: &Arc<Instance>,
    relation: &str,
    assoc: &Assoc,
    many: bool,
    pass: u64,
) -> Result<(), DeriveError> {
    let slot = assoc.slot_name(relation).to_string();

    // Orientation rule: the foreign key normally lives on the related side
    // (`foreign_key == owner._id`); with `owner_key()` the owner carries it
    // and the related collection is queried by `_id == owner[foreign_key]`.
    let filter = if assoc.owner_has_foreign_key() {
        match owner.field(assoc.foreign_key()).and_then(Value::as_str) {
            Some(target) => id_filter(target),
            None => {
                warn!(
                    "materialize: {:?} has no usable '{}' field for relation '{}'",
                    owner,
                    assoc.foreign_key(),
                    relation
                );
                owner.set_assoc(slot, empty_cell(many));
                return Ok(());
            }
        }
    } else {
        let owner_id = owner.id().ok_or_else(|| DeriveError::BadId {
            type_name: assoc.of().to_string(),
            detail: format!("owner of relation '{}' has no string _id", relation),
        })?;
        let mut filter = Document::new();
        filter.insert(
            assoc.foreign_key().to_string(),
            Value::String(owner_id.to_string()),
        );
        filter
    };

    let docs = cache
        .storage()
        .find(assoc.of(), &filter)
        .await
        .map_err(|source| DeriveError::Load {
            type_name: assoc.of().to_string(),
            key: format!("{:?}", filter),
            source,
        })?;

    let mut children = Vec::with_capacity(docs.len());
    for doc in docs {
        let child_id = doc_id(&doc).ok_or_else(|| DeriveError::BadId {
            type_name: assoc.of().to_string(),
            detail: "fetched document lacks a string _id".to_string(),
        })?;
        let child = cache.prime(assoc.of(), &child_id, doc).await?;
        children.push((child_id, child));
    }

    // Attach the lazy slot before descending, mirroring the visit order the
    // derivation traversal expects. Cells hold weak handles; the cache keeps
    // the strong ones.
    let weaks: Vec<Weak<Instance>> = children.iter().map(|(_, c)| Arc::downgrade(c)).collect();
    let cell = if many {
        Lazy::new(move || {
            AssocValue::Many(weaks.iter().filter_map(Weak::upgrade).collect())
        })
    } else {
        Lazy::new(move || AssocValue::One(weaks.first().and_then(Weak::upgrade)))
    };
    owner.set_assoc(slot, cell);

    let descents = children
        .iter()
        .map(|(child_id, _)| materialize(cache, domain, assoc.of(), child_id.clone(), pass));
    let outcomes = join_all(descents).await;
    for outcome in outcomes {
        outcome?;
    }
    Ok(())
}

fn empty_cell(many: bool) -> Lazy<AssocValue> {
    if many {
        Lazy::ready(AssocValue::Many(Vec::new()))
    } else {
        Lazy::ready(AssocValue::One(None))
    }
}
