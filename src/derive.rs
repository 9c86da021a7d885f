//! Derivation engine: attach lazy derived-property cells across the
//! materialized graph, then diff the computed snapshots against what was
//! last persisted and write back only the instances that changed.

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use serde_json::Value;

use crate::cache::Cache;
use crate::config::DeriveConfig;
use crate::error::{DeriveError, PersistFailure};
use crate::instance::Instance;
use crate::schema::Domain;
use crate::storage::{id_filter, Document};

/// Depth-first pre-order walk over a materialized graph.
///
/// The visitor runs at every node before its children; `hasMany` relations
/// recurse per element, `hasOne` relations recurse when resolved. Each
/// instance is visited once — association cycles and diamonds collapse on
/// instance identity. The visitor's effect is its side effects; nothing it
/// returns prunes the walk.
pub fn traverse(
    domain: &Domain,
    type_name: &str,
    instance: &Arc<Instance>,
    visit: &mut dyn FnMut(&str, &Arc<Instance>),
) {
    let mut seen = std::collections::HashSet::new();
    walk(domain, type_name, instance, visit, &mut seen);
}

fn walk(
    domain: &Domain,
    type_name: &str,
    instance: &Arc<Instance>,
    visit: &mut dyn FnMut(&str, &Arc<Instance>),
    seen: &mut std::collections::HashSet<usize>,
) {
    if !seen.insert(Arc::as_ptr(instance) as usize) {
        return;
    }
    visit(type_name, instance);
    let Some(type_def) = domain.type_def(type_name) else {
        return;
    };
    for (relation, assoc) in type_def.many_assocs() {
        for child in instance.many(assoc.slot_name(relation)) {
            walk(domain, assoc.of(), &child, visit, seen);
        }
    }
    for (relation, assoc) in type_def.one_assocs() {
        if let Some(child) = instance.one(assoc.slot_name(relation)) {
            walk(domain, assoc.of(), &child, visit, seen);
        }
    }
}

/// Recompute every derived property reachable from the root instance under
/// `key` and persist the snapshots that differ from storage.
pub async fn derive(
    cache: &Cache,
    domain: &Domain,
    config: &DeriveConfig,
    key: &str,
) -> Result<(), DeriveError> {
    let root = cache.load(domain.root(), key).await?;

    // Attach pass: every cell across the whole graph is in place before any
    // value is read, so no read can observe a half-attached node.
    traverse(domain, domain.root(), &root, &mut |type_name, instance| {
        let Some(type_def) = domain.type_def(type_name) else {
            return;
        };
        for (prop, def) in type_def.derived_props() {
            let compute = def.compute_fn();
            let target = Arc::downgrade(instance);
            instance.set_derived(
                prop.clone(),
                crate::lazy::Lazy::new(move || match target.upgrade() {
                    Some(instance) => compute(&instance),
                    None => Value::Null,
                }),
            );
        }
    });

    // Diff pass: snapshot each node's derived values and schedule a
    // write-back only when the snapshot differs from the persisted one.
    let mut writes: Vec<(String, String, Value)> = Vec::new();
    traverse(domain, domain.root(), &root, &mut |type_name, instance| {
        let Some(type_def) = domain.type_def(type_name) else {
            return;
        };
        if type_def.derived_props().is_empty() {
            return;
        }
        let mut snapshot = Document::new();
        for prop in type_def.derived_props().keys() {
            let value = instance.derived_value(prop).unwrap_or(Value::Null);
            snapshot.insert(prop.clone(), value);
        }
        let snapshot = Value::Object(snapshot);
        let unchanged = match instance.field(&config.derived_key) {
            Some(previous) => *previous == snapshot,
            // Absent counts as unequal unless there is nothing to persist.
            None => snapshot.as_object().map(|s| s.is_empty()).unwrap_or(false),
        };
        if unchanged {
            debug!("derive: {} '{:?}' unchanged, suppressing write", type_name, instance.id());
            return;
        }
        match instance.id() {
            Some(id) => writes.push((type_name.to_string(), id.to_string(), snapshot)),
            None => warn!(
                "derive: {} instance has no string _id, cannot persist snapshot",
                type_name
            ),
        }
    });

    let storage = cache.storage();
    let derived_key = config.derived_key.clone();
    let attempts = writes.into_iter().map(|(collection, id, snapshot)| {
        let derived_key = derived_key.clone();
        async move {
            let mut set = Document::new();
            set.insert(derived_key, snapshot);
            let result = storage
                .find_one_and_update(&collection, &id_filter(&id), set)
                .await;
            (collection, id, result)
        }
    });

    let mut failures = Vec::new();
    for (collection, id, result) in join_all(attempts).await {
        match result {
            Ok(Some(_)) => {}
            Ok(None) => warn!(
                "derive: write-back target {}:{} vanished before update",
                collection, id
            ),
            Err(source) => failures.push(PersistFailure {
                collection,
                id,
                source,
            }),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DeriveError::Persist { failures })
    }
}
