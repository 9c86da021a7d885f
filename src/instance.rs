use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::lazy::Lazy;
use crate::storage::Document;

/// The resolved target(s) of one association slot.
#[derive(Clone)]
pub enum AssocValue {
    Many(Vec<Arc<Instance>>),
    One(Option<Arc<Instance>>),
}

/// A materialized document: the stored fields plus the pass-scoped state
/// the engine hangs off it — a visit stamp, lazy association slots, and
/// lazy derived-property cells.
///
/// Instances are shared as `Arc<Instance>`. The pass cache holds the only
/// strong references between instances; association cells capture `Weak`
/// handles, so a schema cycle cannot keep a dropped pass alive.
pub struct Instance {
    doc: Document,
    version: AtomicU64,
    assocs: RwLock<HashMap<String, Lazy<AssocValue>>>,
    derived: RwLock<HashMap<String, Lazy<Value>>>,
}

impl Instance {
    pub fn new(doc: Document) -> Self {
        Instance {
            doc,
            version: AtomicU64::new(0),
            assocs: RwLock::new(HashMap::new()),
            derived: RwLock::new(HashMap::new()),
        }
    }

    /// The document's `_id`, when it is a JSON string.
    pub fn id(&self) -> Option<&str> {
        self.doc.get("_id").and_then(Value::as_str)
    }

    /// A stored field of the underlying document.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.doc.get(name)
    }

    /// Stamp this instance as visited by `pass`.
    ///
    /// Returns `false` when the instance was already claimed by this pass or
    /// a newer one — the caller must not descend again. The stamp is set
    /// before any children are traversed, which is what makes one pass
    /// terminate on cyclic schemas.
    pub(crate) fn claim(&self, pass: u64) -> bool {
        self.version.fetch_max(pass, Ordering::SeqCst) < pass
    }

    pub(crate) fn set_assoc(&self, slot: String, cell: Lazy<AssocValue>) {
        self.assocs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, cell);
    }

    pub(crate) fn set_derived(&self, prop: String, cell: Lazy<Value>) {
        self.derived
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prop, cell);
    }

    /// Resolve a `hasMany` association slot. A `hasOne` slot read this way
    /// yields zero or one element; an unresolved slot yields nothing.
    pub fn many(&self, slot: &str) -> Vec<Arc<Instance>> {
        let assocs = self.assocs.read().unwrap_or_else(PoisonError::into_inner);
        match assocs.get(slot).map(Lazy::get) {
            Some(AssocValue::Many(instances)) => instances,
            Some(AssocValue::One(Some(instance))) => vec![instance],
            Some(AssocValue::One(None)) | None => Vec::new(),
        }
    }

    /// Resolve a `hasOne` association slot. A `hasMany` slot read this way
    /// yields its first element.
    pub fn one(&self, slot: &str) -> Option<Arc<Instance>> {
        let assocs = self.assocs.read().unwrap_or_else(PoisonError::into_inner);
        match assocs.get(slot).map(Lazy::get) {
            Some(AssocValue::Many(instances)) => instances.into_iter().next(),
            Some(AssocValue::One(instance)) => instance,
            None => None,
        }
    }

    /// Read a derived-property cell, evaluating it on first access.
    /// `None` when no cell of that name is attached.
    pub fn derived_value(&self, prop: &str) -> Option<Value> {
        let derived = self.derived.read().unwrap_or_else(PoisonError::into_inner);
        derived.get(prop).map(Lazy::get)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id())
            .field("version", &self.version.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
