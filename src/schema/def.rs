use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::instance::Instance;

/// A declared `hasMany`/`hasOne` association from one type to another.
#[derive(Debug, Clone)]
pub struct Assoc {
    of: String,
    foreign_key: String,
    owner_has_foreign_key: bool,
    rename: Option<String>,
}

impl Assoc {
    /// Association to type `of`, linked by `foreign_key`.
    ///
    /// By default the foreign key lives on the related (many) side and the
    /// related collection is queried by `foreign_key == self._id`.
    pub fn to(of: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Assoc {
            of: of.into(),
            foreign_key: foreign_key.into(),
            owner_has_foreign_key: false,
            rename: None,
        }
    }

    /// The owner holds the foreign key: the related collection is queried by
    /// `_id == self[foreign_key]` instead.
    pub fn owner_key(mut self) -> Self {
        self.owner_has_foreign_key = true;
        self
    }

    /// Expose the relation on instances under a different slot name.
    pub fn renamed(mut self, slot: impl Into<String>) -> Self {
        self.rename = Some(slot.into());
        self
    }

    pub fn of(&self) -> &str {
        &self.of
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn owner_has_foreign_key(&self) -> bool {
        self.owner_has_foreign_key
    }

    /// The slot name this relation resolves under; defaults to the relation
    /// name it was declared with.
    pub fn slot_name<'a>(&'a self, relation: &'a str) -> &'a str {
        self.rename.as_deref().unwrap_or(relation)
    }
}

type ComputeFn = dyn Fn(&Instance) -> Value + Send + Sync;

/// A derived property: a pure function over a fully materialized instance.
///
/// The compute function may read the instance's fields, its resolved
/// associations, and derived values of *other* instances. It must not read
/// the derived cell it defines on its own instance.
#[derive(Clone)]
pub struct DerivedProp {
    compute: Arc<ComputeFn>,
}

impl DerivedProp {
    pub fn new(compute: impl Fn(&Instance) -> Value + Send + Sync + 'static) -> Self {
        DerivedProp {
            compute: Arc::new(compute),
        }
    }

    pub(crate) fn compute_fn(&self) -> Arc<ComputeFn> {
        self.compute.clone()
    }
}

impl fmt::Debug for DerivedProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedProp").finish_non_exhaustive()
    }
}

/// Associations and derived properties declared for one entity type.
#[derive(Debug, Clone, Default)]
pub struct TypeDef {
    has_many: BTreeMap<String, Assoc>,
    has_one: BTreeMap<String, Assoc>,
    derived: BTreeMap<String, DerivedProp>,
}

impl TypeDef {
    pub fn new() -> Self {
        TypeDef::default()
    }

    /// Declare a `hasMany` relation.
    pub fn has_many(mut self, relation: impl Into<String>, assoc: Assoc) -> Self {
        self.has_many.insert(relation.into(), assoc);
        self
    }

    /// Declare a `hasOne` relation.
    pub fn has_one(mut self, relation: impl Into<String>, assoc: Assoc) -> Self {
        self.has_one.insert(relation.into(), assoc);
        self
    }

    /// Declare a derived property computed by `f`.
    pub fn derived(
        mut self,
        prop: impl Into<String>,
        f: impl Fn(&Instance) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.derived.insert(prop.into(), DerivedProp::new(f));
        self
    }

    pub fn many_assocs(&self) -> &BTreeMap<String, Assoc> {
        &self.has_many
    }

    pub fn one_assocs(&self) -> &BTreeMap<String, Assoc> {
        &self.has_one
    }

    pub fn derived_props(&self) -> &BTreeMap<String, DerivedProp> {
        &self.derived
    }

    /// All declared associations, `hasMany` first.
    pub fn associations(&self) -> impl Iterator<Item = (&String, &Assoc)> {
        self.has_many.iter().chain(self.has_one.iter())
    }
}
