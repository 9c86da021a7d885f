//! Domain schema: entity types, their associations, and derived properties.
//!
//! A [`Domain`] is pure data, validated once at build time and immutable
//! afterwards. The designated root type is the aggregate whose instances
//! receive derived-property storage.
//!
//! ## Example
//!
//! ```
//! use rederive::{Assoc, Domain, TypeDef};
//! use serde_json::{json, Value};
//!
//! let domain = Domain::builder("things")
//!     .ty(
//!         "things",
//!         TypeDef::new()
//!             .has_many("parts", Assoc::to("parts", "thing_id"))
//!             .derived("total_weight", |thing| {
//!                 let total: f64 = thing
//!                     .many("parts")
//!                     .iter()
//!                     .filter_map(|part| part.field("weight").and_then(Value::as_f64))
//!                     .sum();
//!                 json!(total)
//!             }),
//!     )
//!     .ty("parts", TypeDef::new())
//!     .build()
//!     .unwrap();
//! assert_eq!(domain.root(), "things");
//! ```

mod def;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub use def::{Assoc, DerivedProp, TypeDef};

/// Error type for schema construction. All variants are fatal: a domain
/// that fails validation is never usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The type map is empty.
    NoTypes,
    /// The declared root is not one of the types.
    MissingRoot { root: String },
    /// An association points at a type that does not exist.
    UnknownTarget {
        type_name: String,
        relation: String,
        target: String,
    },
    /// A type is reverse-reachable from itself without passing through the
    /// root, which would make root-key resolution recurse forever.
    ReferringCycle { type_name: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::NoTypes => write!(f, "domain declares no types"),
            SchemaError::MissingRoot { root } => {
                write!(f, "domain root '{}' is not a declared type", root)
            }
            SchemaError::UnknownTarget {
                type_name,
                relation,
                target,
            } => write!(
                f,
                "association '{}' on type '{}' targets undeclared type '{}'",
                relation, type_name, target
            ),
            SchemaError::ReferringCycle { type_name } => write!(
                f,
                "type '{}' is reverse-reachable from itself without passing through the root",
                type_name
            ),
        }
    }
}

impl std::error::Error for SchemaError {}

/// A validated, immutable domain schema.
#[derive(Debug, Clone)]
pub struct Domain {
    root: String,
    types: BTreeMap<String, TypeDef>,
}

impl Domain {
    pub fn builder(root: impl Into<String>) -> DomainBuilder {
        DomainBuilder {
            root: root.into(),
            types: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn type_def(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Every `(referring type, association)` pair whose association points
    /// at `type_name`. This is the reverse edge set the root-key resolver
    /// climbs.
    pub fn referring_types<'a>(&'a self, type_name: &str) -> Vec<(&'a str, &'a Assoc)> {
        self.types
            .iter()
            .flat_map(|(referring, def)| {
                def.associations()
                    .map(move |(_, assoc)| (referring.as_str(), assoc))
            })
            .filter(|(_, assoc)| assoc.of() == type_name)
            .collect()
    }
}

/// Builder for [`Domain`]; `build()` runs all schema validation.
pub struct DomainBuilder {
    root: String,
    types: BTreeMap<String, TypeDef>,
}

impl DomainBuilder {
    /// Declare a type.
    pub fn ty(mut self, name: impl Into<String>, def: TypeDef) -> Self {
        self.types.insert(name.into(), def);
        self
    }

    pub fn build(self) -> Result<Domain, SchemaError> {
        if self.types.is_empty() {
            return Err(SchemaError::NoTypes);
        }
        if !self.types.contains_key(&self.root) {
            return Err(SchemaError::MissingRoot { root: self.root });
        }
        for (type_name, def) in &self.types {
            for (relation, assoc) in def.associations() {
                if !self.types.contains_key(assoc.of()) {
                    return Err(SchemaError::UnknownTarget {
                        type_name: type_name.clone(),
                        relation: relation.clone(),
                        target: assoc.of().to_string(),
                    });
                }
            }
        }
        let domain = Domain {
            root: self.root,
            types: self.types,
        };
        domain.check_referring_cycles()?;
        Ok(domain)
    }
}

impl Domain {
    /// Reject schemas where root-key resolution could climb forever.
    ///
    /// Resolution walks reverse edges (`assoc.of` -> owning type) and stops
    /// at the root, so only cycles that avoid the root are fatal.
    fn check_referring_cycles(&self) -> Result<(), SchemaError> {
        let mut done: HashSet<&str> = HashSet::new();
        for start in self.types.keys() {
            if start == &self.root || done.contains(start.as_str()) {
                continue;
            }
            let mut on_path: Vec<&str> = Vec::new();
            self.visit_referring(start, &mut on_path, &mut done)?;
        }
        Ok(())
    }

    fn visit_referring<'a>(
        &'a self,
        type_name: &'a str,
        on_path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), SchemaError> {
        if on_path.contains(&type_name) {
            return Err(SchemaError::ReferringCycle {
                type_name: type_name.to_string(),
            });
        }
        on_path.push(type_name);
        for (referring, _) in self.referring_types(type_name) {
            if referring == self.root || done.contains(referring) {
                continue;
            }
            self.visit_referring(referring, on_path, done)?;
        }
        on_path.pop();
        done.insert(type_name);
        Ok(())
    }
}
