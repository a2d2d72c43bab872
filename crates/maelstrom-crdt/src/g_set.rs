//! Grow-only Set (G-Set) CRDT.
//!
//! A G-Set only ever grows: `merge` is set union and `add` inserts one
//! element. Both are trivially idempotent, commutative, and
//! associative, since set union is.

use crate::{Crdt, CrdtResult};
use serde_json::Value;
use std::collections::HashSet;

/// Wraps a set of JSON values. Elements are compared by their canonical
/// JSON text since [`serde_json::Value`] isn't `Hash`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GSet {
    elements: HashSet<String>,
}

impl GSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(value: &Value) -> String {
        value.to_string()
    }
}

impl Crdt for GSet {
    type Add = Value;

    fn from_serialisable(value: Value) -> CrdtResult<Self> {
        let values: Vec<Value> = serde_json::from_value(value)?;
        Ok(Self {
            elements: values.iter().map(Self::key).collect(),
        })
    }

    fn to_serialisable(&self) -> Value {
        self.read()
    }

    fn read(&self) -> Value {
        let mut values: Vec<Value> = self
            .elements
            .iter()
            .map(|s| serde_json::from_str(s).expect("round-trips through to_string"))
            .collect();
        // Stable order makes test assertions and log output deterministic;
        // the set semantics themselves don't care.
        values.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        Value::Array(values)
    }

    fn merge(&self, other: &Self) -> Self {
        Self {
            elements: self.elements.union(&other.elements).cloned().collect(),
        }
    }

    fn add(&self, element: Value) -> Self {
        let mut elements = self.elements.clone();
        elements.insert(Self::key(&element));
        Self { elements }
    }
}

impl GSet {
    /// Like [`Crdt::add`], but also reports whether `element` was new to
    /// the set. Broadcast workloads use this to decide whether a message
    /// needs to be re-gossiped to neighbours.
    pub fn insert_new(&self, element: Value) -> (Self, bool) {
        let key = Self::key(&element);
        let is_new = !self.elements.contains(&key);
        let mut elements = self.elements.clone();
        elements.insert(key);
        (Self { elements }, is_new)
    }
}
