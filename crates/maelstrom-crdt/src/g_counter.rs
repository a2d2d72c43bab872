//! Grow-only Counter (G-Counter) CRDT.
//!
//! Maintains one non-negative slot per contributing node; merge takes
//! the pointwise maximum. The total is the sum of all slots, which only
//! ever increases as slots are merged or incremented.

use crate::{Crdt, CounterDelta, CrdtResult};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GCounter {
    counters: HashMap<String, u64>,
}

impl GCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }
}

impl Crdt for GCounter {
    type Add = CounterDelta;

    fn from_serialisable(value: Value) -> CrdtResult<Self> {
        let counters: HashMap<String, u64> = serde_json::from_value(value)?;
        Ok(Self { counters })
    }

    fn to_serialisable(&self) -> Value {
        serde_json::to_value(&self.counters).expect("HashMap<String, u64> always serializes")
    }

    fn read(&self) -> Value {
        Value::from(self.total())
    }

    fn merge(&self, other: &Self) -> Self {
        let mut counters = self.counters.clone();
        for (node_id, &value) in &other.counters {
            let slot = counters.entry(node_id.clone()).or_insert(0);
            *slot = (*slot).max(value);
        }
        Self { counters }
    }

    fn add(&self, element: CounterDelta) -> Self {
        let mut counters = self.counters.clone();
        let amount = element.delta.max(0) as u64;
        let slot = counters.entry(element.node_id).or_insert(0);
        *slot += amount;
        Self { counters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(node_id: &str, delta: i64) -> CounterDelta {
        CounterDelta {
            node_id: node_id.to_string(),
            delta,
        }
    }

    #[test]
    fn add_accumulates_per_node() {
        let c = GCounter::new().add(delta("n1", 3)).add(delta("n1", 2));
        assert_eq!(c.total(), 5);
    }

    #[test]
    fn merge_takes_pointwise_max() {
        let a = GCounter::new().add(delta("n1", 10)).add(delta("n2", 5));
        let b = GCounter::new().add(delta("n1", 8)).add(delta("n2", 15));
        let merged = a.merge(&b);
        assert_eq!(merged.total(), 25); // max(10,8) + max(5,15)
    }

    #[test]
    fn merge_is_idempotent_commutative_associative() {
        let a = GCounter::new().add(delta("n1", 3));
        let b = GCounter::new().add(delta("n2", 4));
        let c = GCounter::new().add(delta("n3", 5));

        assert_eq!(a.merge(&a).total(), a.total());
        assert_eq!(a.merge(&b).total(), b.merge(&a).total());
        assert_eq!(
            a.merge(&b).merge(&c).total(),
            a.merge(&b.merge(&c)).total()
        );
    }

    #[test]
    fn merge_dominates_add() {
        let x = GCounter::new().add(delta("n1", 1));
        let added = x.add(delta("n1", 4));
        assert_eq!(x.merge(&added).total(), added.total());
    }

    #[test]
    fn read_is_the_sum_across_nodes() {
        let c = GCounter::new()
            .add(delta("n1", 3))
            .add(delta("n2", 2))
            .add(delta("n3", 7));
        assert_eq!(c.read(), Value::from(12));
    }

    #[test]
    fn serialisation_round_trips() {
        let c = GCounter::new().add(delta("n1", 7)).add(delta("n2", 1));
        let restored = GCounter::from_serialisable(c.to_serialisable()).unwrap();
        assert_eq!(c.total(), restored.total());
    }

    #[test]
    fn zero_delta_is_a_no_op() {
        let c = GCounter::new().add(delta("n1", 0));
        assert_eq!(c.total(), 0);
    }
}
