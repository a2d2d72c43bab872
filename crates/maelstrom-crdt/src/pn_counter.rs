//! Positive-Negative Counter (PN-Counter) CRDT.
//!
//! Composed from two [`GCounter`]s: one tallying increments, one
//! tallying decrements. The visible value is their difference, which
//! can move in either direction while both halves only ever grow.

use crate::{Crdt, CounterDelta, CrdtResult, GCounter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PNCounter {
    inc: GCounter,
    dec: GCounter,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    inc: Value,
    dec: Value,
}

impl PNCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> i64 {
        self.inc.total() as i64 - self.dec.total() as i64
    }
}

impl Crdt for PNCounter {
    type Add = CounterDelta;

    fn from_serialisable(value: Value) -> CrdtResult<Self> {
        let wire: Wire = serde_json::from_value(value)?;
        Ok(Self {
            inc: GCounter::from_serialisable(wire.inc)?,
            dec: GCounter::from_serialisable(wire.dec)?,
        })
    }

    fn to_serialisable(&self) -> Value {
        serde_json::to_value(Wire {
            inc: self.inc.to_serialisable(),
            dec: self.dec.to_serialisable(),
        })
        .expect("Wire always serializes")
    }

    fn read(&self) -> Value {
        Value::from(self.total())
    }

    fn merge(&self, other: &Self) -> Self {
        Self {
            inc: self.inc.merge(&other.inc),
            dec: self.dec.merge(&other.dec),
        }
    }

    fn add(&self, element: CounterDelta) -> Self {
        if element.delta >= 0 {
            Self {
                inc: self.inc.add(element),
                dec: self.dec.clone(),
            }
        } else {
            Self {
                inc: self.inc.clone(),
                dec: self.dec.add(CounterDelta {
                    node_id: element.node_id,
                    delta: -element.delta,
                }),
            }
        }
    }
}
