//! # Maelstrom CRDT Crate
//!
//! State-based CRDTs for the replicated counters and sets the workload
//! nodes host: grow-only set, grow-only counter, and positive-negative
//! counter. Every variant forms a join-semilattice: `merge` is
//! idempotent, commutative, and associative, and `add` produces a state
//! dominated by the join of the old state and the new contribution.
//! That's what makes at-least-once, out-of-order gossip safe.
//!
//! `add` and `merge` are pure: they consume `&self` and return a new
//! value rather than mutating in place. The CRDT server above this
//! crate holds the authoritative copy behind a lock and reassigns it
//! (`state = state.add(...)`), which keeps the lock-held region a
//! single assignment instead of an arbitrary mutation.

pub mod g_counter;
pub mod g_set;
pub mod pn_counter;

pub use g_counter::GCounter;
pub use g_set::GSet;
pub use pn_counter::PNCounter;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A per-node delta applied to a counter CRDT: `{node_id, delta}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterDelta {
    pub node_id: String,
    pub delta: i64,
}

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("invalid crdt value: {0}")]
    InvalidValue(#[from] serde_json::Error),
}

pub type CrdtResult<T> = Result<T, CrdtError>;

/// Uniform capability over the three CRDT variants this crate hosts.
///
/// Implementors are plain values; there is no shared base struct. The
/// CRDT server in `maelstrom-node` is generic over this trait and
/// doesn't know which variant it's holding.
pub trait Crdt: Clone + Send + Sync + 'static {
    /// The element type `add` accepts: a JSON value for G-Set, a signed
    /// delta for the counters.
    type Add: Send;

    /// Build a value back from its wire representation, as produced by
    /// `to_serialisable`. Used both for `replicate` payloads and for
    /// round-tripping through `serde_json`.
    fn from_serialisable(value: Value) -> CrdtResult<Self>
    where
        Self: Sized;

    /// The wire representation sent in `replicate` gossip and persisted
    /// nowhere else — there is no on-disk form.
    fn to_serialisable(&self) -> Value;

    /// The externally visible value returned by `read`.
    fn read(&self) -> Value;

    /// Join with another replica's state. Must be idempotent,
    /// commutative, and associative.
    fn merge(&self, other: &Self) -> Self;

    /// Apply a local contribution, returning the new state.
    fn add(&self, element: Self::Add) -> Self;
}
