//! # Maelstrom Node Crate
//!
//! The runtime a Maelstrom workload binary is built from: a [`Node`]
//! handling identity, RPC correlation, and serialized stdio, plus the
//! four workloads this test-harness node suite hosts.

pub mod node;
pub mod workloads;

/// Test doubles for the [`node::Sink`] trait. Not part of the public API —
/// only ever compiled in for this crate's own `#[cfg(test)]` modules.
#[cfg(test)]
pub mod testing;

pub use maelstrom_common::{Body, Envelope, NodeError, NodeResult};
pub use node::{ensure_initialized, handle_init, log_error, run, Node, Sink, StdioSink, Workload};
