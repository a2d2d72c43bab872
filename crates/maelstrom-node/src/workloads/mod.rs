//! The four workloads this node suite hosts, one module each.

pub mod broadcast;
pub mod crdt_server;
pub mod echo;
pub mod transactor;

pub use broadcast::BroadcastWorkload;
pub use crdt_server::CrdtServer;
pub use echo::EchoWorkload;
pub use transactor::Transactor;
