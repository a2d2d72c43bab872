//! Reliable broadcast: every genuinely new message is re-gossiped to
//! this node's topology neighbours, with per-peer RPC retried on a
//! one-second tick until that peer acknowledges it.

use crate::node::{log_error, Node, Workload};
use async_trait::async_trait;
use maelstrom_common::{Body, Envelope, NodeError};
use maelstrom_crdt::{Crdt, GSet};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct BroadcastWorkload {
    neighbours: RwLock<Vec<String>>,
    store: Mutex<GSet>,
}

impl BroadcastWorkload {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Workload for BroadcastWorkload {
    async fn dispatch(&self, node: &Arc<Node>, envelope: Envelope) {
        match envelope.body.kind.as_str() {
            "topology" => {
                let topology: HashMap<String, Vec<String>> = match envelope.body.field("topology")
                {
                    Ok(t) => t,
                    Err(e) => {
                        log_error(node, e).await;
                        return;
                    }
                };
                let my_id = node.node_id().await.unwrap_or_default();
                let neighbours = topology.get(&my_id).cloned().unwrap_or_default();
                *self.neighbours.write().await = neighbours;
                node.reply(&envelope, Body::new("topology_ok")).await;
            }
            "read" => {
                let messages = self.store.lock().await.read();
                node.reply(&envelope, Body::new("read_ok").with("messages", messages))
                    .await;
            }
            "broadcast" => {
                let message: Value = match envelope.body.field("message") {
                    Ok(m) => m,
                    Err(e) => {
                        log_error(node, e).await;
                        return;
                    }
                };
                // A client's direct broadcast request carries a msg_id and
                // expects an ack; a peer's gossip retry uses the RPC
                // reply (broadcast_ok) for its own ack instead.
                if envelope.body.msg_id.is_some() {
                    node.reply(&envelope, Body::new("broadcast_ok")).await;
                }

                let is_new = {
                    let mut store = self.store.lock().await;
                    let (next, is_new) = store.insert_new(message.clone());
                    *store = next;
                    is_new
                };
                if is_new {
                    let neighbours = self.neighbours.read().await.clone();
                    let targets: Vec<String> = neighbours
                        .into_iter()
                        .filter(|n| *n != envelope.src)
                        .collect();
                    spawn_retry_fanout(node.clone(), targets, message);
                }
            }
            other => log_error(node, NodeError::UnknownMessageType(other.to_string())).await,
        }
    }
}

fn spawn_retry_fanout(node: Arc<Node>, targets: Vec<String>, message: Value) {
    if targets.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let unacked: Arc<Mutex<HashSet<String>>> =
            Arc::new(Mutex::new(targets.into_iter().collect()));

        loop {
            let remaining: Vec<String> = unacked.lock().await.iter().cloned().collect();
            if remaining.is_empty() {
                return;
            }
            for peer in remaining {
                let unacked = unacked.clone();
                let peer_for_ack = peer.clone();
                let body = Body::new("broadcast").with("message", message.clone());
                node.rpc(&peer, body, move |reply| async move {
                    if reply.body.kind == "broadcast_ok" {
                        unacked.lock().await.remove(&peer_for_ack);
                    }
                })
                .await;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
}
