//! A workload generic over any [`Crdt`] implementation: `add` mutates
//! the local replica, `read` returns its visible value, and a five-second
//! gossip tick pushes a full-state snapshot to every other node.

use crate::node::{log_error, Node, Workload};
use async_trait::async_trait;
use maelstrom_common::{Body, NodeError, NodeResult};
use maelstrom_crdt::{CounterDelta, Crdt, GCounter, GSet, PNCounter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Builds the `Add` value for a CRDT from the requesting node and the
/// message body. G-Set reads it straight off the wire; the counters
/// stamp it with the sender's node id so each contributor gets its own
/// G-Counter slot.
pub trait FromRequest: Crdt {
    fn add_from_request(src: &str, body: &Body) -> NodeResult<Self::Add>;
}

impl FromRequest for GSet {
    fn add_from_request(_src: &str, body: &Body) -> NodeResult<Value> {
        body.field("element")
    }
}

impl FromRequest for GCounter {
    fn add_from_request(src: &str, body: &Body) -> NodeResult<CounterDelta> {
        Ok(CounterDelta {
            node_id: src.to_string(),
            delta: body.field("delta")?,
        })
    }
}

impl FromRequest for PNCounter {
    fn add_from_request(src: &str, body: &Body) -> NodeResult<CounterDelta> {
        Ok(CounterDelta {
            node_id: src.to_string(),
            delta: body.field("delta")?,
        })
    }
}

pub struct CrdtServer<C: Crdt> {
    state: Arc<Mutex<C>>,
}

impl<C: Crdt + Default> CrdtServer<C> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(C::default())),
        }
    }
}

impl<C: Crdt + Default> Default for CrdtServer<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: FromRequest + Default> Workload for CrdtServer<C> {
    async fn on_init(&self, node: &Arc<Node>) {
        let state = self.state.clone();
        let node_for_task = node.clone();
        node.repeat(Duration::from_secs(5), move || {
            let state = state.clone();
            let node = node_for_task.clone();
            async move {
                let my_id = node.node_id().await;
                let peers: Vec<String> = node
                    .node_ids()
                    .await
                    .into_iter()
                    .filter(|p| Some(p) != my_id.as_ref())
                    .collect();
                if peers.is_empty() {
                    return;
                }
                // Snapshot under the lock so every peer in this tick sees
                // the same, consistent state rather than one advancing
                // mid-fanout.
                let snapshot = state.lock().await.to_serialisable();
                for peer in peers {
                    node.send(&peer, Body::new("replicate").with("value", snapshot.clone()))
                        .await;
                }
            }
        })
        .await;
    }

    async fn dispatch(&self, node: &Arc<Node>, envelope: maelstrom_common::Envelope) {
        match envelope.body.kind.as_str() {
            "add" => {
                let element = match C::add_from_request(&envelope.src, &envelope.body) {
                    Ok(e) => e,
                    Err(e) => {
                        log_error(node, e).await;
                        return;
                    }
                };
                {
                    let mut state = self.state.lock().await;
                    *state = state.add(element);
                }
                node.reply(&envelope, Body::new("add_ok")).await;
            }
            "replicate" => {
                let value: Value = match envelope.body.field("value") {
                    Ok(v) => v,
                    Err(e) => {
                        log_error(node, e).await;
                        return;
                    }
                };
                let other = match C::from_serialisable(value) {
                    Ok(c) => c,
                    Err(e) => {
                        log_error(node, e).await;
                        return;
                    }
                };
                let mut state = self.state.lock().await;
                *state = state.merge(&other);
            }
            "read" => {
                let value = self.state.lock().await.read();
                node.reply(&envelope, Body::new("read_ok").with("value", value))
                    .await;
            }
            other => log_error(node, NodeError::UnknownMessageType(other.to_string())).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use maelstrom_common::Envelope;
    use serde_json::json;

    async fn init(node: &Arc<Node>, workload: &Arc<CrdtServer<GCounter>>, id: &str, peers: &[&str]) {
        let envelope = Envelope::new(
            "c1",
            id,
            Body {
                msg_id: Some(1),
                ..Body::new("init")
            }
            .with("node_id", id)
            .with("node_ids", json!(peers)),
        );
        workload.handle(node, envelope).await;
    }

    #[tokio::test]
    async fn add_then_read_reflects_local_contribution() {
        let sink = Arc::new(RecordingSink::new());
        let node = Arc::new(Node::new(sink.clone()));
        let workload = Arc::new(CrdtServer::<GCounter>::new());
        init(&node, &workload, "n1", &["n1"]).await;

        let add = Envelope::new(
            "c1",
            "n1",
            Body {
                msg_id: Some(2),
                ..Body::new("add")
            }
            .with("delta", 5),
        );
        workload.handle(&node, add).await;

        let read = Envelope::new(
            "c1",
            "n1",
            Body {
                msg_id: Some(3),
                ..Body::new("read")
            },
        );
        workload.handle(&node, read).await;

        let sent = sink.sent_envelopes().await;
        let read_ok = sent.last().unwrap();
        assert_eq!(read_ok.body.kind, "read_ok");
        assert_eq!(read_ok.body.field::<i64>("value").unwrap(), 5);
    }

    #[tokio::test]
    async fn replicate_merges_remote_state() {
        let sink = Arc::new(RecordingSink::new());
        let node = Arc::new(Node::new(sink.clone()));
        let workload = Arc::new(CrdtServer::<GCounter>::new());
        init(&node, &workload, "n1", &["n1", "n2"]).await;

        let remote = GCounter::new().add(CounterDelta {
            node_id: "n2".to_string(),
            delta: 9,
        });
        let replicate = Envelope::new(
            "n2",
            "n1",
            Body::new("replicate").with("value", remote.to_serialisable()),
        );
        workload.handle(&node, replicate).await;

        let read = Envelope::new(
            "c1",
            "n1",
            Body {
                msg_id: Some(2),
                ..Body::new("read")
            },
        );
        workload.handle(&node, read).await;

        let sent = sink.sent_envelopes().await;
        let read_ok = sent.last().unwrap();
        assert_eq!(read_ok.body.field::<i64>("value").unwrap(), 9);
    }

    #[tokio::test]
    async fn gossip_task_sends_snapshot_to_peers() {
        let sink = Arc::new(RecordingSink::new());
        let node = Arc::new(Node::new(sink.clone()));
        let workload = Arc::new(CrdtServer::<GCounter>::new());
        init(&node, &workload, "n1", &["n1", "n2", "n3"]).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = sink.sent_envelopes().await;
        let replications: Vec<_> = sent
            .iter()
            .filter(|e| e.body.kind == "replicate")
            .collect();
        // run_tasks fires the gossip body immediately on its first tick.
        assert_eq!(replications.len(), 2);
    }
}
