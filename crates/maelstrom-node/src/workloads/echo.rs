//! Echoes the `echo` field of any `echo` message straight back.

use crate::node::{log_error, Node, Workload};
use async_trait::async_trait;
use maelstrom_common::{Body, Envelope, NodeError};
use serde_json::Value;
use std::sync::Arc;

#[derive(Default)]
pub struct EchoWorkload;

impl EchoWorkload {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Workload for EchoWorkload {
    async fn dispatch(&self, node: &Arc<Node>, envelope: Envelope) {
        match envelope.body.kind.as_str() {
            "echo" => {
                let echo: Value = envelope
                    .body
                    .field_opt::<Value>("echo")
                    .ok()
                    .flatten()
                    .unwrap_or(Value::Null);
                let reply = Body::new("echo_ok").with("echo", echo);
                node.reply(&envelope, reply).await;
            }
            other => log_error(node, NodeError::UnknownMessageType(other.to_string())).await,
        }
    }
}
