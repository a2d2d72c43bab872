//! # Maelstrom Common Crate
//! Wire format and error types shared by every Maelstrom workload node:
//! the JSON envelope that rides stdin/stdout, and the error kinds a
//! handler can raise while servicing a request.

pub mod retry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use retry::retry_with_backoff;

/// One line of the Maelstrom wire protocol: `{src, dest, body}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

impl Envelope {
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Body) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }
}

/// The `body` object of an envelope. `kind`, `msg_id`, and `in_reply_to`
/// are the fields every workload cares about; everything else a message
/// carries (`element`, `delta`, `txn`, ...) lands in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg_id: None,
            in_reply_to: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set an extra field, builder-style. Panics never; overwrites silently.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Deserialize a required extra field.
    pub fn field<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<T, NodeError> {
        let raw = self
            .extra
            .get(key)
            .ok_or_else(|| NodeError::MissingField(key.to_string()))?;
        serde_json::from_value(raw.clone()).map_err(NodeError::MalformedEnvelope)
    }

    /// Deserialize an optional extra field; absent is `None`.
    pub fn field_opt<T: for<'de> Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Result<Option<T>, NodeError> {
        match self.extra.get(key) {
            None => Ok(None),
            Some(raw) => {
                serde_json::from_value(raw.clone()).map_err(NodeError::MalformedEnvelope)
            }
        }
    }
}

/// Error kinds a handler can raise while servicing one inbound message.
/// None of these represent transport failures: the harness *is* the
/// transport, so a dropped message just never produces an `Envelope` and
/// is never seen here.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
    #[error("received `{0}` before the node was initialized")]
    PreInit(String),
    #[error("rpc to {dest} timed out waiting for a reply to msg_id {msg_id}")]
    Timeout { dest: String, msg_id: u64 },
    #[error("cas conflict on key `{0}`")]
    CasConflict(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    #[error("missing required field `{0}` in message body")]
    MissingField(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NodeResult<T> = Result<T, NodeError>;
