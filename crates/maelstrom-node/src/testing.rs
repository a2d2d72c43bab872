//! Test doubles for the node runtime. Mirrors the `Stub*Service`
//! convention used for network mocks elsewhere in this codebase: a
//! minimal in-memory stand-in instead of touching real stdio.

use crate::node::Sink;
use async_trait::async_trait;
use maelstrom_common::Envelope;
use tokio::sync::Mutex;

/// Captures every line a [`crate::Node`] would have written to stdout or
/// stderr, so tests can assert on it directly.
#[derive(Default)]
pub struct RecordingSink {
    lock: Mutex<(Vec<String>, Vec<String>)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stdout_lines(&self) -> Vec<String> {
        self.lock.lock().await.0.clone()
    }

    pub async fn stderr_lines(&self) -> Vec<String> {
        self.lock.lock().await.1.clone()
    }

    /// Decode every stdout line as an [`Envelope`], in emission order.
    pub async fn sent_envelopes(&self) -> Vec<Envelope> {
        self.stdout_lines()
            .await
            .iter()
            .map(|line| serde_json::from_str(line).expect("sink only ever writes valid envelopes"))
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn write_stdout(&self, line: &str) {
        self.lock.lock().await.0.push(line.to_string());
    }

    async fn write_stderr(&self, line: &str) {
        self.lock.lock().await.1.push(line.to_string());
    }
}
