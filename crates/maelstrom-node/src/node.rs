//! The node runtime: identity, message-id allocation, the callback
//! registry RPCs complete through, and the single mutex that serializes
//! every line written to stdout and stderr.

use async_trait::async_trait;
use dashmap::DashMap;
use maelstrom_common::{Body, Envelope, NodeError, NodeResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex, RwLock};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
// DashMap needs its value type to be `Sync` (its shards are guarded by
// `RwLock`s), even though nothing ever calls a callback through a
// shared reference — only `remove` hands one out by value.
type Callback = Box<dyn FnOnce(Envelope) -> BoxFuture + Send + Sync>;

/// Where outbound lines go. [`StdioSink`] is what the binary uses; tests
/// swap in [`crate::testing::RecordingSink`] to assert on what a node
/// emits without touching a real process's stdio.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write_stdout(&self, line: &str);
    async fn write_stderr(&self, line: &str);
}

/// Writes to the process's real stdout/stderr, both guarded by one lock
/// so a `send` and a `log` from different tasks never interleave mid-line.
pub struct StdioSink {
    lock: Mutex<()>,
}

impl StdioSink {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }
}

impl Default for StdioSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdioSink {
    async fn write_stdout(&self, line: &str) {
        let _guard = self.lock.lock().await;
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(line.as_bytes()).await;
        let _ = stdout.write_all(b"\n").await;
        let _ = stdout.flush().await;
    }

    async fn write_stderr(&self, line: &str) {
        let _guard = self.lock.lock().await;
        let mut stderr = tokio::io::stderr();
        let _ = stderr.write_all(line.as_bytes()).await;
        let _ = stderr.write_all(b"\n").await;
        let _ = stderr.flush().await;
    }
}

struct PeriodicTask {
    interval: Duration,
    f: Arc<dyn Fn() -> BoxFuture + Send + Sync>,
}

/// Identity, outbound dispatch, and the RPC callback registry shared by
/// every handler that touches this node.
pub struct Node {
    id: RwLock<Option<String>>,
    node_ids: RwLock<Vec<String>>,
    next_msg_id: AtomicU64,
    callbacks: DashMap<u64, Callback>,
    sink: Arc<dyn Sink>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl Node {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            id: RwLock::new(None),
            node_ids: RwLock::new(Vec::new()),
            next_msg_id: AtomicU64::new(0),
            callbacks: DashMap::new(),
            sink,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn node_id(&self) -> Option<String> {
        self.id.read().await.clone()
    }

    pub async fn node_ids(&self) -> Vec<String> {
        self.node_ids.read().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.id.read().await.is_some()
    }

    pub async fn init(&self, node_id: String, node_ids: Vec<String>) {
        *self.id.write().await = Some(node_id);
        *self.node_ids.write().await = node_ids;
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a fresh (non-reply) message. Does not allocate a `msg_id`
    /// unless the caller set one; most callers go through [`Node::rpc`]
    /// or [`Node::reply`] instead.
    pub async fn send(&self, dest: &str, body: Body) {
        let src = self.id.read().await.clone().unwrap_or_default();
        let envelope = Envelope::new(src, dest, body);
        match serde_json::to_string(&envelope) {
            Ok(line) => self.sink.write_stdout(&line).await,
            Err(e) => self.log(&format!("failed to encode outbound envelope: {e}")).await,
        }
    }

    /// Reply to `request`, stamping `in_reply_to` from its `msg_id` and
    /// allocating a fresh `msg_id` of our own.
    pub async fn reply(&self, request: &Envelope, mut body: Body) {
        body.msg_id = Some(self.next_msg_id());
        body.in_reply_to = request.body.msg_id;
        self.send(&request.src, body).await;
    }

    /// Send a message and invoke `handler` whenever (and if) a reply
    /// carrying the allocated `msg_id` in `in_reply_to` arrives. Never
    /// blocks on a reply; an abandoned callback is just a small, bounded
    /// leak for the in-flight lifetime of the request.
    pub async fn rpc<F, Fut>(&self, dest: &str, mut body: Body, handler: F)
    where
        F: FnOnce(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let msg_id = self.next_msg_id();
        body.msg_id = Some(msg_id);
        self.callbacks
            .insert(msg_id, Box::new(move |env| Box::pin(handler(env))));
        self.send(dest, body).await;
    }

    /// Like [`Node::rpc`], but awaits the reply directly and times out
    /// after five seconds, removing the stale callback on expiry.
    pub async fn sync_rpc(&self, dest: &str, mut body: Body) -> NodeResult<Envelope> {
        let (tx, rx) = oneshot::channel();
        let msg_id = self.next_msg_id();
        body.msg_id = Some(msg_id);
        self.callbacks.insert(
            msg_id,
            Box::new(move |env| {
                Box::pin(async move {
                    let _ = tx.send(env);
                })
            }),
        );
        self.send(dest, body).await;

        match tokio::time::timeout(Duration::from_secs(5), rx).await {
            Ok(Ok(env)) => Ok(env),
            Ok(Err(_)) => Err(NodeError::Timeout {
                dest: dest.to_string(),
                msg_id,
            }),
            Err(_) => {
                self.callbacks.remove(&msg_id);
                Err(NodeError::Timeout {
                    dest: dest.to_string(),
                    msg_id,
                })
            }
        }
    }

    /// Deliver an inbound reply to whichever callback is waiting for its
    /// `msg_id`, if any. The registry's atomic removal means only the
    /// first reply to a given `msg_id` is ever delivered. Exposed beyond
    /// the dispatcher loop so tests can simulate a reply from an
    /// external service (e.g. `lin-kv`) without a real transport.
    pub async fn deliver_reply(&self, msg_id: u64, envelope: Envelope) {
        if let Some((_, cb)) = self.callbacks.remove(&msg_id) {
            cb(envelope).await;
        }
    }

    /// Write one line to stderr, sharing the same lock as stdout writes.
    pub async fn log(&self, message: &str) {
        self.sink.write_stderr(message).await;
    }

    /// Register a periodic task. It does not run until [`Node::run_tasks`]
    /// is called, normally once from [`crate::Workload::handle`] right
    /// after `init` succeeds.
    pub async fn repeat<F, Fut>(&self, interval: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Arc<dyn Fn() -> BoxFuture + Send + Sync> = Arc::new(move || Box::pin(f()));
        self.tasks.lock().await.push(PeriodicTask {
            interval,
            f: boxed,
        });
    }

    /// Spawn every task registered via [`Node::repeat`] onto its own
    /// loop. Idempotent: a second call finds nothing left to drain.
    pub async fn run_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            tokio::spawn(async move {
                loop {
                    (task.f)().await;
                    tokio::time::sleep(task.interval).await;
                }
            });
        }
    }
}

/// Handles `init`/`init_ok` the same way for every workload: record the
/// assigned identity and acknowledge it.
pub async fn handle_init(node: &Arc<Node>, envelope: &Envelope) -> NodeResult<()> {
    let node_id: String = envelope.body.field("node_id")?;
    let node_ids: Vec<String> = envelope.body.field("node_ids")?;
    node.init(node_id, node_ids).await;
    node.reply(envelope, Body::new("init_ok")).await;
    Ok(())
}

/// Logs `err` to stderr. Generic over `Display` so both [`NodeError`]
/// and a CRDT crate's own error type can be logged without conversion.
pub async fn log_error(node: &Arc<Node>, err: impl std::fmt::Display) {
    node.log(&err.to_string()).await;
}

/// Returns `false` (after logging a pre-init error) if `envelope` arrived
/// before `init`. Every workload calls this before touching anything
/// that depends on node identity.
pub async fn ensure_initialized(node: &Arc<Node>, envelope: &Envelope) -> bool {
    if node.is_initialized().await {
        true
    } else {
        log_error(node, NodeError::PreInit(envelope.body.kind.clone())).await;
        false
    }
}

/// A workload owns the message types beyond `init`/`init_ok`, which the
/// default `handle` implementation already takes care of.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Runs once, right after this node's `init` succeeds. The default
    /// no-op suits workloads with no periodic behavior (echo, broadcast's
    /// fanout is driven by inbound messages, not a timer).
    async fn on_init(&self, _node: &Arc<Node>) {}

    /// Handle any message other than `init`, after init-guarding has
    /// already passed.
    async fn dispatch(&self, node: &Arc<Node>, envelope: Envelope);

    async fn handle(&self, node: &Arc<Node>, envelope: Envelope) {
        if envelope.body.kind == "init" {
            match handle_init(node, &envelope).await {
                Ok(()) => {
                    self.on_init(node).await;
                    node.run_tasks().await;
                }
                Err(e) => log_error(node, e).await,
            }
            return;
        }
        if !ensure_initialized(node, &envelope).await {
            return;
        }
        self.dispatch(node, envelope).await;
    }
}

/// Reads newline-delimited JSON envelopes from stdin and spawns one task
/// per line: replies are routed to their waiting callback, everything
/// else goes to `workload`.
pub async fn run<W: Workload>(workload: Arc<W>) -> NodeResult<()> {
    let node = Arc::new(Node::new(Arc::new(StdioSink::new())));
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) => return Err(NodeError::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                node.log(&format!("malformed envelope: {e}")).await;
                continue;
            }
        };

        let node = node.clone();
        let workload = workload.clone();
        tokio::spawn(async move {
            if let Some(msg_id) = envelope.body.in_reply_to {
                node.deliver_reply(msg_id, envelope).await;
            } else {
                workload.handle(&node, envelope).await;
            }
        });
    }
}
