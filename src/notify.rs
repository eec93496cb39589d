//! Best-effort progress notifications.
//!
//! The pipeline mirrors stage progress onto a publish/subscribe channel so
//! interested observers (a WebSocket bridge, a log tailer) can follow along.
//! Publishing is fire-and-forget: failures are logged at warn and never
//! become task failures.

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Topic the pipeline publishes progress strings to.
pub const TASK_UPDATES_TOPIC: &str = "task_updates";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a human-readable progress message. Must not fail the caller.
    async fn publish(&self, topic: &str, message: &str);
}

/// Notifier backed by an in-process broadcast channel. Subscribers receive
/// `(topic, message)` pairs; lagging or absent subscribers are fine.
pub struct ChannelNotifier {
    tx: broadcast::Sender<(String, String)>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, topic: &str, message: &str) {
        // send() only errors when there are no receivers; that is the
        // normal fire-and-forget case, not a failure worth logging.
        let _ = self.tx.send((topic.to_string(), message.to_string()));
        tracing::debug!(topic, message, "published progress event");
    }
}

/// Notifier that drops everything. Used when no observer is attached.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn publish(&self, _topic: &str, _message: &str) {}
}
