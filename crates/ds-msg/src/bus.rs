//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Message bus abstraction and the in-process implementation."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::envelope::MessageEnvelope;
use crate::logging::{log_envelope, MessageDirection};
use crate::topic::topic_matches;
use crate::{MessagingError, Result};

const CHANNEL_CAPACITY: usize = 1024;
const HISTORY_LIMIT: usize = 1024;

/// Envelope together with the topic it travelled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete topic.
    pub topic: String,
    /// Envelope.
    pub envelope: MessageEnvelope,
}

/// Bus abstraction used by egress and the command subscriber.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Human-readable bus name for logging.
    fn name(&self) -> &'static str;
    /// Establish the connection; idempotent.
    async fn connect(&self) -> Result<()>;
    /// Publish `envelope` on `topic`.
    async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> Result<()>;
    /// Subscribe to every topic matching `filter`.
    async fn subscribe(&self, filter: &str) -> Result<Subscription>;
    /// Drop the connection; idempotent.
    async fn disconnect(&self) -> Result<()>;
}

/// Stream of messages matching one filter.
#[derive(Debug)]
pub struct Subscription {
    filter: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    /// Wrap a broadcast receiver, keeping only topics matching `filter`.
    pub fn new(filter: impl Into<String>, rx: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            filter: filter.into(),
            rx,
        }
    }

    /// Filter this subscription was created with.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Next matching message; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) if topic_matches(&self.filter, &message.topic) => {
                    log_envelope(MessageDirection::Inbound, &message.topic, &message.envelope);
                    return Some(message);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(filter = %self.filter, skipped, "subscriber lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process bus backed by a broadcast channel. Keeps a bounded history of
/// published messages for inspection.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: broadcast::Sender<BusMessage>,
    connected: Arc<AtomicBool>,
    history: Arc<Mutex<VecDeque<BusMessage>>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            connected: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl InMemoryBus {
    /// Create a disconnected bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `connect` has been called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Messages published so far, oldest first.
    pub fn published(&self) -> Vec<BusMessage> {
        self.history.lock().iter().cloned().collect()
    }

    /// Published messages whose topic matches `filter`.
    pub fn published_matching(&self, filter: &str) -> Vec<BusMessage> {
        self.history
            .lock()
            .iter()
            .filter(|message| topic_matches(filter, &message.topic))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> Result<()> {
        if !self.is_connected() {
            return Err(MessagingError::NotConnected(self.name()));
        }
        log_envelope(MessageDirection::Outbound, topic, &envelope);
        let message = BusMessage {
            topic: topic.to_owned(),
            envelope,
        };
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        // No live subscriber is not an error.
        let _ = self.tx.send(message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription> {
        if !self.is_connected() {
            return Err(MessagingError::NotConnected(self.name()));
        }
        Ok(Subscription::new(filter, self.tx.subscribe()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CONTENT_TYPE_JSON;

    fn envelope(body: &str) -> MessageEnvelope {
        MessageEnvelope::new("corr", CONTENT_TYPE_JSON, body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let bus = InMemoryBus::new();
        let err = bus.publish("a/b", envelope("{}")).await.unwrap_err();
        assert!(matches!(err, MessagingError::NotConnected("in-memory")));
    }

    #[tokio::test]
    async fn subscription_filters_topics() {
        let bus = InMemoryBus::new();
        bus.connect().await.unwrap();
        let mut sub = bus.subscribe("edgex/device/+/P/#").await.unwrap();
        bus.publish("edgex/other/x", envelope("1")).await.unwrap();
        bus.publish("edgex/device/ds/P/D/S", envelope("2")).await.unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.topic, "edgex/device/ds/P/D/S");
        assert_eq!(received.envelope.payload, b"2");
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_matching("edgex/other/#").len(), 1);
    }
}
