//! In-process bus on `tokio::sync::broadcast`.
//!
//! Every clone shares one channel, so a control service and any number of
//! agents in the same process can talk through it exactly as they would
//! through a broker.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{Bus, BusError, Delivery, MessageHandler, topic_matches};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct BusMessage {
    topic: String,
    payload: Bytes,
}

#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner { sender }),
        }
    }

    /// Deliver every message whose topic matches one of `filters` to `handler`.
    ///
    /// Messages published after this call returns are guaranteed to be seen.
    /// Must be called inside a tokio runtime. Delivery stops when the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe(&self, filters: &[String], handler: MessageHandler) -> Subscription {
        let filters = filters.to_vec();
        let mut receiver = self.inner.sender.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if filters.iter().any(|f| topic_matches(f, &message.topic)) {
                            handler(&message.topic, &message.payload[..]);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(?filters, skipped, "in-memory subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { task }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> Result<(), BusError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: Bytes::from(payload),
        };
        match self.inner.sender.send(message) {
            Ok(receivers) => {
                tracing::trace!(topic, ?delivery, receivers, "published");
            }
            Err(_) => {
                // A broker accepts publishes nobody listens to; so do we.
                tracing::debug!(topic, ?delivery, "published with no subscribers");
            }
        }
        Ok(())
    }
}

/// Handle to a running in-memory subscription.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            let _ = tx.send((topic.to_string(), payload.to_vec()));
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn delivers_matching_topics_only() {
        let bus = InMemoryBus::new();
        let (handler, mut rx) = collecting_handler();
        let _sub = bus.subscribe(&["responses/+".to_string()], handler);

        bus.publish("requests/a", b"ignored".to_vec(), Delivery::Confirmed)
            .await
            .unwrap();
        bus.publish("responses/a", b"hello".to_vec(), Delivery::Exactly)
            .await
            .unwrap();

        let (topic, payload) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic, "responses/a");
        assert_eq!(payload, b"hello");
        let quiet = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(quiet.is_err(), "non-matching topic was delivered");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = InMemoryBus::new();
        bus.publish("liveness", b"{}".to_vec(), Delivery::FireAndForget)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handler_runs_off_the_publishing_task() {
        let bus = InMemoryBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let seen_in_handler = seen.clone();
        let _sub = bus.subscribe(
            &["state".to_string(), "liveness".to_string()],
            Arc::new(move |topic: &str, _payload: &[u8]| {
                seen_in_handler.lock().unwrap().push(topic.to_string());
                let _ = tx.send(());
            }),
        );

        bus.publish("state", Vec::new(), Delivery::FireAndForget).await.unwrap();
        bus.publish("liveness", Vec::new(), Delivery::FireAndForget).await.unwrap();
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec!["state".to_string(), "liveness".to_string()]);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_delivery() {
        let bus = InMemoryBus::new();
        let (handler, mut rx) = collecting_handler();
        let sub = bus.subscribe(&["#".to_string()], handler);
        drop(sub);
        tokio::task::yield_now().await;

        bus.publish("state", Vec::new(), Delivery::FireAndForget).await.unwrap();
        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        // Either nothing arrives or the channel closed with the aborted task.
        assert!(matches!(got, Err(_) | Ok(None)));
    }
}
