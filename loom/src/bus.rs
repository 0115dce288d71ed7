//! Message Bus (§4.A): in-process pub/sub for inbound, outbound, and broadcast
//! traffic. Non-blocking; bounded per-subscriber buffers; overflow drops with a
//! warning rather than back-pressuring the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Per-subscriber buffer capacity (§4.A).
pub const SUBSCRIBER_BUFFER_CAPACITY: usize = 256;

/// Channels that are never forwarded to an outbound channel adapter.
pub const INTERNAL_CHANNELS: &[&str] = &["cli", "system", "subagent"];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub media: Vec<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// In-process message bus. One instance is created at process startup and
/// shared behind an `Arc` (§9: "process-wide registries... initialized once").
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound_subs: DashMap<String, Vec<mpsc::Sender<OutboundMessage>>>,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
}

impl MessageBus {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(SUBSCRIBER_BUFFER_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(SUBSCRIBER_BUFFER_CAPACITY);
        Arc::new(Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(Some(inbound_rx)),
            outbound_subs: DashMap::new(),
            broadcast_tx,
        })
    }

    /// Publishes an inbound message to the single inbound consumer. Drops with
    /// a warning if the consumer's buffer is full.
    pub async fn publish_inbound(&self, msg: InboundMessage) {
        if self.inbound_tx.try_send(msg).is_err() {
            tracing::warn!("inbound bus buffer full, dropping message");
        }
    }

    /// Takes the inbound receiver. May only be called once; the single inbound
    /// consumer owns it for the process lifetime.
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().await.take()
    }

    /// Registers an outbound subscriber for a channel name (e.g. "telegram").
    /// Internal channels (`cli`, `system`, `subagent`) may subscribe but will
    /// never receive anything published through `publish_outbound`, since that
    /// call itself refuses to forward to them.
    pub fn subscribe_outbound(&self, channel: impl Into<String>) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_CAPACITY);
        self.outbound_subs.entry(channel.into()).or_default().push(tx);
        rx
    }

    /// Publishes to all subscribers of `msg.channel`. No-op for internal
    /// channels. FIFO per subscriber; no ordering guarantee across
    /// subscribers.
    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        if INTERNAL_CHANNELS.contains(&msg.channel.as_str()) {
            return;
        }
        if let Some(subs) = self.outbound_subs.get(&msg.channel) {
            for sub in subs.iter() {
                if sub.try_send(msg.clone()).is_err() {
                    tracing::warn!(channel = %msg.channel, "outbound bus buffer full, dropping message");
                }
            }
        }
    }

    pub fn subscribe_broadcast(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Publishes a broadcast event. Best-effort: if there are no subscribers
    /// this is a no-op (broadcast channels error with `SendError` when empty;
    /// that is expected and intentionally ignored).
    pub fn publish_broadcast(&self, name: impl Into<String>, payload: serde_json::Value) {
        let _ = self.broadcast_tx.send(BroadcastEvent { name: name.into(), payload });
    }

    /// Cache-invalidation convenience wrapper (§6): `cache:{kind}` broadcast
    /// with payload `{kind, key}`.
    pub fn invalidate_cache(&self, kind: &str, key: &str) {
        self.publish_broadcast(
            format!("cache:{kind}"),
            serde_json::json!({"kind": kind, "key": key}),
        );
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        // `MessageBus::new` returns `Arc<Self>`; `Default` is only used by tests
        // that need a bare value, so unwrap the Arc via try_unwrap (always
        // succeeds immediately after construction).
        Arc::try_unwrap(MessageBus::new()).unwrap_or_else(|_| unreachable!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(channel: &str) -> InboundMessage {
        InboundMessage {
            channel: channel.into(),
            sender_id: "u1".into(),
            chat_id: "c1".into(),
            content: "hi".into(),
            user_id: Some("u1".into()),
            agent_id: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn inbound_delivered_to_single_consumer() {
        let bus = MessageBus::new();
        let mut rx = bus.take_inbound_receiver().await.unwrap();
        bus.publish_inbound(inbound("telegram")).await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "telegram");
    }

    #[tokio::test]
    async fn outbound_to_internal_channel_is_dropped() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_outbound("cli");
        bus.publish_outbound(OutboundMessage {
            channel: "cli".into(),
            chat_id: "c1".into(),
            content: "x".into(),
            media: vec![],
            metadata: HashMap::new(),
        })
        .await;
        assert!(rx.try_recv().is_err(), "internal channels must never receive outbound");
    }

    #[tokio::test]
    async fn outbound_fans_out_to_all_subscribers_of_a_channel() {
        let bus = MessageBus::new();
        let mut rx1 = bus.subscribe_outbound("telegram");
        let mut rx2 = bus.subscribe_outbound("telegram");
        bus.publish_outbound(OutboundMessage {
            channel: "telegram".into(),
            chat_id: "c1".into(),
            content: "hello".into(),
            media: vec![],
            metadata: HashMap::new(),
        })
        .await;
        assert_eq!(rx1.recv().await.unwrap().content, "hello");
        assert_eq!(rx2.recv().await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_all_subscribers() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe_broadcast();
        let mut b = bus.subscribe_broadcast();
        bus.publish_broadcast("handoff", serde_json::json!({"to": "agent-y"}));
        assert_eq!(a.recv().await.unwrap().name, "handoff");
        assert_eq!(b.recv().await.unwrap().name, "handoff");
    }

    #[test]
    fn invalidate_cache_uses_cache_prefix_and_kind_key_payload() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_broadcast();
        bus.invalidate_cache("bootstrap", "agent-1");
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.name, "cache:bootstrap");
        assert_eq!(ev.payload["kind"], "bootstrap");
        assert_eq!(ev.payload["key"], "agent-1");
    }
}
