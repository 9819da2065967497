/// Push channel: transport trait, the sink it posts into, and typed events
use crate::error::Result;
use crate::messenger_types::{Message, SessionUser};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_PRESENCE_CHANGED: &str = "presence:changed";

/// Events the session subscribes to on start
pub const SUBSCRIBED_EVENTS: [&str; 2] = [EVENT_MESSAGE_NEW, EVENT_PRESENCE_CHANGED];

/// An event as delivered by the transport, before decoding
#[derive(Debug, Clone)]
pub struct RawPushEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Where a transport posts events. Cheap to clone; delivery order is kept.
#[derive(Clone)]
pub struct PushSink {
    tx: mpsc::UnboundedSender<RawPushEvent>,
}

impl PushSink {
    /// Returns false once the session has stopped listening
    pub fn post(&self, name: impl Into<String>, payload: serde_json::Value) -> bool {
        self.tx
            .send(RawPushEvent {
                name: name.into(),
                payload,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The single queue all push events go through
pub fn channel() -> (PushSink, mpsc::UnboundedReceiver<RawPushEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PushSink { tx }, rx)
}

/// Unsolicited event transport (socket or similar)
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, user: &SessionUser) -> Result<()>;

    /// Deliver every `event` into `sink` until unsubscribed
    async fn subscribe(&self, event: &str, sink: PushSink) -> Result<()>;

    async fn unsubscribe(&self, event: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    MessageNew(Message),
    PresenceChanged { participant_id: String, online: bool },
}

#[derive(Deserialize)]
struct MessageNewPayload {
    message: Message,
}

#[derive(Deserialize)]
struct PresencePayload {
    #[serde(alias = "participantId")]
    participant_id: String,
    online: bool,
}

impl PushEvent {
    /// Decode a raw event; `Ok(None)` for event names the core does not handle
    pub fn decode(raw: &RawPushEvent) -> Result<Option<PushEvent>> {
        match raw.name.as_str() {
            EVENT_MESSAGE_NEW => {
                let p: MessageNewPayload = serde_json::from_value(raw.payload.clone())?;
                Ok(Some(PushEvent::MessageNew(p.message)))
            }
            EVENT_PRESENCE_CHANGED => {
                let p: PresencePayload = serde_json::from_value(raw.payload.clone())?;
                Ok(Some(PushEvent::PresenceChanged {
                    participant_id: p.participant_id,
                    online: p.online,
                }))
            }
            _ => Ok(None),
        }
    }
}
