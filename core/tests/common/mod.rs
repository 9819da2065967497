//! Test doubles for the backend and the push transport
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hirechat_core::error::{Result, SyncError};
use hirechat_core::messenger_types::{CompanyRef, ConversationContext};
use hirechat_core::push::PushSink;
use hirechat_core::{
    ConversationBackend, ConversationIdentity, ConversationSummary, DeliveryState, Message,
    MessagingSession, Participant, PushTransport, Role, SessionEvent, SessionUser, SyncConfig,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

pub const ME: &str = "cand-me";

pub fn me() -> SessionUser {
    SessionUser {
        id: ME.to_string(),
        role: Role::Candidate,
    }
}

pub fn at(mins: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-10T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + Duration::minutes(mins)
}

pub fn summary(
    counterpart: &str,
    name: &str,
    job: Option<&str>,
    unread: u32,
    mins: i64,
) -> ConversationSummary {
    ConversationSummary {
        participant: Participant {
            id: counterpart.to_string(),
            display_name: name.to_string(),
            avatar_url: None,
            role: Role::Recruiter,
            company: Some(CompanyRef {
                id: "co-1".to_string(),
                name: "Globex".to_string(),
            }),
        },
        context: ConversationContext {
            job_id: job.map(String::from),
            application_id: None,
            job_title: job.map(|j| format!("Title of {}", j)),
        },
        last_message_preview: "hi".to_string(),
        last_message_at: Some(at(mins)),
        unread_count: unread,
        is_hidden: false,
    }
}

pub fn message(id: &str, identity: &ConversationIdentity, sender: &str, mins: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation: identity.clone(),
        sender_id: sender.to_string(),
        body: format!("text {}", id),
        created_at: at(mins),
        delivery_state: DeliveryState::Sent,
    }
}

pub fn body_ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.clone()).collect()
}

/// In-memory backend. Calls can be held at a gate until the test releases them.
pub struct FakeBackend {
    conversations: Mutex<Vec<ConversationSummary>>,
    histories: Mutex<HashMap<ConversationIdentity, Vec<Message>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            conversations: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn set_conversations(&self, listing: Vec<ConversationSummary>) {
        *self.conversations.lock().unwrap() = listing;
    }

    pub fn set_history(&self, identity: &ConversationIdentity, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(identity.clone(), messages);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every later call of `op` on `identity` until released with `notify_one`
    pub fn hold(&self, op: &str, identity: &ConversationIdentity) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(gate_key(op, identity), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&format!("{}:", op)))
            .count()
    }

    async fn enter(&self, op: &str, identity: &ConversationIdentity) -> Result<()> {
        let key = gate_key(op, identity);
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::TransientNetwork(format!("{} failed: offline", op)));
        }
        Ok(())
    }
}

fn gate_key(op: &str, identity: &ConversationIdentity) -> String {
    format!("{}:{}", op, identity)
}

#[async_trait]
impl ConversationBackend for FakeBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.enter("list", &ConversationIdentity::general("*")).await?;
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn message_history(
        &self,
        identity: &ConversationIdentity,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.enter("history", identity).await?;
        let all = self
            .histories
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .unwrap_or_default();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn send_message(&self, identity: &ConversationIdentity, body: &str) -> Result<Message> {
        self.enter("send", identity).await?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Message {
            id: format!("srv-{}", n),
            conversation: identity.clone(),
            sender_id: ME.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            delivery_state: DeliveryState::Sent,
        })
    }

    async fn mark_read(&self, identity: &ConversationIdentity) -> Result<()> {
        self.enter("mark_read", identity).await
    }

    async fn hide(&self, identity: &ConversationIdentity) -> Result<()> {
        self.enter("hide", identity).await
    }

    async fn unhide(&self, identity: &ConversationIdentity) -> Result<()> {
        self.enter("unhide", identity).await
    }

    async fn delete(&self, identity: &ConversationIdentity) -> Result<()> {
        self.enter("delete", identity).await?;
        self.conversations.lock().unwrap().retain(|s| {
            use hirechat_core::identity::Identified;
            &s.identity() != identity
        });
        Ok(())
    }
}

/// Push transport that lets tests post raw events
#[derive(Default)]
pub struct FakeTransport {
    sinks: Mutex<HashMap<String, PushSink>>,
    connected: AtomicBool,
    connected_as: Mutex<Option<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, event: &str, payload: serde_json::Value) -> bool {
        match self.sinks.lock().unwrap().get(event) {
            Some(sink) => sink.post(event, payload),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connected_as(&self) -> Option<String> {
        self.connected_as.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        let mut events: Vec<String> = self.sinks.lock().unwrap().keys().cloned().collect();
        events.sort();
        events
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self, user: &SessionUser) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        *self.connected_as.lock().unwrap() = Some(user.id.clone());
        Ok(())
    }

    async fn subscribe(&self, event: &str, sink: PushSink) -> Result<()> {
        self.sinks.lock().unwrap().insert(event.to_string(), sink);
        Ok(())
    }

    async fn unsubscribe(&self, event: &str) -> Result<()> {
        self.sinks.lock().unwrap().remove(event);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn session(backend: &Arc<FakeBackend>, transport: &Arc<FakeTransport>) -> MessagingSession {
    MessagingSession::new(
        me(),
        SyncConfig::default(),
        backend.clone(),
        transport.clone(),
    )
    .unwrap()
}

/// Poll `check` until it holds, letting spawned tasks run in between
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
