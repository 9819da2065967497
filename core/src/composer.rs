/// Outbound composer: validation, optimistic records and per-message delivery state
use crate::error::{Result, SyncError};
use crate::identity::ConversationIdentity;
use crate::messenger_types::{DeliveryState, Message};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix of ids assigned before the server confirms a message
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    Confirmed,
    Errored,
    Retried,
}

impl DeliveryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryEvent::Confirmed => "confirmed",
            DeliveryEvent::Errored => "errored",
            DeliveryEvent::Retried => "retried",
        }
    }
}

/// pending -> sent | failed, failed -> pending (retry). Sent is terminal.
pub fn transition(from: DeliveryState, event: DeliveryEvent) -> Result<DeliveryState> {
    match (from, event) {
        (DeliveryState::Pending, DeliveryEvent::Confirmed) => Ok(DeliveryState::Sent),
        (DeliveryState::Pending, DeliveryEvent::Errored) => Ok(DeliveryState::Failed),
        (DeliveryState::Failed, DeliveryEvent::Retried) => Ok(DeliveryState::Pending),
        _ => Err(SyncError::InvalidTransition {
            from: from.as_str(),
            event: event.as_str(),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub local_id: String,
    pub conversation: ConversationIdentity,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: Option<SyncError>,
}

/// Messages composed in this session that the server has not confirmed
pub struct Composer {
    sender_id: String,
    max_body_chars: usize,
    outbox: Vec<OutboundMessage>,
}

impl Composer {
    pub fn new(sender_id: impl Into<String>, max_body_chars: usize) -> Self {
        Self {
            sender_id: sender_id.into(),
            max_body_chars,
            outbox: Vec::new(),
        }
    }

    pub fn validate_body(&self, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(SyncError::Validation("message body is empty".to_string()));
        }
        let len = body.chars().count();
        if len > self.max_body_chars {
            return Err(SyncError::Validation(format!(
                "message body is {} chars, limit is {}",
                len, self.max_body_chars
            )));
        }
        Ok(())
    }

    /// Validate and record a new pending message; nothing is recorded on error
    pub fn compose(&mut self, conversation: ConversationIdentity, body: &str) -> Result<Message> {
        self.validate_body(body)?;
        let outbound = OutboundMessage {
            local_id: format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()),
            conversation,
            body: body.to_string(),
            created_at: Utc::now(),
            state: DeliveryState::Pending,
            attempts: 1,
            last_error: None,
        };
        let message = self.as_message(&outbound);
        self.outbox.push(outbound);
        Ok(message)
    }

    fn as_message(&self, outbound: &OutboundMessage) -> Message {
        Message {
            id: outbound.local_id.clone(),
            conversation: outbound.conversation.clone(),
            sender_id: self.sender_id.clone(),
            body: outbound.body.clone(),
            created_at: outbound.created_at,
            delivery_state: outbound.state,
        }
    }

    pub fn get(&self, local_id: &str) -> Option<&OutboundMessage> {
        self.outbox.iter().find(|m| m.local_id == local_id)
    }

    fn get_mut(&mut self, local_id: &str) -> Result<&mut OutboundMessage> {
        self.outbox
            .iter_mut()
            .find(|m| m.local_id == local_id)
            .ok_or_else(|| SyncError::Conflict(format!("no outbound message {}", local_id)))
    }

    /// Server accepted the message; it leaves the outbox
    pub fn confirm(&mut self, local_id: &str) -> Result<OutboundMessage> {
        let entry = self.get_mut(local_id)?;
        entry.state = transition(entry.state, DeliveryEvent::Confirmed)?;
        let pos = self
            .outbox
            .iter()
            .position(|m| m.local_id == local_id)
            .ok_or_else(|| SyncError::Conflict(format!("no outbound message {}", local_id)))?;
        Ok(self.outbox.remove(pos))
    }

    pub fn fail(&mut self, local_id: &str, error: SyncError) -> Result<()> {
        let entry = self.get_mut(local_id)?;
        entry.state = transition(entry.state, DeliveryEvent::Errored)?;
        entry.last_error = Some(error);
        Ok(())
    }

    /// Move a failed message back to pending for another attempt
    pub fn retry(&mut self, local_id: &str) -> Result<Message> {
        let entry = self.get_mut(local_id)?;
        entry.state = transition(entry.state, DeliveryEvent::Retried)?;
        entry.attempts += 1;
        entry.last_error = None;
        let snapshot = entry.clone();
        Ok(self.as_message(&snapshot))
    }

    /// Pending and failed messages of one conversation, oldest first
    pub fn unconfirmed_for(&self, conversation: &ConversationIdentity) -> Vec<Message> {
        self.outbox
            .iter()
            .filter(|m| &m.conversation == conversation)
            .map(|m| self.as_message(m))
            .collect()
    }

    /// Drop everything queued for a deleted conversation
    pub fn forget_conversation(&mut self, conversation: &ConversationIdentity) -> usize {
        let before = self.outbox.len();
        self.outbox.retain(|m| &m.conversation != conversation);
        before - self.outbox.len()
    }

    pub fn len(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.is_empty()
    }
}
