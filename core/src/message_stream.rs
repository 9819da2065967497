/// Message stream for the selected conversation: history merged with live pushes
use crate::error::{Result, SyncError};
use crate::identity::ConversationIdentity;
use crate::messenger_types::{DeliveryState, Message};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum StreamState {
    Idle,
    Loading {
        identity: ConversationIdentity,
        generation: u64,
    },
    Ready {
        identity: ConversationIdentity,
    },
    /// History load failed; the pane shows an empty state with a retry
    Failed {
        identity: ConversationIdentity,
        error: SyncError,
    },
}

impl StreamState {
    pub fn identity(&self) -> Option<&ConversationIdentity> {
        match self {
            StreamState::Idle => None,
            StreamState::Loading { identity, .. }
            | StreamState::Ready { identity }
            | StreamState::Failed { identity, .. } => Some(identity),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Loading { .. } => "loading",
            StreamState::Ready { .. } => "ready",
            StreamState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StreamState::Ready { .. })
    }
}

/// What happened to a live message offered to the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Appended,
    /// Held until the in-flight history load lands
    Buffered,
    Duplicate,
    /// Not for the rendered conversation
    NotShown,
}

pub struct MessageStream {
    state: StreamState,
    generation: u64,
    messages: Vec<Message>,
    buffered: Vec<Message>,
}

impl Default for MessageStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStream {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            generation: 0,
            messages: Vec::new(),
            buffered: Vec::new(),
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn identity(&self) -> Option<&ConversationIdentity> {
        self.state.identity()
    }

    pub fn is_ready_for(&self, identity: &ConversationIdentity) -> bool {
        matches!(&self.state, StreamState::Ready { identity: id } if id == identity)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id) || self.buffered.iter().any(|m| m.id == id)
    }

    /// Start loading `identity`; returns the generation the request must carry
    pub fn begin_load(&mut self, identity: ConversationIdentity) -> u64 {
        self.generation += 1;
        self.messages.clear();
        self.buffered.clear();
        self.state = StreamState::Loading {
            identity,
            generation: self.generation,
        };
        self.generation
    }

    /// Land a history response. `local` carries unconfirmed outbound
    /// messages for the same conversation.
    pub fn complete_load(
        &mut self,
        generation: u64,
        history: Vec<Message>,
        local: Vec<Message>,
    ) -> Result<usize> {
        let identity = self.loading_identity(generation)?;

        // Unconfirmed local records go through the same ordering as history
        let mut merged: Vec<Message> = history
            .into_iter()
            .chain(self.buffered.drain(..))
            .chain(local)
            .filter(|m| m.conversation == identity)
            .collect();
        merged.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut seen = HashSet::new();
        merged.retain(|m| seen.insert(m.id.clone()));

        debug!(
            "History ready for {} (generation {}): {} messages",
            identity,
            generation,
            merged.len()
        );
        self.messages = merged;
        self.state = StreamState::Ready { identity };
        Ok(self.messages.len())
    }

    /// Record a failed history load for the current generation
    pub fn fail_load(&mut self, generation: u64, error: SyncError) -> Result<()> {
        let identity = self.loading_identity(generation)?;
        self.messages.clear();
        self.buffered.clear();
        self.state = StreamState::Failed { identity, error };
        Ok(())
    }

    fn loading_identity(&self, generation: u64) -> Result<ConversationIdentity> {
        match &self.state {
            StreamState::Loading {
                identity,
                generation: current,
            } if *current == generation => Ok(identity.clone()),
            _ => Err(SyncError::StaleRequest { generation }),
        }
    }

    /// Offer a push-delivered message
    pub fn offer_live(&mut self, msg: Message) -> LiveOutcome {
        match &self.state {
            StreamState::Loading { identity, .. } if *identity == msg.conversation => {
                if self.buffered.iter().any(|m| m.id == msg.id) {
                    LiveOutcome::Duplicate
                } else {
                    self.buffered.push(msg);
                    LiveOutcome::Buffered
                }
            }
            StreamState::Ready { identity } if *identity == msg.conversation => {
                if self.insert_ordered(msg) {
                    LiveOutcome::Appended
                } else {
                    LiveOutcome::Duplicate
                }
            }
            _ => LiveOutcome::NotShown,
        }
    }

    /// Insert by (created_at, id) without disturbing existing entries
    fn insert_ordered(&mut self, msg: Message) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.sort_key() <= msg.sort_key());
        self.messages.insert(pos, msg);
        true
    }

    /// Show an optimistic outbound message; false if its conversation is not rendered
    pub fn push_pending(&mut self, msg: Message) -> bool {
        match &self.state {
            StreamState::Loading { identity, .. } if *identity == msg.conversation => {
                self.buffered.push(msg);
                true
            }
            StreamState::Ready { identity } if *identity == msg.conversation => {
                if self.messages.iter().any(|m| m.id == msg.id) {
                    return false;
                }
                self.messages.push(msg);
                true
            }
            _ => false,
        }
    }

    /// Swap an optimistic record for the server's, keeping its position
    pub fn confirm(&mut self, local_id: &str, mut confirmed: Message) -> bool {
        confirmed.delivery_state = DeliveryState::Sent;

        for list in [&mut self.messages, &mut self.buffered] {
            if list.iter().any(|m| m.id == local_id) {
                // A push echo of the same message may have landed first
                list.retain(|m| m.id != confirmed.id);
                if let Some(slot) = list.iter_mut().find(|m| m.id == local_id) {
                    *slot = confirmed;
                    return true;
                }
            }
        }

        !matches!(self.offer_live(confirmed), LiveOutcome::NotShown)
    }

    pub fn set_delivery_state(&mut self, id: &str, state: DeliveryState) -> bool {
        match self
            .messages
            .iter_mut()
            .chain(self.buffered.iter_mut())
            .find(|m| m.id == id)
        {
            Some(msg) => {
                msg.delivery_state = state;
                true
            }
            None => false,
        }
    }

    /// Back to idle; any in-flight load becomes stale
    pub fn reset(&mut self) {
        self.generation += 1;
        self.messages.clear();
        self.buffered.clear();
        self.state = StreamState::Idle;
    }
}
