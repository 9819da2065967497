/// Read receipts: when to send mark-read and how to apply the acknowledgment
use crate::conversation_store::ConversationStore;
use crate::error::Result;
use crate::identity::ConversationIdentity;
use std::collections::HashSet;

/// State captured when a mark-read request is dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptTicket {
    pub identity: ConversationIdentity,
    pub incarnation: u64,
    pub dispatched_unread: u32,
}

/// Tracks mark-read requests in flight. These are never cancelled.
#[derive(Default)]
pub struct ReadReceipts {
    in_flight: HashSet<ConversationIdentity>,
}

impl ReadReceipts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, identity: &ConversationIdentity) -> bool {
        self.in_flight.contains(identity)
    }

    /// A ticket if selecting `identity` should send mark-read: it has unread
    /// messages and no request for it is already outstanding.
    pub fn on_selected(
        &mut self,
        store: &ConversationStore,
        identity: &ConversationIdentity,
    ) -> Option<ReceiptTicket> {
        let unread = store.unread_count(identity)?;
        if unread == 0 || self.in_flight.contains(identity) {
            return None;
        }
        let incarnation = store.incarnation(identity)?;
        self.in_flight.insert(identity.clone());
        Some(ReceiptTicket {
            identity: identity.clone(),
            incarnation,
            dispatched_unread: unread,
        })
    }

    /// Apply the backend's answer, however late it arrives.
    /// Returns the resulting unread count.
    pub fn complete(
        &mut self,
        ticket: &ReceiptTicket,
        store: &mut ConversationStore,
        response: Result<()>,
    ) -> Result<u32> {
        self.in_flight.remove(&ticket.identity);
        response?;
        store.acknowledge_read(&ticket.identity, ticket.incarnation, ticket.dispatched_unread)
    }
}
