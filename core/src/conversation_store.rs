/// Conversation store: the authoritative in-memory sidebar state
use crate::error::{Result, SyncError};
use crate::identity::{ConversationIdentity, Identified};
use crate::messenger_types::{
    ConversationContext, ConversationSummary, Message, Participant, SessionUser,
};
use std::collections::HashMap;
use tracing::debug;

struct Entry {
    summary: ConversationSummary,
    /// Changes when a summary is deleted and later recreated
    incarnation: u64,
    /// Read locally; survives stale server counts until new unread arrives
    locally_read: bool,
}

/// What the store did with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Already applied earlier in this session
    Duplicate,
    /// Belongs to the selected conversation; unread untouched
    ForSelected,
    /// Sent by the current user from elsewhere; never unread
    OwnMessage,
    Counted { unread_count: u32 },
}

pub struct ConversationStore {
    viewer: SessionUser,
    entries: HashMap<ConversationIdentity, Entry>,
    selected: Option<ConversationIdentity>,
    /// Message ids already applied, by conversation
    seen_inbound: HashMap<String, ConversationIdentity>,
    next_incarnation: u64,
    preview_chars: usize,
}

impl ConversationStore {
    pub fn new(viewer: SessionUser, preview_chars: usize) -> Self {
        Self {
            viewer,
            entries: HashMap::new(),
            selected: None,
            seen_inbound: HashMap::new(),
            next_incarnation: 1,
            preview_chars,
        }
    }

    fn bump_incarnation(&mut self) -> u64 {
        let n = self.next_incarnation;
        self.next_incarnation += 1;
        n
    }

    // ===== Getters =====

    pub fn get(&self, identity: &ConversationIdentity) -> Option<&ConversationSummary> {
        self.entries.get(identity).map(|e| &e.summary)
    }

    pub fn contains(&self, identity: &ConversationIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn unread_count(&self, identity: &ConversationIdentity) -> Option<u32> {
        self.entries.get(identity).map(|e| e.summary.unread_count)
    }

    pub fn incarnation(&self, identity: &ConversationIdentity) -> Option<u64> {
        self.entries.get(identity).map(|e| e.incarnation)
    }

    /// Every summary, hidden ones included
    pub fn summaries(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.entries.values().map(|e| &e.summary)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected(&self) -> Option<&ConversationIdentity> {
        self.selected.as_ref()
    }

    pub fn is_selected(&self, identity: &ConversationIdentity) -> bool {
        self.selected.as_ref() == Some(identity)
    }

    /// Unread messages across visible conversations
    pub fn total_unread(&self) -> u32 {
        self.entries
            .values()
            .filter(|e| !e.summary.is_hidden)
            .map(|e| e.summary.unread_count)
            .sum()
    }

    // ===== Mutations =====

    /// Replace the store with a full backend listing.
    ///
    /// A conversation read locally keeps its local count unless the listing
    /// shows a message newer than the last one this store knows about.
    pub fn replace_all(&mut self, listing: Vec<ConversationSummary>) -> usize {
        let mut previous = std::mem::take(&mut self.entries);
        let mut next = HashMap::with_capacity(listing.len());

        for mut summary in listing {
            let identity = summary.identity();
            let entry = match previous.remove(&identity) {
                Some(old) => {
                    let mut locally_read = old.locally_read;
                    if locally_read {
                        let newer = match (summary.last_message_at, old.summary.last_message_at) {
                            (Some(server), Some(local)) => server > local,
                            (Some(_), None) => true,
                            _ => false,
                        };
                        if newer {
                            locally_read = false;
                        } else {
                            summary.unread_count = old.summary.unread_count;
                        }
                    }
                    Entry {
                        summary,
                        incarnation: old.incarnation,
                        locally_read,
                    }
                }
                None => Entry {
                    summary,
                    incarnation: self.bump_incarnation(),
                    locally_read: false,
                },
            };
            next.insert(identity, entry);
        }

        if let Some(selected) = self.selected.take() {
            match next.get_mut(&selected) {
                Some(entry) => {
                    entry.summary.unread_count = 0;
                    self.selected = Some(selected);
                }
                None => debug!("Selected conversation {} is gone from the listing", selected),
            }
        }
        self.seen_inbound
            .retain(|_, identity| next.contains_key(identity));

        debug!(
            "Replaced conversation store: {} entries ({} dropped)",
            next.len(),
            previous.len()
        );
        self.entries = next;
        self.entries.len()
    }

    /// Apply a push-delivered message to its summary
    pub fn apply_inbound(&mut self, msg: &Message) -> InboundOutcome {
        let identity = msg.identity();
        if self.seen_inbound.contains_key(&msg.id) {
            return InboundOutcome::Duplicate;
        }
        self.seen_inbound.insert(msg.id.clone(), identity.clone());

        let own = msg.sender_id == self.viewer.id;
        let selected = self.is_selected(&identity);
        let preview = make_preview(&msg.body, self.preview_chars);

        if !self.entries.contains_key(&identity) {
            let summary = ConversationSummary {
                participant: Participant::unresolved(
                    identity.counterpart_id.clone(),
                    self.viewer.role.counterpart(),
                ),
                context: ConversationContext::from_identity(&identity),
                last_message_preview: String::new(),
                last_message_at: None,
                unread_count: 0,
                is_hidden: false,
            };
            let incarnation = self.bump_incarnation();
            debug!("Created conversation {} from push", identity);
            self.entries.insert(
                identity.clone(),
                Entry {
                    summary,
                    incarnation,
                    locally_read: false,
                },
            );
        }

        let Some(entry) = self.entries.get_mut(&identity) else {
            return InboundOutcome::Duplicate;
        };
        touch_last_message(&mut entry.summary, preview, msg);
        if entry.summary.is_hidden {
            debug!("Message revived hidden conversation {}", identity);
            entry.summary.is_hidden = false;
        }

        if selected {
            // Shown in the open thread, so already read
            entry.locally_read = true;
            InboundOutcome::ForSelected
        } else if own {
            InboundOutcome::OwnMessage
        } else {
            entry.summary.unread_count += 1;
            entry.locally_read = false;
            InboundOutcome::Counted {
                unread_count: entry.summary.unread_count,
            }
        }
    }

    /// Record a message the current user sent; returns false if unknown.
    /// Visibility is left alone: only the backend's unhide changes it.
    pub fn apply_outbound(&mut self, msg: &Message) -> bool {
        let preview = make_preview(&msg.body, self.preview_chars);
        match self.entries.get_mut(&msg.conversation) {
            Some(entry) => {
                touch_last_message(&mut entry.summary, preview, msg);
                self.seen_inbound
                    .insert(msg.id.clone(), msg.conversation.clone());
                true
            }
            None => false,
        }
    }

    pub fn hide(&mut self, identity: &ConversationIdentity) -> Result<()> {
        self.set_hidden(identity, true)
    }

    pub fn unhide(&mut self, identity: &ConversationIdentity) -> Result<()> {
        self.set_hidden(identity, false)
    }

    fn set_hidden(&mut self, identity: &ConversationIdentity, hidden: bool) -> Result<()> {
        let entry = self
            .entries
            .get_mut(identity)
            .ok_or_else(|| SyncError::UnknownConversation(identity.clone()))?;
        entry.summary.is_hidden = hidden;
        Ok(())
    }

    /// Remove a summary for good; returns true if it was selected
    pub fn delete(&mut self, identity: &ConversationIdentity) -> Result<bool> {
        self.entries
            .remove(identity)
            .ok_or_else(|| SyncError::UnknownConversation(identity.clone()))?;
        self.seen_inbound.retain(|_, seen| seen != identity);
        let was_selected = self.is_selected(identity);
        if was_selected {
            self.selected = None;
        }
        Ok(was_selected)
    }

    /// Select a conversation, returning its unread count
    pub fn select(&mut self, identity: &ConversationIdentity) -> Result<u32> {
        let unread = self
            .unread_count(identity)
            .ok_or_else(|| SyncError::UnknownConversation(identity.clone()))?;
        self.selected = Some(identity.clone());
        Ok(unread)
    }

    pub fn clear_selection(&mut self) -> Option<ConversationIdentity> {
        self.selected.take()
    }

    /// Apply a mark-read acknowledgment.
    ///
    /// `incarnation` and `dispatched_unread` are captured when the request is
    /// sent. A deleted (or deleted and recreated) conversation is a conflict.
    pub fn acknowledge_read(
        &mut self,
        identity: &ConversationIdentity,
        incarnation: u64,
        dispatched_unread: u32,
    ) -> Result<u32> {
        let selected = self.is_selected(identity);
        let entry = match self.entries.get_mut(identity) {
            Some(entry) if entry.incarnation == incarnation => entry,
            _ => {
                return Err(SyncError::Conflict(format!(
                    "conversation {} was deleted before its read receipt returned",
                    identity
                )))
            }
        };

        entry.summary.unread_count = if selected {
            0
        } else {
            entry.summary.unread_count.saturating_sub(dispatched_unread)
        };
        entry.locally_read = entry.summary.unread_count == 0;
        Ok(entry.summary.unread_count)
    }
}

fn touch_last_message(summary: &mut ConversationSummary, preview: String, msg: &Message) {
    let is_latest = match summary.last_message_at {
        Some(at) => msg.created_at >= at,
        None => true,
    };
    if is_latest {
        summary.last_message_preview = preview;
        summary.last_message_at = Some(msg.created_at);
    }
}

/// Single-line preview cut on a char boundary
pub fn make_preview(body: &str, max_chars: usize) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger_types::{DeliveryState, Role};
    use chrono::{DateTime, Duration, Utc};

    fn viewer() -> SessionUser {
        SessionUser {
            id: "cand-me".to_string(),
            role: Role::Candidate,
        }
    }

    fn summary(counterpart: &str, job: Option<&str>, unread: u32) -> ConversationSummary {
        ConversationSummary {
            participant: Participant {
                id: counterpart.to_string(),
                display_name: format!("Recruiter {}", counterpart),
                avatar_url: None,
                role: Role::Recruiter,
                company: None,
            },
            context: ConversationContext {
                job_id: job.map(String::from),
                application_id: None,
                job_title: None,
            },
            last_message_preview: "earlier".to_string(),
            last_message_at: Some(base_time()),
            unread_count: unread,
            is_hidden: false,
        }
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn message(id: &str, identity: &ConversationIdentity, sender: &str, mins: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation: identity.clone(),
            sender_id: sender.to_string(),
            body: format!("body of {}", id),
            created_at: base_time() + Duration::minutes(mins),
            delivery_state: DeliveryState::Sent,
        }
    }

    fn store_with(listing: Vec<ConversationSummary>) -> ConversationStore {
        let mut store = ConversationStore::new(viewer(), 80);
        store.replace_all(listing);
        store
    }

    #[test]
    fn test_same_counterpart_different_jobs_count_independently() {
        let mut store = store_with(vec![
            summary("rec-1", Some("job-a"), 0),
            summary("rec-1", Some("job-b"), 0),
        ]);
        let a = ConversationIdentity::new("rec-1", Some("job-a".into()), None);
        let b = ConversationIdentity::new("rec-1", Some("job-b".into()), None);

        store.apply_inbound(&message("m1", &a, "rec-1", 1));
        store.apply_inbound(&message("m2", &a, "rec-1", 2));
        store.apply_inbound(&message("m3", &b, "rec-1", 3));

        assert_eq!(store.len(), 2);
        assert_eq!(store.unread_count(&a), Some(2));
        assert_eq!(store.unread_count(&b), Some(1));
    }

    #[test]
    fn test_inbound_for_selected_does_not_count() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");
        store.select(&id).unwrap();

        let outcome = store.apply_inbound(&message("m1", &id, "rec-1", 5));
        assert_eq!(outcome, InboundOutcome::ForSelected);
        assert_eq!(store.unread_count(&id), Some(0));
        assert_eq!(store.get(&id).unwrap().last_message_preview, "body of m1");
    }

    #[test]
    fn test_duplicate_push_counts_once() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");
        let msg = message("m1", &id, "rec-1", 1);

        assert_eq!(
            store.apply_inbound(&msg),
            InboundOutcome::Counted { unread_count: 1 }
        );
        assert_eq!(store.apply_inbound(&msg), InboundOutcome::Duplicate);
        assert_eq!(store.unread_count(&id), Some(1));
    }

    #[test]
    fn test_own_message_echo_is_not_unread() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");

        let outcome = store.apply_inbound(&message("m1", &id, "cand-me", 1));
        assert_eq!(outcome, InboundOutcome::OwnMessage);
        assert_eq!(store.unread_count(&id), Some(0));
    }

    #[test]
    fn test_message_revives_hidden_conversation() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");
        store.hide(&id).unwrap();
        assert!(store.get(&id).unwrap().is_hidden);

        store.apply_inbound(&message("m1", &id, "rec-1", 1));
        assert!(!store.get(&id).unwrap().is_hidden);
    }

    #[test]
    fn test_hide_unhide_round_trip_preserves_state() {
        let mut store = store_with(vec![summary("rec-1", None, 4)]);
        let id = ConversationIdentity::general("rec-1");
        let before = store.get(&id).unwrap().clone();

        store.hide(&id).unwrap();
        assert_eq!(store.total_unread(), 0);
        store.unhide(&id).unwrap();

        assert_eq!(store.get(&id).unwrap(), &before);
        assert_eq!(store.total_unread(), 4);
    }

    #[test]
    fn test_unknown_identity_creates_unresolved_summary() {
        let mut store = store_with(vec![]);
        let id = ConversationIdentity::new("rec-5", Some("job-x".into()), Some("app-1".into()));

        store.apply_inbound(&message("m1", &id, "rec-5", 1));
        let created = store.get(&id).unwrap();
        assert_eq!(created.participant.display_name, "rec-5");
        assert_eq!(created.participant.role, Role::Recruiter);
        assert_eq!(created.context.application_id.as_deref(), Some("app-1"));
        assert_eq!(created.unread_count, 1);
    }

    #[test]
    fn test_reload_keeps_local_read_state_over_stale_count() {
        let mut store = store_with(vec![summary("rec-1", None, 3)]);
        let id = ConversationIdentity::general("rec-1");
        let inc = store.incarnation(&id).unwrap();

        store.select(&id).unwrap();
        store.acknowledge_read(&id, inc, 3).unwrap();
        store.clear_selection();

        // Server has not caught up yet
        store.replace_all(vec![summary("rec-1", None, 3)]);
        assert_eq!(store.unread_count(&id), Some(0));

        // A genuinely new message resets the local read state
        store.apply_inbound(&message("m9", &id, "rec-1", 30));
        assert_eq!(store.unread_count(&id), Some(1));
        store.replace_all(vec![summary("rec-1", None, 4)]);
        assert_eq!(store.unread_count(&id), Some(4));
    }

    #[test]
    fn test_reload_with_newer_server_message_accepts_count() {
        let mut store = store_with(vec![summary("rec-1", None, 2)]);
        let id = ConversationIdentity::general("rec-1");
        let inc = store.incarnation(&id).unwrap();
        store.acknowledge_read(&id, inc, 2).unwrap();

        let mut fresh = summary("rec-1", None, 1);
        fresh.last_message_at = Some(base_time() + Duration::minutes(10));
        store.replace_all(vec![fresh]);
        assert_eq!(store.unread_count(&id), Some(1));
    }

    #[test]
    fn test_ack_after_navigation_keeps_newer_unread() {
        let mut store = store_with(vec![summary("rec-1", None, 3)]);
        let id = ConversationIdentity::general("rec-1");
        let inc = store.incarnation(&id).unwrap();
        store.select(&id).unwrap();
        store.clear_selection();

        store.apply_inbound(&message("m1", &id, "rec-1", 1));
        store.apply_inbound(&message("m2", &id, "rec-1", 2));
        assert_eq!(store.acknowledge_read(&id, inc, 3).unwrap(), 2);
    }

    #[test]
    fn test_ack_for_deleted_conversation_is_conflict() {
        let mut store = store_with(vec![summary("rec-1", None, 3)]);
        let id = ConversationIdentity::general("rec-1");
        let inc = store.incarnation(&id).unwrap();

        store.delete(&id).unwrap();
        let err = store.acknowledge_read(&id, inc, 3).unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));

        // Recreated by a later push: the old receipt still must not apply
        store.apply_inbound(&message("m1", &id, "rec-1", 1));
        assert!(store.acknowledge_read(&id, inc, 3).is_err());
        assert_eq!(store.unread_count(&id), Some(1));
    }

    #[test]
    fn test_delete_selected_clears_selection() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");
        store.select(&id).unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(store.selected().is_none());
        assert!(!store.contains(&id));
        assert!(matches!(
            store.delete(&id),
            Err(SyncError::UnknownConversation(_))
        ));
    }

    #[test]
    fn test_message_seen_in_open_thread_survives_stale_reload() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");
        store.select(&id).unwrap();
        store.apply_inbound(&message("m1", &id, "rec-1", 5));
        store.clear_selection();

        let mut stale = summary("rec-1", None, 1);
        stale.last_message_at = Some(base_time() + Duration::minutes(5));
        store.replace_all(vec![stale]);
        assert_eq!(store.unread_count(&id), Some(0));
    }

    #[test]
    fn test_reload_without_selected_conversation_clears_selection() {
        let mut store = store_with(vec![
            summary("rec-1", None, 0),
            summary("rec-2", None, 2),
        ]);
        let gone = ConversationIdentity::general("rec-1");
        store.select(&gone).unwrap();

        store.replace_all(vec![summary("rec-2", None, 2)]);
        assert!(store.selected().is_none());
        assert!(!store.contains(&gone));
    }

    #[test]
    fn test_seen_ids_pruned_with_their_conversation() {
        let mut store = store_with(vec![
            summary("rec-1", None, 0),
            summary("rec-2", None, 0),
        ]);
        let one = ConversationIdentity::general("rec-1");
        let two = ConversationIdentity::general("rec-2");
        store.apply_inbound(&message("m1", &one, "rec-1", 1));
        store.apply_inbound(&message("m2", &two, "rec-2", 2));
        assert_eq!(store.seen_inbound.len(), 2);

        store.delete(&one).unwrap();
        assert_eq!(store.seen_inbound.len(), 1);

        store.replace_all(Vec::new());
        assert!(store.seen_inbound.is_empty());
    }

    #[test]
    fn test_outbound_leaves_hidden_flag_alone() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");
        store.hide(&id).unwrap();

        assert!(store.apply_outbound(&message("srv-1", &id, "cand-me", 3)));
        let after = store.get(&id).unwrap();
        assert!(after.is_hidden);
        assert_eq!(after.last_message_preview, "body of srv-1");
        // The push echo of our own message is still recognised
        assert_eq!(
            store.apply_inbound(&message("srv-1", &id, "cand-me", 3)),
            InboundOutcome::Duplicate
        );
    }

    #[test]
    fn test_out_of_order_push_does_not_regress_preview() {
        let mut store = store_with(vec![summary("rec-1", None, 0)]);
        let id = ConversationIdentity::general("rec-1");

        store.apply_inbound(&message("late", &id, "rec-1", 20));
        store.apply_inbound(&message("early", &id, "rec-1", 10));
        assert_eq!(store.get(&id).unwrap().last_message_preview, "body of late");
        assert_eq!(store.unread_count(&id), Some(2));
    }

    #[test]
    fn test_preview_is_flattened_and_cut() {
        assert_eq!(make_preview("hello\n  there", 80), "hello there");
        assert_eq!(make_preview("abcdefgh", 5), "abcd…");
        assert_eq!(make_preview("héllo", 5), "héllo");
    }
}
