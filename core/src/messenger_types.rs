/// Shared types for the messaging layer
use crate::error::SyncError;
use crate::identity::{ConversationIdentity, Identified};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Candidate,
    Recruiter,
}

impl Role {
    /// The role on the other side of a conversation
    pub fn counterpart(self) -> Role {
        match self {
            Role::Candidate => Role::Recruiter,
            Role::Recruiter => Role::Candidate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    pub id: String,
    pub name: String,
}

/// Snapshot of the other party, refreshed only by a full list reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub company: Option<CompanyRef>,
}

impl Participant {
    /// Placeholder for a counterpart first seen through a push event
    pub fn unresolved(id: impl Into<String>, role: Role) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            avatar_url: None,
            role,
            company: None,
        }
    }
}

/// Job context of a thread; all fields absent for a general thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

impl ConversationContext {
    pub fn from_identity(identity: &ConversationIdentity) -> Self {
        Self {
            job_id: identity.job_id.clone(),
            application_id: identity.application_id.clone(),
            job_title: None,
        }
    }
}

/// One sidebar entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub participant: Participant,
    #[serde(default)]
    pub context: ConversationContext,
    #[serde(default)]
    pub last_message_preview: String,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_hidden: bool,
}

impl Identified for ConversationSummary {
    fn identity(&self) -> ConversationIdentity {
        ConversationIdentity::new(
            self.participant.id.clone(),
            self.context.job_id.clone(),
            self.context.application_id.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    #[default]
    Sent,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation: ConversationIdentity,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Total order within a conversation: created_at, then id
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    pub fn sorts_before(&self, other: &Message) -> bool {
        self.sort_key() < other.sort_key()
    }
}

impl Identified for Message {
    fn identity(&self) -> ConversationIdentity {
        self.conversation.clone()
    }
}

/// The signed-in user, as provided by the auth context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub role: Role,
}

/// Store operations that can fail against the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Reload,
    Hide,
    Unhide,
    Delete,
    MarkRead,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::Reload => "reload",
            StoreOperation::Hide => "hide",
            StoreOperation::Unhide => "unhide",
            StoreOperation::Delete => "delete",
            StoreOperation::MarkRead => "mark-read",
        };
        f.write_str(name)
    }
}

/// Change notifications for UI layers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Sidebar entries, unread counts or visibility changed
    ConversationsChanged,
    /// The rendered message list of `identity` changed
    MessagesChanged { identity: ConversationIdentity },
    PresenceChanged { participant_id: String, online: bool },
    /// History could not be loaded; the pane offers a retry
    HistoryFailed {
        identity: ConversationIdentity,
        error: SyncError,
    },
    /// A composed message is now in the failed state
    SendFailed { local_id: String, error: SyncError },
    OperationFailed {
        identity: Option<ConversationIdentity>,
        operation: StoreOperation,
        error: SyncError,
    },
}
