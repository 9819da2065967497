/// Error types for the messaging sync core
use crate::identity::ConversationIdentity;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Network or backend failure that may succeed on retry
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Response for a request superseded by a newer selection
    #[error("Stale response for generation {generation}")]
    StaleRequest { generation: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationIdentity),

    #[error("Invalid delivery transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Only transient network failures are offered a retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Expected outcomes that are logged but never shown to the user
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            SyncError::StaleRequest { .. } | SyncError::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
