/// Request/response backend consumed by the messaging session
use crate::error::{Result, SyncError};
use crate::identity::ConversationIdentity;
use crate::messenger_types::{ConversationSummary, Message};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Backend operations. Implementations map their transport failures to
/// `SyncError::TransientNetwork`.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// All conversations of the current user
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Up to `limit` most recent messages, oldest first
    async fn message_history(
        &self,
        identity: &ConversationIdentity,
        limit: usize,
    ) -> Result<Vec<Message>>;

    async fn send_message(&self, identity: &ConversationIdentity, body: &str) -> Result<Message>;

    async fn mark_read(&self, identity: &ConversationIdentity) -> Result<()>;

    async fn hide(&self, identity: &ConversationIdentity) -> Result<()>;

    async fn unhide(&self, identity: &ConversationIdentity) -> Result<()>;

    async fn delete(&self, identity: &ConversationIdentity) -> Result<()>;
}

/// Run a backend call with an upper time bound
pub async fn with_timeout<T, F>(limit: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::TransientNetwork(format!(
            "{} timed out after {}ms",
            what,
            limit.as_millis()
        ))),
    }
}
