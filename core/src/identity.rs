/// Conversation identity: one thread per (counterpart, job, application)
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendering used for an absent job or application id
pub const NO_CONTEXT: &str = "none";

/// Composite key for a one-to-one conversation.
///
/// The same two people can hold independent threads per job application,
/// so the job and application ids are part of the key. An absent id and a
/// present-but-empty id are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationIdentity {
    pub counterpart_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

impl ConversationIdentity {
    pub fn new(
        counterpart_id: impl Into<String>,
        job_id: Option<String>,
        application_id: Option<String>,
    ) -> Self {
        Self {
            counterpart_id: counterpart_id.into(),
            job_id,
            application_id,
        }
    }

    /// A thread with no job context
    pub fn general(counterpart_id: impl Into<String>) -> Self {
        Self::new(counterpart_id, None, None)
    }

    pub fn is_general(&self) -> bool {
        self.job_id.is_none() && self.application_id.is_none()
    }
}

impl fmt::Display for ConversationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug rendering only; equality never goes through this string
        write!(
            f,
            "{}/{}/{}",
            self.counterpart_id,
            render_part(&self.job_id),
            render_part(&self.application_id)
        )
    }
}

fn render_part(part: &Option<String>) -> String {
    match part {
        None => NO_CONTEXT.to_string(),
        Some(id) => format!("{:?}", id),
    }
}

/// Anything that belongs to exactly one conversation
pub trait Identified {
    fn identity(&self) -> ConversationIdentity;
}

/// Resolve the conversation a summary or message belongs to
pub fn identity_of<T: Identified + ?Sized>(item: &T) -> ConversationIdentity {
    item.identity()
}
