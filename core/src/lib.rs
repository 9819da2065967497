//! HireChat messaging core
//!
//! Keeps a live, consistent view of a user's one-to-one conversations,
//! unread counts, counterpart presence and the selected message stream,
//! reconciling request/response results with push-delivered events.

pub mod backend;
pub mod composer;
pub mod config;
pub mod conversation_store;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod logging;
pub mod message_stream;
pub mod messenger_types;
pub mod presence;
pub mod push;
pub mod read_receipt;
pub mod session;
pub mod sidebar;

pub use backend::ConversationBackend;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use identity::{identity_of, ConversationIdentity};
pub use messenger_types::{
    ConversationContext, ConversationSummary, DeliveryState, Message, Participant, Role,
    SessionEvent, SessionUser,
};
pub use push::{PushSink, PushTransport};
pub use session::MessagingSession;
