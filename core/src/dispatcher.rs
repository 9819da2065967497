/// Push dispatcher: drains the push queue in delivery order and routes events
use crate::push::{PushEvent, RawPushEvent};
use crate::session::MessagingSession;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct PushDispatcher {
    rx: mpsc::UnboundedReceiver<RawPushEvent>,
    session: MessagingSession,
}

impl PushDispatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<RawPushEvent>, session: MessagingSession) -> Self {
        Self { rx, session }
    }

    /// Run until every sink is dropped
    pub async fn run(mut self) {
        while let Some(raw) = self.rx.recv().await {
            self.dispatch(raw).await;
        }
        debug!("Push queue closed, dispatcher stopping");
    }

    async fn dispatch(&self, raw: RawPushEvent) {
        match PushEvent::decode(&raw) {
            Ok(Some(event)) => route(&self.session, event).await,
            Ok(None) => debug!("Ignoring push event {}", raw.name),
            Err(e) => warn!("Dropping undecodable {} event: {}", raw.name, e),
        }
    }
}

/// Hand one event to the component that owns it
pub async fn route(session: &MessagingSession, event: PushEvent) {
    match event {
        PushEvent::MessageNew(message) => session.apply_push_message(message).await,
        PushEvent::PresenceChanged {
            participant_id,
            online,
        } => session.apply_presence(&participant_id, online).await,
    }
}
