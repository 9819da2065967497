/// Messaging session: the conversation service injected into UI layers
use crate::backend::{with_timeout, ConversationBackend};
use crate::composer::{Composer, OutboundMessage};
use crate::config::SyncConfig;
use crate::conversation_store::{ConversationStore, InboundOutcome};
use crate::dispatcher::PushDispatcher;
use crate::error::{Result, SyncError};
use crate::identity::ConversationIdentity;
use crate::message_stream::{LiveOutcome, MessageStream, StreamState};
use crate::messenger_types::{
    ConversationSummary, DeliveryState, Message, SessionEvent, SessionUser, StoreOperation,
};
use crate::presence::PresenceTracker;
use crate::push::{self, PushTransport, SUBSCRIBED_EVENTS};
use crate::read_receipt::{ReadReceipts, ReceiptTicket};
use crate::sidebar;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Inner {
    user: SessionUser,
    config: SyncConfig,
    backend: Arc<dyn ConversationBackend>,
    transport: Arc<dyn PushTransport>,
    store: RwLock<ConversationStore>,
    stream: RwLock<MessageStream>,
    presence: PresenceTracker,
    receipts: Mutex<ReadReceipts>,
    composer: Mutex<Composer>,
    /// Mark-read and send requests; these always run to completion
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// The one cancellable request: history for the current selection
    history_task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Live view of the user's conversations.
///
/// Every state change happens under a short lock that is never held across
/// a backend call. Stale history responses are rejected by generation.
#[derive(Clone)]
pub struct MessagingSession {
    inner: Arc<Inner>,
}

impl MessagingSession {
    pub fn new(
        user: SessionUser,
        mut config: SyncConfig,
        backend: Arc<dyn ConversationBackend>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let store = ConversationStore::new(user.clone(), config.preview_chars);
        let composer = Composer::new(user.id.clone(), config.max_body_chars);

        info!("Created messaging session for {}", user.id);

        Ok(Self {
            inner: Arc::new(Inner {
                user,
                config,
                backend,
                transport,
                store: RwLock::new(store),
                stream: RwLock::new(MessageStream::new()),
                presence: PresenceTracker::new(),
                receipts: Mutex::new(ReadReceipts::new()),
                composer: Mutex::new(composer),
                tasks: Mutex::new(Vec::new()),
                history_task: Mutex::new(None),
                dispatcher: Mutex::new(None),
                events,
            }),
        })
    }

    pub fn user(&self) -> &SessionUser {
        &self.inner.user
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Change notifications for UI layers
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ===== Lifecycle =====

    /// Connect the push transport and start routing its events
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if dispatcher.is_some() {
            debug!("Session already started");
            return Ok(());
        }

        self.inner.transport.connect(&self.inner.user).await?;
        let (sink, rx) = push::channel();
        for event in SUBSCRIBED_EVENTS {
            self.inner.transport.subscribe(event, sink.clone()).await?;
        }

        let runner = PushDispatcher::new(rx, self.clone());
        *dispatcher = Some(tokio::spawn(runner.run()));
        info!("Messaging session started for {}", self.inner.user.id);
        Ok(())
    }

    /// Unsubscribe, disconnect and drop the selection
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for event in SUBSCRIBED_EVENTS {
            if let Err(e) = self.inner.transport.unsubscribe(event).await {
                warn!("Failed to unsubscribe from {}: {}", event, e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.inner.transport.disconnect().await {
            warn!("Failed to disconnect push transport: {}", e);
            first_error.get_or_insert(e);
        }

        if let Some(handle) = self.inner.dispatcher.lock().await.take() {
            handle.abort();
        }
        self.clear_selection().await;
        self.inner.presence.clear().await;
        info!("Messaging session stopped for {}", self.inner.user.id);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait for every request spawned so far to finish
    pub async fn settle(&self) {
        loop {
            let mut handles: Vec<JoinHandle<()>> =
                self.inner.tasks.lock().await.drain(..).collect();
            if let Some(history) = self.inner.history_task.lock().await.take() {
                handles.push(history);
            }
            if handles.is_empty() {
                break;
            }
            // Aborted history loads resolve to a cancelled JoinError
            let _ = futures_util::future::join_all(handles).await;
        }
    }

    async fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    // ===== Conversation list =====

    /// Replace the store from a full backend listing
    pub async fn load_all(&self) -> Result<usize> {
        let listing = with_timeout(
            self.inner.config.request_timeout,
            "list conversations",
            self.inner.backend.list_conversations(),
        )
        .await;

        match listing {
            Ok(listing) => {
                let (count, dropped_selection) = {
                    let mut store = self.inner.store.write().await;
                    let before = store.selected().cloned();
                    let count = store.replace_all(listing);
                    (count, before.filter(|_| store.selected().is_none()))
                };
                info!("Loaded {} conversations", count);

                if let Some(identity) = dropped_selection {
                    info!("Selected conversation {} no longer exists", identity);
                    self.inner.stream.write().await.reset();
                    self.abort_history_load().await;
                    self.inner.composer.lock().await.forget_conversation(&identity);
                    self.emit(SessionEvent::MessagesChanged { identity });
                }
                self.emit(SessionEvent::ConversationsChanged);
                Ok(count)
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                self.emit(SessionEvent::OperationFailed {
                    identity: None,
                    operation: StoreOperation::Reload,
                    error: e.clone(),
                });
                Err(e)
            }
        }
    }

    pub async fn hide(&self, identity: &ConversationIdentity) -> Result<()> {
        self.confirm_then_mutate(StoreOperation::Hide, identity).await
    }

    pub async fn unhide(&self, identity: &ConversationIdentity) -> Result<()> {
        self.confirm_then_mutate(StoreOperation::Unhide, identity).await
    }

    /// Delete a conversation and its history for good
    pub async fn delete(&self, identity: &ConversationIdentity) -> Result<()> {
        self.confirm_then_mutate(StoreOperation::Delete, identity).await
    }

    /// Local state changes only after the backend confirms
    async fn confirm_then_mutate(
        &self,
        operation: StoreOperation,
        identity: &ConversationIdentity,
    ) -> Result<()> {
        if !self.inner.store.read().await.contains(identity) {
            return Err(SyncError::UnknownConversation(identity.clone()));
        }

        let backend = &self.inner.backend;
        let timeout = self.inner.config.request_timeout;
        let what = operation.to_string();
        let confirmed = match operation {
            StoreOperation::Hide => with_timeout(timeout, &what, backend.hide(identity)).await,
            StoreOperation::Unhide => with_timeout(timeout, &what, backend.unhide(identity)).await,
            StoreOperation::Delete => with_timeout(timeout, &what, backend.delete(identity)).await,
            StoreOperation::Reload | StoreOperation::MarkRead => Err(SyncError::Conflict(
                format!("{} is not a visibility operation", operation),
            )),
        };

        if let Err(e) = confirmed {
            warn!("Failed to {} {}: {}", operation, identity, e);
            self.emit(SessionEvent::OperationFailed {
                identity: Some(identity.clone()),
                operation,
                error: e.clone(),
            });
            return Err(e);
        }

        match operation {
            StoreOperation::Hide => self.inner.store.write().await.hide(identity)?,
            StoreOperation::Unhide => self.inner.store.write().await.unhide(identity)?,
            _ => self.remove_conversation(identity).await?,
        }
        info!("Applied {} to {}", operation, identity);
        self.emit(SessionEvent::ConversationsChanged);
        Ok(())
    }

    async fn remove_conversation(&self, identity: &ConversationIdentity) -> Result<()> {
        let was_selected = self.inner.store.write().await.delete(identity)?;
        if was_selected {
            self.inner.stream.write().await.reset();
            self.abort_history_load().await;
            self.emit(SessionEvent::MessagesChanged {
                identity: identity.clone(),
            });
        }
        let dropped = self.inner.composer.lock().await.forget_conversation(identity);
        if dropped > 0 {
            debug!("Dropped {} unsent messages of {}", dropped, identity);
        }
        Ok(())
    }

    // ===== Selection =====

    /// Select a conversation: load its history and send mark-read if needed
    pub async fn select(&self, identity: &ConversationIdentity) -> Result<()> {
        let ticket = {
            let mut store = self.inner.store.write().await;
            store.select(identity)?;
            let mut receipts = self.inner.receipts.lock().await;
            receipts.on_selected(&store, identity)
        };
        debug!("Selected {}", identity);

        self.start_history_load(identity.clone()).await;
        if let Some(ticket) = ticket {
            self.spawn_mark_read(ticket).await;
        }
        self.emit(SessionEvent::ConversationsChanged);
        Ok(())
    }

    /// Navigation away from the messaging view
    pub async fn clear_selection(&self) {
        let previous = self.inner.store.write().await.clear_selection();
        self.inner.stream.write().await.reset();
        self.abort_history_load().await;
        if let Some(identity) = previous {
            debug!("Cleared selection of {}", identity);
            self.emit(SessionEvent::MessagesChanged { identity });
        }
    }

    /// Reload history after a failed load
    pub async fn retry_history(&self) -> Result<()> {
        let identity = match self.inner.stream.read().await.state() {
            StreamState::Failed { identity, .. } => identity.clone(),
            other => {
                return Err(SyncError::Conflict(format!(
                    "no failed history load to retry (stream is {})",
                    other.name()
                )))
            }
        };
        self.select(&identity).await
    }

    async fn start_history_load(&self, identity: ConversationIdentity) {
        let generation = self.inner.stream.write().await.begin_load(identity.clone());
        let session = self.clone();
        let handle = tokio::spawn(async move {
            session.run_history_load(identity, generation).await;
        });

        if let Some(previous) = self.inner.history_task.lock().await.replace(handle) {
            if !previous.is_finished() {
                debug!("Cancelling superseded history load");
                previous.abort();
            }
        }
    }

    async fn abort_history_load(&self) {
        if let Some(handle) = self.inner.history_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn run_history_load(&self, identity: ConversationIdentity, generation: u64) {
        let response = with_timeout(
            self.inner.config.request_timeout,
            "history",
            self.inner
                .backend
                .message_history(&identity, self.inner.config.history_limit),
        )
        .await;

        let local = self.inner.composer.lock().await.unconfirmed_for(&identity);
        let applied = {
            let mut stream = self.inner.stream.write().await;
            match response {
                Ok(history) => stream.complete_load(generation, history, local).map(|_| None),
                Err(e) => stream.fail_load(generation, e.clone()).map(|_| Some(e)),
            }
        };

        match applied {
            Ok(None) => self.emit(SessionEvent::MessagesChanged { identity }),
            Ok(Some(error)) => {
                warn!("History load for {} failed: {}", identity, error);
                self.emit(SessionEvent::HistoryFailed { identity, error });
            }
            Err(e) => debug!("Discarded history for {}: {}", identity, e),
        }
    }

    async fn spawn_mark_read(&self, ticket: ReceiptTicket) {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            let response = with_timeout(
                session.inner.config.request_timeout,
                "mark-read",
                session.inner.backend.mark_read(&ticket.identity),
            )
            .await;

            let outcome = {
                let mut store = session.inner.store.write().await;
                let mut receipts = session.inner.receipts.lock().await;
                receipts.complete(&ticket, &mut store, response)
            };

            match outcome {
                Ok(unread) => {
                    info!("Marked {} read ({} unread left)", ticket.identity, unread);
                    session.emit(SessionEvent::ConversationsChanged);
                }
                Err(e) if e.is_silent() => debug!("Ignored read receipt: {}", e),
                Err(e) => {
                    warn!("Mark-read for {} failed: {}", ticket.identity, e);
                    session.emit(SessionEvent::OperationFailed {
                        identity: Some(ticket.identity.clone()),
                        operation: StoreOperation::MarkRead,
                        error: e,
                    });
                }
            }
        });
        self.track(handle).await;
    }

    // ===== Push routing =====

    /// A `message:new` event, in delivery order
    pub async fn apply_push_message(&self, message: Message) {
        let identity = message.conversation.clone();
        let (outcome, shown) = {
            let mut store = self.inner.store.write().await;
            let selected = store.is_selected(&identity);
            let outcome = store.apply_inbound(&message);
            let shown = if selected {
                self.inner.stream.write().await.offer_live(message)
            } else {
                LiveOutcome::NotShown
            };
            (outcome, shown)
        };
        debug!("Push message for {}: {:?} / {:?}", identity, outcome, shown);

        if outcome != InboundOutcome::Duplicate {
            self.emit(SessionEvent::ConversationsChanged);
        }
        if shown == LiveOutcome::Appended {
            self.emit(SessionEvent::MessagesChanged { identity });
        }
    }

    /// A `presence:changed` event
    pub async fn apply_presence(&self, participant_id: &str, online: bool) {
        if self.inner.presence.apply(participant_id, online).await {
            debug!("{} is now {}", participant_id, if online { "online" } else { "offline" });
            self.emit(SessionEvent::PresenceChanged {
                participant_id: participant_id.to_string(),
                online,
            });
        }
    }

    // ===== Outbound =====

    /// Show `body` immediately as pending and send it; returns the local id
    pub async fn send(&self, identity: &ConversationIdentity, body: &str) -> Result<String> {
        if !self.inner.store.read().await.contains(identity) {
            return Err(SyncError::UnknownConversation(identity.clone()));
        }
        let pending = self.inner.composer.lock().await.compose(identity.clone(), body)?;
        let local_id = pending.id.clone();

        self.inner.store.write().await.apply_outbound(&pending);
        if self.inner.stream.write().await.push_pending(pending) {
            self.emit(SessionEvent::MessagesChanged {
                identity: identity.clone(),
            });
        }
        self.emit(SessionEvent::ConversationsChanged);

        self.spawn_send(local_id.clone(), identity.clone(), body.to_string())
            .await;
        Ok(local_id)
    }

    /// Re-send a failed message
    pub async fn retry_send(&self, local_id: &str) -> Result<()> {
        let message = self.inner.composer.lock().await.retry(local_id)?;
        if self
            .inner
            .stream
            .write()
            .await
            .set_delivery_state(local_id, DeliveryState::Pending)
        {
            self.emit(SessionEvent::MessagesChanged {
                identity: message.conversation.clone(),
            });
        }
        self.spawn_send(local_id.to_string(), message.conversation, message.body)
            .await;
        Ok(())
    }

    async fn spawn_send(&self, local_id: String, identity: ConversationIdentity, body: String) {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            let response = with_timeout(
                session.inner.config.request_timeout,
                "send",
                session.inner.backend.send_message(&identity, &body),
            )
            .await;

            match response {
                Ok(confirmed) => session.finish_send(&local_id, confirmed).await,
                Err(e) => session.fail_send(&local_id, &identity, e).await,
            }
        });
        self.track(handle).await;
    }

    async fn finish_send(&self, local_id: &str, confirmed: Message) {
        if let Err(e) = self.inner.composer.lock().await.confirm(local_id) {
            // The conversation was deleted while the request was in flight
            debug!("Confirmed message {} no longer tracked: {}", local_id, e);
        }
        let identity = confirmed.conversation.clone();
        info!("Message {} delivered as {}", local_id, confirmed.id);

        self.inner.store.write().await.apply_outbound(&confirmed);
        if self.inner.stream.write().await.confirm(local_id, confirmed) {
            self.emit(SessionEvent::MessagesChanged { identity });
        }
        self.emit(SessionEvent::ConversationsChanged);
    }

    async fn fail_send(&self, local_id: &str, identity: &ConversationIdentity, error: SyncError) {
        warn!("Sending {} to {} failed: {}", local_id, identity, error);
        if let Err(e) = self.inner.composer.lock().await.fail(local_id, error.clone()) {
            debug!("Failed message {} no longer tracked: {}", local_id, e);
            return;
        }
        if self
            .inner
            .stream
            .write()
            .await
            .set_delivery_state(local_id, DeliveryState::Failed)
        {
            self.emit(SessionEvent::MessagesChanged {
                identity: identity.clone(),
            });
        }
        self.emit(SessionEvent::SendFailed {
            local_id: local_id.to_string(),
            error,
        });
    }

    // ===== Read side =====

    /// Visible conversations matching `query`, newest first
    pub async fn sidebar(&self, query: &str) -> Vec<ConversationSummary> {
        sidebar::project(&*self.inner.store.read().await, query)
    }

    pub async fn summary(&self, identity: &ConversationIdentity) -> Option<ConversationSummary> {
        self.inner.store.read().await.get(identity).cloned()
    }

    pub async fn unread_count(&self, identity: &ConversationIdentity) -> Option<u32> {
        self.inner.store.read().await.unread_count(identity)
    }

    pub async fn total_unread(&self) -> u32 {
        self.inner.store.read().await.total_unread()
    }

    pub async fn selected(&self) -> Option<ConversationIdentity> {
        self.inner.store.read().await.selected().cloned()
    }

    /// The rendered message list of the selected conversation
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.stream.read().await.messages().to_vec()
    }

    pub async fn stream_state(&self) -> StreamState {
        self.inner.stream.read().await.state().clone()
    }

    pub async fn is_online(&self, participant_id: &str) -> bool {
        self.inner.presence.is_online(participant_id).await
    }

    pub async fn outbound(&self, local_id: &str) -> Option<OutboundMessage> {
        self.inner.composer.lock().await.get(local_id).cloned()
    }
}
