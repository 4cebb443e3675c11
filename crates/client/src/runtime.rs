// Sync runtime: the single task that owns the connection, follows the
// identity provider, and applies server events to the cache in order.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use murmur_common::types::Identity;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ConversationCache, SharedCache};
use crate::config::ClientConfig;
use crate::connection::{
    ChatTransport, ConnectionManager, InboundEvent, SessionEvent, WsTransport,
};
use crate::history::HistoryClient;
use crate::identity::IdentityProvider;
use crate::presence::PresenceTracker;
use crate::reducers::{
    reduce_deleted_messages, reduce_history_page, reduce_new_message, DeletionScope, UnreadKeying,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub unread_keying: UnreadKeying,
    pub deletion_scope: DeletionScope,
}

impl From<&ClientConfig> for SyncOptions {
    fn from(config: &ClientConfig) -> Self {
        Self { unread_keying: config.unread_keying, deletion_scope: config.deletion_scope }
    }
}

enum Command {
    SendMessage {
        receiver_id: String,
        body: Option<String>,
        image_url: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteMessages {
        message_ids: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

// ── Handle ──────────────────────────────────────────────────────────

/// Owner-side handle to a running sync runtime. Dropping it shuts the
/// runtime down.
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    cache: SharedCache,
    presence: PresenceTracker,
    lifecycle: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn cache(&self) -> SharedCache {
        self.cache.clone()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle.subscribe()
    }

    /// Open a conversation in the UI and zero its unread counter.
    pub async fn open_conversation(&self, key: Option<String>) {
        self.cache.write().await.select_and_mark_read(key);
    }

    pub async fn send_message(
        &self,
        receiver_id: impl Into<String>,
        body: Option<String>,
        image_url: Option<String>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let command =
            Command::SendMessage { receiver_id: receiver_id.into(), body, image_url, reply };
        self.submit(command, rx).await
    }

    pub async fn delete_messages(&self, message_ids: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::DeleteMessages { message_ids, reply }, rx).await
    }

    async fn submit(&self, command: Command, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        self.commands.send(command).await.map_err(|_| anyhow!("sync runtime is not running"))?;
        rx.await.context("sync runtime dropped the request")?
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn wait(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start a runtime over the WebSocket transport described by `config`.
///
/// History resync after a dropped connection talks to the same relay over
/// HTTP; an endpoint that cannot be mapped to one only disables resync.
pub fn start(config: &ClientConfig, identity: &IdentityProvider) -> SyncHandle {
    let connection = ConnectionManager::new(
        config.server_url.clone(),
        WsTransport::new(),
        PresenceTracker::new(),
    )
    .with_reconnect_policy(config.reconnect_policy());
    let history = match HistoryClient::from_endpoint(&config.server_url) {
        Ok(history) => Some(history),
        Err(error) => {
            warn!(error = %error, "history resync disabled");
            None
        }
    };
    spawn(connection, identity, ConversationCache::shared(), history, SyncOptions::from(config))
}

/// Start a runtime over an arbitrary transport.
pub fn spawn<T>(
    connection: ConnectionManager<T>,
    identity: &IdentityProvider,
    cache: SharedCache,
    history: Option<HistoryClient>,
    options: SyncOptions,
) -> SyncHandle
where
    T: ChatTransport + 'static,
{
    let shutdown = CancellationToken::new();
    let connection = connection.with_parent_token(shutdown.child_token());
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let presence = connection.presence().clone();
    let lifecycle = connection.lifecycle_sender();

    let runtime = SyncRuntime {
        connection,
        cache: cache.clone(),
        identity_rx: identity.subscribe(),
        identity_open: true,
        commands: commands_rx,
        shutdown: shutdown.clone(),
        history,
        options,
        current: None,
        needs_resync: false,
    };
    let task = tokio::spawn(runtime.run());

    SyncHandle {
        commands: commands_tx,
        cache,
        presence,
        lifecycle,
        shutdown,
        task: Some(task),
    }
}

// ── Runtime ─────────────────────────────────────────────────────────

struct SyncRuntime<T: ChatTransport> {
    connection: ConnectionManager<T>,
    cache: SharedCache,
    identity_rx: watch::Receiver<Option<Identity>>,
    /// Cleared once every provider handle is gone; the last identity then
    /// stays in force.
    identity_open: bool,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    history: Option<HistoryClient>,
    options: SyncOptions,
    current: Option<Identity>,
    /// Set when a live session dropped; the next session refetches history
    /// for every cached conversation.
    needs_resync: bool,
}

impl<T: ChatTransport> SyncRuntime<T> {
    async fn run(mut self) {
        self.current = self.identity_rx.borrow_and_update().clone();
        self.establish().await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                changed = self.identity_rx.changed(), if self.identity_open => {
                    if changed.is_err() {
                        debug!("identity provider dropped; keeping the current identity");
                        self.identity_open = false;
                    } else {
                        let next = self.identity_rx.borrow_and_update().clone();
                        self.switch_identity(next).await;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = self.connection.recv_event(), if self.connection.is_connected() => {
                    match event {
                        Ok(Some(event)) => self.dispatch(event).await,
                        Ok(None) => {}
                        Err(error) => warn!(error = %error, "failed to receive chat event"),
                    }
                }
            }
        }

        self.connection.close("sync runtime stopped").await;
        info!("sync runtime stopped");
    }

    /// Tear down everything owned by the previous identity and bind the
    /// next one.
    async fn switch_identity(&mut self, next: Option<Identity>) {
        let previous_id = self.current.as_ref().map(|identity| identity.id.clone());
        let next_id = next.as_ref().map(|identity| identity.id.clone());
        if previous_id == next_id {
            self.current = next;
            if !self.connection.is_connected() {
                self.establish().await;
            }
            return;
        }

        info!(
            from = previous_id.as_deref().unwrap_or("-"),
            to = next_id.as_deref().unwrap_or("-"),
            "identity changed; rebuilding chat session"
        );
        self.connection.close("identity changed").await;
        self.cache.write().await.reset();
        self.needs_resync = false;
        self.current = next;
        self.establish().await;
    }

    /// Bind the connection to the current identity. Gives up early when the
    /// runtime shuts down or the identity changes mid-attempt; the main loop
    /// picks the change up.
    async fn establish(&mut self) {
        let Some(identity) = self.current.clone() else {
            return;
        };
        let identity_watch = self.identity_rx.clone();

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            _ = identity_changed(identity_watch), if self.identity_open => {
                debug!(user_id = %identity.id, "identity changed while connecting");
                return;
            }
            result = self.connection.bind(Some(&identity)) => match result {
                Ok(Some(SessionEvent::RetriesExhausted { attempts, .. })) => {
                    warn!(user_id = %identity.id, attempts, "chat session unavailable");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(user_id = %identity.id, error = %error, "cannot open chat session");
                }
            },
        }

        if self.needs_resync && self.connection.is_connected() {
            self.needs_resync = false;
            self.resync_history().await;
        }
    }

    /// Refetch every cached conversation and merge what the cache missed
    /// while the connection was down.
    async fn resync_history(&mut self) {
        let Some(history) = self.history.clone() else {
            return;
        };
        let Some(me) = self.live_identity_id() else {
            return;
        };

        let keys = self.cache.read().await.conversation_keys();
        for other in keys {
            let page = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                page = history.fetch(&me, &other) => page,
            };
            match page {
                Ok(page) => {
                    let mut cache = self.cache.write().await;
                    let keying = self.options.unread_keying;
                    let inserted = reduce_history_page(&mut cache, Some(&me), &other, page, keying);
                    debug!(user_id = %me, other = %other, inserted, "history resynced");
                }
                Err(error) => {
                    warn!(user_id = %me, other = %other, error = %error, "history resync failed");
                }
            }
        }
    }

    async fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::OnlineUsers(online) => {
                debug!(online = online.len(), "presence snapshot");
                self.connection.presence().replace(online);
            }
            InboundEvent::NewMessage(message) => {
                let me = self.live_identity_id();
                let mut cache = self.cache.write().await;
                let keying = self.options.unread_keying;
                let outcome = reduce_new_message(&mut cache, me.as_deref(), &message, keying);
                debug!(message_id = %message.id, outcome = ?outcome, "applied new message");
            }
            InboundEvent::MessagesDeleted(batch) => {
                let me = self.live_identity_id();
                let mut cache = self.cache.write().await;
                let changed = reduce_deleted_messages(
                    &mut cache,
                    me.as_deref(),
                    &batch,
                    self.options.deletion_scope,
                );
                debug!(batch = batch.len(), changed, "applied deletions");
            }
            InboundEvent::ServerError { code, message, retryable } => {
                warn!(code = %code, retryable, "server rejected request: {message}");
            }
            InboundEvent::Disconnected { reason } => {
                warn!(reason = %reason, "chat connection dropped; reconnecting");
                self.needs_resync = true;
                let delay = self.connection.reconnect_delay();
                if pause(self.shutdown.clone(), delay).await {
                    self.establish().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { receiver_id, body, image_url, reply } => {
                let result = self.connection.send_message(&receiver_id, body, image_url).await;
                let _ = reply.send(result);
            }
            Command::DeleteMessages { message_ids, reply } => {
                let result = self.connection.delete_messages(message_ids).await;
                let _ = reply.send(result);
            }
        }
    }

    /// The identity events are reduced for: the current identity, provided
    /// the live session is bound to it.
    fn live_identity_id(&self) -> Option<String> {
        let current = self.current.as_ref()?;
        (self.connection.bound_identity() == Some(current.id.as_str())).then(|| current.id.clone())
    }
}

/// Sleep for `delay` unless shut down first. Returns whether to go on.
async fn pause(shutdown: CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Resolves on the next identity change. A closed provider never changes
/// again, so this then stays pending.
async fn identity_changed(mut identity: watch::Receiver<Option<Identity>>) {
    if identity.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
