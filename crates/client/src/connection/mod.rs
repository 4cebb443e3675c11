// Connection manager: one persistent session per identity, with bounded
// reconnection.
//
// The manager owns the transport, binds it to the current identity, and
// translates server frames into `InboundEvent`s for the runtime to reduce.
// Transport is abstracted via `ChatTransport` for testability; the
// tokio-tungstenite implementation lives in `ws`.

pub mod ws;

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use murmur_common::protocol::ws::{WsMessage, USER_ID_QUERY_PARAM};
use murmur_common::types::{ChatMessage, Identity};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::presence::PresenceTracker;

pub use ws::WsTransport;

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

// ── Configuration ───────────────────────────────────────────────────

/// Reconnection parameters. The delay between attempts is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Total attempts per connect cycle, the first one included.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { delay: Duration::from_millis(1_000), max_attempts: 5 }
    }
}

// ── Transport trait ─────────────────────────────────────────────────

/// Abstraction over the network transport for testability.
pub trait ChatTransport: Send {
    /// Open the connection. `url` already carries the identity query.
    fn connect(&mut self, url: &Url) -> impl Future<Output = Result<()>> + Send;

    fn send(&mut self, message: &WsMessage) -> impl Future<Output = Result<()>> + Send;

    /// Next decoded frame. `None` on clean close.
    fn recv(&mut self) -> impl Future<Output = Result<Option<WsMessage>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

// ── Session ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A live session bound to one identity.
///
/// The token is cancelled when the session closes, which detaches anything
/// still waiting on events from it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: String,
    cancel: CancellationToken,
}

impl Session {
    fn new(identity_id: &str, cancel: CancellationToken) -> Self {
        Self { id: Uuid::new_v4(), identity_id: identity_id.to_string(), cancel }
    }

    pub fn is_bound_to(&self, identity_id: &str) -> bool {
        self.identity_id == identity_id
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ready { session_id: Uuid, identity_id: String },
    ConnectFailed { identity_id: String, reason: String },
    /// Every attempt in the cycle failed. The manager stays disconnected
    /// until the next `bind` or `connect_with_retry`.
    RetriesExhausted { identity_id: String, attempts: u32 },
    Closed { session_id: Uuid, identity_id: String, reason: String },
}

/// Server frames as seen by the reducers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    OnlineUsers(Vec<String>),
    NewMessage(ChatMessage),
    MessagesDeleted(Vec<ChatMessage>),
    ServerError { code: String, message: String, retryable: bool },
    /// The transport dropped. The session is gone and presence was cleared.
    Disconnected { reason: String },
}

// ── Connection manager ──────────────────────────────────────────────

pub struct ConnectionManager<T: ChatTransport> {
    endpoint: String,
    reconnect_policy: ReconnectPolicy,
    transport: T,
    presence: PresenceTracker,
    state: ConnectionState,
    session: Option<Session>,
    parent_token: CancellationToken,
    lifecycle: broadcast::Sender<SessionEvent>,
    consecutive_failures: u32,
}

impl<T: ChatTransport> ConnectionManager<T> {
    pub fn new(endpoint: impl Into<String>, transport: T, presence: PresenceTracker) -> Self {
        let (lifecycle, _rx) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            endpoint: endpoint.into(),
            reconnect_policy: ReconnectPolicy::default(),
            transport,
            presence,
            state: ConnectionState::Disconnected,
            session: None,
            parent_token: CancellationToken::new(),
            lifecycle,
            consecutive_failures: 0,
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Session tokens are created as children of `token`, so cancelling it
    /// detaches every session this manager opens.
    pub fn with_parent_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = token;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn bound_identity(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.identity_id.as_str())
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle.subscribe()
    }

    /// Sender side of the lifecycle channel, for handles that outlive a
    /// borrow of the manager.
    pub fn lifecycle_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.lifecycle.clone()
    }

    /// Failed attempts since the last successful connect.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_policy.delay
    }

    /// Endpoint URL for `identity_id`, with the identity in the query string.
    pub fn endpoint_for(&self, identity_id: &str) -> Result<Url> {
        if identity_id.trim().is_empty() {
            return Err(anyhow!("identity id must not be empty"));
        }
        let mut url = validate_endpoint(&self.endpoint)?;
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != USER_ID_QUERY_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in &retained {
                query.append_pair(key, value);
            }
            query.append_pair(USER_ID_QUERY_PARAM, identity_id);
        }
        Ok(url)
    }

    /// Make one connection attempt for `identity`.
    ///
    /// Any existing session is closed first. Returns `Ready` on success and
    /// `ConnectFailed` on transport failure; only a bad endpoint is an error.
    pub async fn connect(&mut self, identity: &Identity) -> Result<SessionEvent> {
        let url = self.endpoint_for(&identity.id)?;
        self.close("replaced by a new session").await;
        self.state = ConnectionState::Connecting;

        if let Err(error) = self.transport.connect(&url).await {
            self.state = ConnectionState::Disconnected;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            let event = SessionEvent::ConnectFailed {
                identity_id: identity.id.clone(),
                reason: format!("connection failed: {error:#}"),
            };
            self.emit(event.clone());
            return Ok(event);
        }

        let session = Session::new(&identity.id, self.parent_token.child_token());
        info!(
            session_id = %session.id,
            user_id = %identity.id,
            "chat session established"
        );
        let event =
            SessionEvent::Ready { session_id: session.id, identity_id: identity.id.clone() };
        self.session = Some(session);
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
        self.emit(event.clone());
        Ok(event)
    }

    /// Connect with bounded retries and a fixed delay between attempts.
    pub async fn connect_with_retry(&mut self, identity: &Identity) -> Result<SessionEvent> {
        let max_attempts = self.reconnect_policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let event = self.connect(identity).await?;
            let SessionEvent::ConnectFailed { reason, .. } = &event else {
                return Ok(event);
            };

            if attempt >= max_attempts {
                warn!(
                    user_id = %identity.id,
                    attempts = attempt,
                    reason = %reason,
                    "giving up on chat connection"
                );
                let exhausted = SessionEvent::RetriesExhausted {
                    identity_id: identity.id.clone(),
                    attempts: attempt,
                };
                self.emit(exhausted.clone());
                return Ok(exhausted);
            }

            warn!(
                user_id = %identity.id,
                attempt,
                reason = %reason,
                "chat connection attempt failed; retrying"
            );
            tokio::time::sleep(self.reconnect_delay()).await;
        }
    }

    /// Bind the connection to `identity`.
    ///
    /// A session bound to another identity (or any session, when `identity`
    /// is `None`) is closed before a new one is opened. Returns `None` when
    /// nothing needed to happen.
    pub async fn bind(&mut self, identity: Option<&Identity>) -> Result<Option<SessionEvent>> {
        if let (Some(identity), Some(session)) = (identity, &self.session) {
            if session.is_bound_to(&identity.id) && self.is_connected() {
                return Ok(None);
            }
        }

        let closed = self.close("identity changed").await;
        match identity {
            Some(identity) => self.connect_with_retry(identity).await.map(Some),
            None => Ok(closed),
        }
    }

    /// Close the current session immediately. Pending sends are dropped.
    pub async fn close(&mut self, reason: &str) -> Option<SessionEvent> {
        let session = self.session.take();
        if session.is_some() || self.state != ConnectionState::Disconnected {
            self.transport.close().await;
        }
        self.state = ConnectionState::Disconnected;
        let session = session?;
        Some(self.end_session(session, reason))
    }

    /// Wait for the next server event.
    ///
    /// Returns `None` when there is no session, or when the session is
    /// cancelled while waiting.
    pub async fn recv_event(&mut self) -> Result<Option<InboundEvent>> {
        let Some(token) = self.session.as_ref().map(Session::token) else {
            return Ok(None);
        };

        loop {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                frame = self.transport.recv() => frame,
            };

            let event = match frame {
                Ok(Some(WsMessage::GetOnlineUser(online))) => InboundEvent::OnlineUsers(online),
                Ok(Some(WsMessage::NewMessage(message))) => InboundEvent::NewMessage(message),
                Ok(Some(WsMessage::DeleteMessage(batch))) => InboundEvent::MessagesDeleted(batch),
                Ok(Some(WsMessage::Error { code, message, retryable })) => {
                    InboundEvent::ServerError { code, message, retryable }
                }
                Ok(Some(other)) => {
                    debug!(frame = ?other, "ignoring client-bound frame from server");
                    continue;
                }
                Ok(None) => self.lose_session("connection closed by server"),
                Err(error) => self.lose_session(&format!("transport error: {error:#}")),
            };
            return Ok(Some(event));
        }
    }

    pub async fn send(&mut self, message: &WsMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("cannot send: not connected"));
        }
        self.transport.send(message).await
    }

    pub async fn send_message(
        &mut self,
        receiver_id: &str,
        body: Option<String>,
        image_url: Option<String>,
    ) -> Result<()> {
        if body.is_none() && image_url.is_none() {
            return Err(anyhow!("message must carry a body or an image"));
        }
        let frame =
            WsMessage::SendMessage { receiver_id: receiver_id.to_string(), body, image_url };
        self.send(&frame).await
    }

    pub async fn delete_messages(&mut self, message_ids: Vec<String>) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        self.send(&WsMessage::DeleteMessages { message_ids }).await
    }

    fn lose_session(&mut self, reason: &str) -> InboundEvent {
        self.state = ConnectionState::Disconnected;
        if let Some(session) = self.session.take() {
            warn!(session_id = %session.id, user_id = %session.identity_id, reason, "chat session lost");
            self.end_session(session, reason);
        }
        InboundEvent::Disconnected { reason: reason.to_string() }
    }

    fn end_session(&mut self, session: Session, reason: &str) -> SessionEvent {
        session.cancel.cancel();
        self.presence.clear();
        info!(session_id = %session.id, user_id = %session.identity_id, reason, "chat session closed");
        let event = SessionEvent::Closed {
            session_id: session.id,
            identity_id: session.identity_id,
            reason: reason.to_string(),
        };
        self.emit(event.clone());
        event
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.lifecycle.send(event);
    }
}

fn validate_endpoint(value: &str) -> Result<Url> {
    let parsed = Url::parse(value).map_err(|error| anyhow!("invalid server_url `{value}`: {error}"))?;
    match parsed.scheme() {
        "wss" => Ok(parsed),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(anyhow!("server_url must use wss (ws is allowed only for localhost testing)")),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_common::types::Role;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        /// Responses returned by recv() in order. `None` is a clean close;
        /// an empty queue blocks forever.
        pub recv_queue: VecDeque<Option<WsMessage>>,
        /// Shared so tests can inspect it after the mock moves into a runtime.
        pub sent: Arc<Mutex<Vec<WsMessage>>>,
        pub connected_urls: Vec<Url>,
        pub close_calls: u32,
        /// The next N connect() calls fail.
        pub failing_connects: u32,
    }

    impl MockTransport {
        pub fn queue_recv(&mut self, msg: WsMessage) {
            self.recv_queue.push_back(Some(msg));
        }

        pub fn queue_close(&mut self) {
            self.recv_queue.push_back(None);
        }

        pub fn sent(&self) -> Vec<WsMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChatTransport for MockTransport {
        async fn connect(&mut self, url: &Url) -> Result<()> {
            self.connected_urls.push(url.clone());
            if self.failing_connects > 0 {
                self.failing_connects -= 1;
                return Err(anyhow!("connection refused"));
            }
            Ok(())
        }

        async fn send(&mut self, message: &WsMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<WsMessage>> {
            match self.recv_queue.pop_front() {
                Some(frame) => Ok(frame),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.close_calls += 1;
        }
    }

    const ENDPOINT: &str = "wss://chat.test/ws";

    fn manager(transport: MockTransport) -> ConnectionManager<MockTransport> {
        ConnectionManager::new(ENDPOINT, transport, PresenceTracker::new())
    }

    fn u1() -> Identity {
        Identity::new("u1", Role::Primary)
    }

    fn u2() -> Identity {
        Identity::new("u2", Role::Counterparty)
    }

    fn chat(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            sender_id: "u2".to_string(),
            receiver_id: "u1".to_string(),
            body: Some("hi".to_string()),
            image_url: None,
            deleted: false,
            created_at: Utc::now(),
        }
    }

    // ── Endpoint ────────────────────────────────────────────────────

    #[test]
    fn endpoint_carries_identity_query() {
        let mgr = ConnectionManager::new(
            "wss://chat.test/ws?region=eu&userId=stale",
            MockTransport::default(),
            PresenceTracker::new(),
        );
        let url = mgr.endpoint_for("u1").expect("endpoint");
        assert_eq!(url.as_str(), "wss://chat.test/ws?region=eu&userId=u1");
    }

    #[test]
    fn endpoint_rejects_plain_ws_off_loopback() {
        let mgr = ConnectionManager::new(
            "ws://chat.test/ws",
            MockTransport::default(),
            PresenceTracker::new(),
        );
        let error = mgr.endpoint_for("u1").expect_err("insecure endpoint");
        assert!(error.to_string().contains("server_url must use wss"));

        let local = ConnectionManager::new(
            "ws://127.0.0.1:8080/ws",
            MockTransport::default(),
            PresenceTracker::new(),
        );
        assert!(local.endpoint_for("u1").is_ok());
    }

    #[test]
    fn endpoint_rejects_empty_identity() {
        let mgr = manager(MockTransport::default());
        assert!(mgr.endpoint_for("  ").is_err());
    }

    // ── Connection lifecycle ────────────────────────────────────────

    #[tokio::test]
    async fn connect_happy_path() {
        let mut mgr = manager(MockTransport::default());
        let mut lifecycle = mgr.subscribe_lifecycle();
        assert_eq!(mgr.state(), ConnectionState::Disconnected);

        let event = mgr.connect(&u1()).await.expect("connect should succeed");

        assert!(matches!(&event, SessionEvent::Ready { identity_id, .. } if identity_id == "u1"));
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(mgr.bound_identity(), Some("u1"));
        assert_eq!(lifecycle.recv().await.unwrap(), event);
        assert_eq!(mgr.transport.connected_urls[0].query(), Some("userId=u1"));
    }

    #[tokio::test]
    async fn connect_failure_is_an_event_not_an_error() {
        let transport = MockTransport { failing_connects: 1, ..Default::default() };
        let mut mgr = manager(transport);

        let event = mgr.connect(&u1()).await.expect("should return event");

        match event {
            SessionEvent::ConnectFailed { reason, .. } => {
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.session().is_none());
        assert_eq!(mgr.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_retry_recovers_within_budget() {
        let transport = MockTransport { failing_connects: 3, ..Default::default() };
        let mut mgr = manager(transport);

        let event = mgr.connect_with_retry(&u1()).await.expect("retry");

        assert!(matches!(event, SessionEvent::Ready { .. }));
        assert_eq!(mgr.transport.connected_urls.len(), 4);
        assert_eq!(mgr.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_retry_stops_after_max_attempts() {
        let transport = MockTransport { failing_connects: u32::MAX, ..Default::default() };
        let mut mgr = manager(transport);
        let started = tokio::time::Instant::now();

        let event = mgr.connect_with_retry(&u1()).await.expect("no hard error");

        assert_eq!(
            event,
            SessionEvent::RetriesExhausted { identity_id: "u1".into(), attempts: 5 }
        );
        assert_eq!(mgr.transport.connected_urls.len(), 5);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(4_000), "four fixed delays, got {waited:?}");
        assert!(waited < Duration::from_millis(5_000), "no delay after the last attempt");
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn bind_same_identity_is_a_no_op() {
        let mut mgr = manager(MockTransport::default());
        mgr.bind(Some(&u1())).await.expect("bind");
        let session_id = mgr.session().map(|s| s.id);

        let outcome = mgr.bind(Some(&u1())).await.expect("rebind");

        assert!(outcome.is_none());
        assert_eq!(mgr.session().map(|s| s.id), session_id);
        assert_eq!(mgr.transport.connected_urls.len(), 1);
    }

    #[tokio::test]
    async fn bind_other_identity_closes_stale_session_first() {
        let mut mgr = manager(MockTransport::default());
        mgr.bind(Some(&u1())).await.expect("bind u1");
        let stale_token = mgr.session().map(Session::token).expect("session");
        mgr.presence().replace(["u1".to_string(), "u3".to_string()]);
        let mut lifecycle = mgr.subscribe_lifecycle();

        mgr.bind(Some(&u2())).await.expect("bind u2");

        assert!(stale_token.is_cancelled());
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            SessionEvent::Closed { identity_id, .. } if identity_id == "u1"
        ));
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            SessionEvent::Ready { identity_id, .. } if identity_id == "u2"
        ));
        assert_eq!(mgr.bound_identity(), Some("u2"));
        assert!(mgr.presence().is_empty());
    }

    #[tokio::test]
    async fn bind_none_closes_session() {
        let mut mgr = manager(MockTransport::default());
        mgr.bind(Some(&u1())).await.expect("bind");

        let outcome = mgr.bind(None).await.expect("unbind");

        assert!(matches!(outcome, Some(SessionEvent::Closed { .. })));
        assert!(mgr.session().is_none());
        assert_eq!(mgr.transport.close_calls, 1);
    }

    #[tokio::test]
    async fn parent_token_cancels_child_sessions() {
        let parent = CancellationToken::new();
        let mut mgr = manager(MockTransport::default()).with_parent_token(parent.clone());
        mgr.connect(&u1()).await.expect("connect");
        let token = mgr.session().map(Session::token).expect("session");

        parent.cancel();

        assert!(token.is_cancelled());
        assert_eq!(mgr.recv_event().await.expect("recv"), None);
    }

    // ── Inbound events ──────────────────────────────────────────────

    #[tokio::test]
    async fn recv_maps_frames_to_events() {
        let mut transport = MockTransport::default();
        transport.queue_recv(WsMessage::GetOnlineUser(vec!["u2".into()]));
        transport.queue_recv(WsMessage::SendMessage {
            receiver_id: "u1".into(),
            body: Some("echo".into()),
            image_url: None,
        });
        let created = chat("m1");
        let deleted = created.clone().into_deleted();
        transport.queue_recv(WsMessage::NewMessage(created.clone()));
        transport.queue_recv(WsMessage::DeleteMessage(vec![deleted.clone()]));
        let mut mgr = manager(transport);
        mgr.connect(&u1()).await.expect("connect");

        assert_eq!(
            mgr.recv_event().await.unwrap(),
            Some(InboundEvent::OnlineUsers(vec!["u2".into()]))
        );
        assert_eq!(mgr.recv_event().await.unwrap(), Some(InboundEvent::NewMessage(created)));
        assert_eq!(
            mgr.recv_event().await.unwrap(),
            Some(InboundEvent::MessagesDeleted(vec![deleted]))
        );
    }

    #[tokio::test]
    async fn server_close_drops_session_and_presence() {
        let mut transport = MockTransport::default();
        transport.queue_close();
        let mut mgr = manager(transport);
        mgr.connect(&u1()).await.expect("connect");
        mgr.presence().replace(["u2".to_string()]);

        let event = mgr.recv_event().await.unwrap();

        assert_eq!(
            event,
            Some(InboundEvent::Disconnected { reason: "connection closed by server".into() })
        );
        assert!(mgr.session().is_none());
        assert!(mgr.presence().is_empty());
        assert_eq!(mgr.recv_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn recv_without_session_is_none() {
        let mut mgr = manager(MockTransport::default());
        assert_eq!(mgr.recv_event().await.unwrap(), None);
    }

    // ── Outbound ────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_requires_connection() {
        let mut mgr = manager(MockTransport::default());
        let error = mgr.send_message("u2", Some("hi".into()), None).await.unwrap_err();
        assert!(error.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn outbound_frames_are_forwarded() {
        let mut mgr = manager(MockTransport::default());
        mgr.connect(&u1()).await.expect("connect");

        mgr.send_message("u2", None, Some("https://cdn.test/a.png".into())).await.unwrap();
        mgr.delete_messages(Vec::new()).await.unwrap();
        mgr.delete_messages(vec!["m1".into()]).await.unwrap();

        assert_eq!(
            mgr.transport.sent(),
            vec![
                WsMessage::SendMessage {
                    receiver_id: "u2".into(),
                    body: None,
                    image_url: Some("https://cdn.test/a.png".into()),
                },
                WsMessage::DeleteMessages { message_ids: vec!["m1".into()] },
            ]
        );
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let mut mgr = manager(MockTransport::default());
        mgr.connect(&u1()).await.expect("connect");
        assert!(mgr.send_message("u2", None, None).await.is_err());
        assert!(mgr.transport.sent().is_empty());
    }
}
