//! # Connection Manager
//!
//! Owns the single WebSocket of a session.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open
//!                      │                  │
//!                      └──fail──▶ Closed ◀┘ close/error
//!                                   │
//!                     backoff timer └──▶ Connecting
//!
//! any state ──destroy──▶ Destroyed (terminal)
//! ```
//!
//! Every socket runs in its own task, tagged with a connection epoch. Events
//! from that task are only delivered while its epoch is current, so once a
//! socket is detached nothing it reads can reach the session.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pagesync_core::{JoinPayload, Payload, SessionScope};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::backoff::BackoffConfig;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Upper bound on the TCP + WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the session socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Fetching a token or performing the handshake.
    Connecting,
    /// Handshake done, `join` sent.
    Open,
    /// Socket gone; a reconnect may be scheduled.
    Closed,
    /// Torn down for good.
    Destroyed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Source of bearer tokens for the socket handshake.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a token for the next connection attempt.
    async fn get_token(&self) -> SessionResult<String>;
}

/// A token that never changes.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a fixed token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self) -> SessionResult<String> {
        Ok(self.0.clone())
    }
}

/// Something the connection reports upward.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The lifecycle state changed.
    State(ConnectionState),
    /// A text frame arrived.
    Message(String),
    /// A non-fatal transport failure; a reconnect follows.
    Error(SessionError),
    /// Frames accepted by [`ConnectionManager::send`] that never reached the
    /// socket before it failed, in send order. Delivered before the
    /// `Closed` state change.
    Unsent(Vec<String>),
}

/// Build `<endpoint>/ws/<room>?token=<token>`.
///
/// The token travels as a query parameter because browser sockets cannot
/// set handshake headers and servers accept it the same way from every client.
///
/// # Errors
///
/// Returns [`SessionError::InvalidUrl`] if `endpoint` cannot carry a path.
pub fn socket_url(endpoint: &str, room_id: &str, token: &str) -> SessionResult<Url> {
    let mut url = Url::parse(endpoint)?;
    url.path_segments_mut()
        .map_err(|()| SessionError::InvalidUrl(format!("{endpoint} cannot be a base URL")))?
        .pop_if_empty()
        .push("ws")
        .push(room_id);
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Handle to the session socket. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    endpoint: String,
    scope: SessionScope,
    user_name: String,
    backoff: BackoffConfig,
    tokens: Arc<dyn TokenProvider>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Mutex<SocketState>,
}

struct SocketState {
    status: ConnectionState,
    /// Bumped whenever the current socket is replaced or detached.
    epoch: u64,
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    socket_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager and the receiver its events are delivered on.
    #[must_use]
    pub fn new(
        config: &SessionConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = ConnectionInner {
            endpoint: config.endpoint.clone(),
            scope: config.scope(),
            user_name: config.user_name.clone(),
            backoff: config.backoff.clone(),
            tokens,
            events,
            state: Mutex::new(SocketState {
                status: ConnectionState::Idle,
                epoch: 0,
                attempts: 0,
                outbound: None,
                socket_task: None,
                reconnect_task: None,
            }),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Start connecting. No-op while connecting, open, or destroyed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut state = self.inner.lock();
        if matches!(
            state.status,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Destroyed
        ) {
            return;
        }
        if let Some(timer) = state.reconnect_task.take() {
            timer.abort();
        }
        state.detach_socket();
        state.epoch += 1;
        let epoch = state.epoch;
        self.inner.set_status(&mut state, ConnectionState::Connecting);
        tracing::info!(epoch, attempt = state.attempts, "Connecting");
        state.socket_task = Some(tokio::spawn(run_socket(self.inner.clone(), epoch)));
    }

    /// Close the socket and cancel any pending reconnect. Safe to repeat.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        if state.status == ConnectionState::Destroyed {
            return;
        }
        state.teardown();
        state.attempts = 0;
        if matches!(
            state.status,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.inner.set_status(&mut state, ConnectionState::Closed);
            tracing::info!("Disconnected");
        }
    }

    /// Tear down for good. Later `connect` calls are ignored.
    pub fn destroy(&self) {
        let mut state = self.inner.lock();
        if state.status == ConnectionState::Destroyed {
            return;
        }
        state.teardown();
        self.inner.set_status(&mut state, ConnectionState::Destroyed);
        tracing::info!("Connection destroyed");
    }

    /// Transmit a text frame. Returns false unless the socket is open.
    pub fn send(&self, text: String) -> bool {
        let state = self.inner.lock();
        match (&state.outbound, state.status) {
            (Some(tx), ConnectionState::Open) => tx.send(Message::Text(text)).is_ok(),
            _ => false,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().status
    }

    /// Whether frames can be sent right now.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnect attempts scheduled since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Whether a reconnect timer is pending.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock().reconnect_task.is_some()
    }
}

impl ConnectionInner {
    fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_status(&self, state: &mut SocketState, status: ConnectionState) {
        if state.status == status {
            return;
        }
        tracing::debug!(from = %state.status, to = %status, "Connection state change");
        state.status = status;
        // Receiver gone means the session is being dropped.
        let _ = self.events.send(ConnectionEvent::State(status));
    }

    fn emit_if_current(&self, epoch: u64, event: ConnectionEvent) {
        let state = self.lock();
        if state.epoch == epoch && state.status != ConnectionState::Destroyed {
            let _ = self.events.send(event);
        }
    }

    fn join_frame(&self) -> SessionResult<String> {
        let join = self.scope.envelope(Payload::Join(JoinPayload {
            user_name: Some(self.user_name.clone()),
        }));
        Ok(join.to_json()?)
    }

    /// Promote the socket of `epoch` to current. False if it was superseded.
    fn mark_open(&self, epoch: u64, outbound: mpsc::UnboundedSender<Message>) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch || state.status != ConnectionState::Connecting {
            return false;
        }
        state.outbound = Some(outbound);
        state.attempts = 0;
        self.set_status(&mut state, ConnectionState::Open);
        tracing::info!(epoch, "Connection open");
        true
    }

    /// Mark the socket of `epoch` closed and schedule a reconnect.
    ///
    /// Frames still sitting in the writer channel are handed back as
    /// [`ConnectionEvent::Unsent`]. `send` takes the same lock, so once
    /// `outbound` is cleared the drain below sees every accepted frame.
    fn socket_ended(
        self: &Arc<Self>,
        epoch: u64,
        error: Option<SessionError>,
        writer: Option<(&mut mpsc::UnboundedReceiver<Message>, &str)>,
    ) {
        let mut state = self.lock();
        if state.epoch != epoch || state.status == ConnectionState::Destroyed {
            return;
        }
        state.outbound = None;
        state.socket_task = None;
        if let Some((rx, join)) = writer {
            let unsent = drain_unsent(rx, join);
            if !unsent.is_empty() {
                tracing::info!(epoch, count = unsent.len(), "Returning unsent frames");
                let _ = self.events.send(ConnectionEvent::Unsent(unsent));
            }
        }
        if let Some(error) = error {
            tracing::warn!(epoch, "Connection error: {error}");
            let _ = self.events.send(ConnectionEvent::Error(error));
        }
        self.set_status(&mut state, ConnectionState::Closed);
        self.schedule_reconnect(&mut state);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut SocketState) {
        if state.status == ConnectionState::Destroyed || state.reconnect_task.is_some() {
            return;
        }
        let delay = self.backoff.next_delay(state.attempts);
        state.attempts += 1;
        let epoch = state.epoch;
        tracing::warn!(
            attempt = state.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );

        let inner = Arc::clone(self);
        state.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.lock();
                if state.epoch != epoch || state.status != ConnectionState::Closed {
                    return;
                }
                state.reconnect_task = None;
            }
            ConnectionManager { inner }.connect();
        }));
    }
}

impl SocketState {
    /// Detach the current socket so it can never deliver another event.
    fn detach_socket(&mut self) {
        if let Some(tx) = self.outbound.take() {
            // Let the writer send a close frame; its events are already stale.
            let _ = tx.send(Message::Close(None));
            self.socket_task = None;
        } else if let Some(task) = self.socket_task.take() {
            task.abort();
        }
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.reconnect_task.take() {
            timer.abort();
        }
        self.detach_socket();
        self.epoch += 1;
    }
}

/// Text frames left in the writer channel, minus this socket's `join`.
fn drain_unsent(rx: &mut mpsc::UnboundedReceiver<Message>, join: &str) -> Vec<String> {
    rx.close();
    let mut unsent = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            if text != join {
                unsent.push(text);
            }
        }
    }
    unsent
}

async fn open_socket(inner: &ConnectionInner) -> SessionResult<WsStream> {
    let token = inner.tokens.get_token().await.map_err(|e| match e {
        SessionError::Auth(_) => e,
        other => SessionError::Auth(other.to_string()),
    })?;
    let url = socket_url(&inner.endpoint, &inner.scope.project_id, &token)?;
    tracing::debug!(endpoint = %inner.endpoint, room = %inner.scope.project_id, "Opening socket");

    let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| SessionError::Connection("handshake timed out".into()))??;
    Ok(stream)
}

async fn run_socket(inner: Arc<ConnectionInner>, epoch: u64) {
    let stream = match open_socket(&inner).await {
        Ok(stream) => stream,
        Err(e) => {
            inner.socket_ended(epoch, Some(e), None);
            return;
        }
    };
    let (mut sink, mut stream) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // `join` goes into the writer queue before anything else can.
    let join = match inner.join_frame() {
        Ok(join) => join,
        Err(e) => {
            inner.socket_ended(epoch, Some(e), None);
            return;
        }
    };
    let _ = tx.send(Message::Text(join.clone()));
    if !inner.mark_open(epoch, tx) {
        let _ = sink.close().await;
        return;
    }

    let mut error = None;
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Message::Close(frame)) => {
                    let _ = sink.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    // A frame whose write fails may or may not have arrived;
                    // it is left to its request timeout.
                    if let Err(e) = sink.send(message).await {
                        error = Some(SessionError::from(e));
                        break;
                    }
                }
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    inner.emit_if_current(epoch, ConnectionEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(epoch, ?frame, "Server closed socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error = Some(SessionError::from(e));
                    break;
                }
                None => break,
            },
        }
    }
    inner.socket_ended(epoch, error, Some((&mut rx, join.as_str())));
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTokens;

    #[async_trait]
    impl TokenProvider for FailingTokens {
        async fn get_token(&self) -> SessionResult<String> {
            Err(SessionError::Connection("token service unreachable".into()))
        }
    }

    fn test_config() -> SessionConfig {
        let mut config = SessionConfig::new("ws://127.0.0.1:9", "proj", "home").with_user("u1", "Ada");
        config.backoff = BackoffConfig::new(Duration::from_millis(100), 2.0, Duration::from_secs(1));
        config
    }

    #[test]
    fn test_socket_url_embeds_token() {
        let url = socket_url("wss://editor.example.com", "proj-1", "a b&c").expect("url");
        assert_eq!(url.as_str(), "wss://editor.example.com/ws/proj-1?token=a+b%26c");
    }

    #[test]
    fn test_socket_url_keeps_base_path() {
        let url = socket_url("ws://localhost:8080/collab/", "p", "t").expect("url");
        assert_eq!(url.as_str(), "ws://localhost:8080/collab/ws/p?token=t");
    }

    #[test]
    fn test_socket_url_rejects_garbage() {
        assert!(matches!(socket_url("::", "p", "t"), Err(SessionError::InvalidUrl(_))));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(
            serde_json::to_value(ConnectionState::Destroyed).expect("serialize"),
            "destroyed"
        );
    }

    #[tokio::test]
    async fn test_send_when_idle_returns_false() {
        let (manager, _rx) = ConnectionManager::new(&test_config(), Arc::new(StaticToken::new("t")));
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(!manager.send("{}".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_schedules_single_reconnect() {
        let (manager, mut rx) = ConnectionManager::new(&test_config(), Arc::new(FailingTokens));

        manager.connect();
        manager.connect();

        let mut saw_auth_error = false;
        loop {
            match rx.recv().await.expect("event") {
                ConnectionEvent::Error(SessionError::Auth(msg)) => {
                    assert!(msg.contains("unreachable"));
                    saw_auth_error = true;
                }
                ConnectionEvent::State(ConnectionState::Closed) => break,
                _ => {}
            }
        }

        assert!(saw_auth_error);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.attempts(), 1);
        assert!(manager.reconnect_pending());

        manager.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timer_retries_until_destroyed() {
        let (manager, mut rx) = ConnectionManager::new(&test_config(), Arc::new(FailingTokens));
        manager.connect();

        let mut connecting = 0;
        while connecting < 3 {
            if let Some(ConnectionEvent::State(ConnectionState::Connecting)) = rx.recv().await {
                connecting += 1;
            }
        }
        assert!(manager.attempts() >= 2);

        manager.destroy();
        assert_eq!(manager.state(), ConnectionState::Destroyed);
        assert!(!manager.reconnect_pending());

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_end_returns_unsent_frames() {
        let (manager, mut events) =
            ConnectionManager::new(&test_config(), Arc::new(StaticToken::new("t")));
        let (tx, mut writer) = mpsc::unbounded_channel();
        {
            let mut state = manager.inner.lock();
            state.epoch = 1;
            state.status = ConnectionState::Connecting;
        }
        let _ = tx.send(Message::Text("join".into()));
        assert!(manager.inner.mark_open(1, tx));
        assert!(manager.send("a".into()));
        assert!(manager.send("b".into()));

        manager.inner.socket_ended(1, None, Some((&mut writer, "join")));
        assert!(!manager.send("c".into()));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], ConnectionEvent::State(ConnectionState::Open)));
        assert!(matches!(&seen[1], ConnectionEvent::Unsent(frames) if frames == &["a", "b"]));
        assert!(matches!(seen[2], ConnectionEvent::State(ConnectionState::Closed)));
        assert!(manager.reconnect_pending());

        manager.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_reconnect() {
        let (manager, mut rx) = ConnectionManager::new(&test_config(), Arc::new(FailingTokens));
        manager.connect();
        while !matches!(
            rx.recv().await,
            Some(ConnectionEvent::State(ConnectionState::Closed))
        ) {}
        assert!(manager.reconnect_pending());

        manager.disconnect();
        manager.disconnect();

        assert!(!manager.reconnect_pending());
        assert_eq!(manager.attempts(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
