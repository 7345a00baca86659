//! Mock collaboration server for integration tests.
//!
//! Spins up a real Axum WebSocket endpoint on a free port. Every inbound frame
//! is recorded, structural requests can be answered automatically, and tests
//! can push frames to or drop every connected client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Instruction for one live server-side socket.
enum Command {
    Send(String),
    Drop,
}

#[derive(Default)]
struct MockInner {
    frames: Mutex<Vec<Value>>,
    tokens: Mutex<Vec<String>>,
    rooms: Mutex<Vec<String>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<Command>>>,
    connections: AtomicUsize,
    auto_reply: AtomicBool,
}

#[derive(Clone, Default)]
struct MockState {
    inner: Arc<MockInner>,
}

/// A test server instance with control handles.
pub struct TestServer {
    addr: SocketAddr,
    state: MockState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestServer {
    /// Start a server that confirms every structural request it receives.
    ///
    /// # Panics
    ///
    /// Panics if no port is available or the server fails to bind.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that records frames but never answers them.
    pub async fn start_silent() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(auto_reply: bool) -> Self {
        let port = portpicker::pick_unused_port().expect("no available port");
        let addr = SocketAddr::from(([127, 0, 0, 1], port));

        let state = MockState::default();
        state.inner.auto_reply.store(auto_reply, Ordering::SeqCst);

        let app = Router::new()
            .route("/ws/{room}", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind(addr).await.expect("failed to bind");
        let actual_addr = listener.local_addr().expect("failed to get local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server error");
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            addr: actual_addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Base URL to hand to a session config.
    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every frame received so far, across all connections, in order.
    pub fn frames(&self) -> Vec<Value> {
        self.state.inner.frames.lock().unwrap().clone()
    }

    /// Frame types received so far, in order.
    pub fn frame_types(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Tokens presented on each handshake.
    pub fn tokens(&self) -> Vec<String> {
        self.state.inner.tokens.lock().unwrap().clone()
    }

    /// Room path segment of each handshake.
    pub fn rooms(&self) -> Vec<String> {
        self.state.inner.rooms.lock().unwrap().clone()
    }

    /// Number of sockets accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.inner.connections.load(Ordering::SeqCst)
    }

    /// Send a frame to every connected client.
    pub fn push(&self, frame: &Value) {
        let text = frame.to_string();
        self.state
            .inner
            .clients
            .lock()
            .unwrap()
            .retain(|tx| tx.send(Command::Send(text.clone())).is_ok());
    }

    /// Abruptly drop every connected client.
    pub fn drop_connections(&self) {
        for tx in self.state.inner.clients.lock().unwrap().drain(..) {
            let _ = tx.send(Command::Drop);
        }
    }

    /// Wait until at least `count` frames have arrived.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within five seconds.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<Value> {
        self.wait_until(|server| server.frames().len() >= count)
            .await;
        self.frames()
    }

    /// Wait until at least `count` sockets have been accepted.
    pub async fn wait_for_connections(&self, count: usize) {
        self.wait_until(|server| server.connection_count() >= count)
            .await;
    }

    async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting; frames so far: {:?}",
                self.frame_types()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Gracefully shut down the server.
    pub async fn shutdown(mut self) {
        self.drop_connections();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Build a server-side envelope.
#[allow(dead_code)]
pub fn envelope(kind: &str, request_id: Option<&str>, payload: Value) -> Value {
    let mut frame = json!({
        "type": kind,
        "projectId": "proj",
        "pageId": "home",
        "userId": "server",
        "timestamp": 1,
        "payload": payload,
    });
    if let Some(id) = request_id {
        frame["requestId"] = json!(id);
    }
    frame
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<MockState>,
) -> impl IntoResponse {
    state
        .inner
        .tokens
        .lock()
        .unwrap()
        .push(params.get("token").cloned().unwrap_or_default());
    state.inner.rooms.lock().unwrap().push(room);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: MockState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.inner.clients.lock().unwrap().push(tx);
    state.inner.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Send(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Command::Drop) | None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let reply = auto_reply(&state, &frame);
                    state.inner.frames.lock().unwrap().push(frame);
                    if let Some(reply) = reply {
                        if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Confirm structural requests by echoing them back with a server identity.
fn auto_reply(state: &MockState, frame: &Value) -> Option<Value> {
    if !state.inner.auto_reply.load(Ordering::SeqCst) {
        return None;
    }
    let kind = frame["type"].as_str()?;
    if !kind.starts_with("element:") {
        return None;
    }
    let request_id = frame["requestId"].as_str()?;
    Some(envelope(kind, Some(request_id), frame["payload"].clone()))
}
