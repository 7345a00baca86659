//! # Collaborative Session
//!
//! [`CollabSession`] is the one object an editor holds per open page. It wires
//! the connection, request coordinator, presence controller, operation builder
//! and inbound router together and owns two background tasks:
//!
//! - the event loop, which turns connection events into routing, queue
//!   flushes and listener notifications
//! - the prune ticker, which drops presence of peers that vanished silently
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagesync_client::{CollabSession, SessionConfig, StaticToken};
//! use pagesync_core::{ElementNode, SharedDocument};
//!
//! # async fn run() -> Result<(), pagesync_client::SessionError> {
//! let doc = SharedDocument::new();
//! let config = SessionConfig::new("wss://editor.example.com", "proj-1", "home");
//! let session = CollabSession::new(config, Arc::new(StaticToken::new("secret")), Arc::new(doc.clone()))?;
//!
//! session.on_synced(|users| println!("{} collaborators online", users.len()));
//! session.connect();
//!
//! let created = session.create_element(ElementNode::new("Section"), None, None).await?;
//! println!("created {}", created.element_id());
//! session.destroy();
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use pagesync_core::{
    DocumentStore, ElementId, ElementNode, ElementPatch, OperationResult, Payload, PresenceEntry,
    SessionScope, SessionUser, SyncPagePayload,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, TokenProvider};
use crate::error::{SessionError, SessionResult};
use crate::listeners::{ListenerId, Listeners};
use crate::operations::OperationBuilder;
use crate::presence::PresenceController;
use crate::request::RequestCoordinator;
use crate::router::{InboundRouter, Routed};

/// Reason given to requests still pending at teardown.
const DESTROYED: &str = "session destroyed";

/// A live editing session for one page.
///
/// Cheap to clone; all clones share one connection. Dropping the last clone
/// tears the session down as if [`CollabSession::destroy`] had been called.
#[derive(Clone)]
pub struct CollabSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    scope: SessionScope,
    connection: ConnectionManager,
    coordinator: RequestCoordinator,
    presence: PresenceController,
    operations: OperationBuilder,
    router: InboundRouter,
    synced: AtomicBool,
    destroyed: AtomicBool,
    users: Mutex<Vec<SessionUser>>,
    status_listeners: Listeners<ConnectionState>,
    synced_listeners: Listeners<Vec<SessionUser>>,
    error_listeners: Listeners<SessionError>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CollabSession {
    /// Build a session. Nothing connects until [`CollabSession::connect`].
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        config: SessionConfig,
        tokens: Arc<dyn TokenProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> SessionResult<Self> {
        config.validate()?;

        let (connection, events) = ConnectionManager::new(&config, tokens);
        let coordinator = RequestCoordinator::new(
            connection.clone(),
            config.request_timeout,
            config.queue_capacity,
            config.rate_limit.as_ref(),
        );
        let presence =
            PresenceController::new(&config.user_id, &config.user_name, &config.presence);
        let operations = OperationBuilder::new(config.scope(), coordinator.clone());
        let router = InboundRouter::new(
            config.user_id.clone(),
            coordinator.clone(),
            presence.clone(),
            store,
        );

        let inner = Arc::new(SessionInner {
            scope: config.scope(),
            connection,
            coordinator,
            presence,
            operations,
            router,
            synced: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            users: Mutex::new(Vec::new()),
            status_listeners: Listeners::new(),
            synced_listeners: Listeners::new(),
            error_listeners: Listeners::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let event_loop = tokio::spawn(run_events(Arc::downgrade(&inner), events));
        let pruner = tokio::spawn(run_pruner(
            Arc::downgrade(&inner),
            config.presence.prune_interval,
        ));
        inner.lock_tasks().extend([event_loop, pruner]);

        tracing::info!(
            project_id = %config.project_id,
            page_id = %config.page_id,
            user_id = %config.user_id,
            "Session created"
        );
        Ok(Self { inner })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the connection. No-op while connecting, open, or destroyed.
    pub fn connect(&self) {
        self.inner.connection.connect();
    }

    /// Drop the current socket and connect again right away.
    pub fn reconnect(&self) {
        if self.is_destroyed() {
            return;
        }
        self.inner.connection.disconnect();
        self.inner.connection.connect();
    }

    /// Close the connection without tearing the session down.
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
        self.inner.synced.store(false, Ordering::SeqCst);
    }

    /// Tear everything down: pending requests are rejected, timers and
    /// background tasks stop, and every listener is removed. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.announce_leave();
        self.inner.teardown(DESTROYED);
        self.inner.status_listeners.emit(&ConnectionState::Destroyed);
        self.inner.clear_listeners();
        tracing::info!("Session destroyed");
    }

    /// Whether [`CollabSession::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Element operations
    // ------------------------------------------------------------------

    /// Create `node` with its subtree under `parent_id` at `position`.
    pub fn create_element(
        &self,
        node: ElementNode,
        parent_id: Option<ElementId>,
        position: Option<u32>,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.inner
            .operations
            .create_element(node, parent_id, position)
    }

    /// Update the fields present in `updates`.
    pub fn update_element(
        &self,
        element_id: ElementId,
        updates: ElementPatch,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.inner.operations.update_element(element_id, updates)
    }

    /// Move an element to a new parent and sibling index.
    pub fn move_element(
        &self,
        element_id: ElementId,
        new_parent_id: Option<ElementId>,
        new_position: u32,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.inner
            .operations
            .move_element(element_id, new_parent_id, new_position)
    }

    /// Delete an element and its subtree.
    pub fn delete_element(
        &self,
        element_id: ElementId,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.inner.operations.delete_element(element_id)
    }

    // ------------------------------------------------------------------
    // Presence and sync
    // ------------------------------------------------------------------

    /// Record the local cursor and selection and broadcast them.
    ///
    /// Presence is ephemeral, so nothing is queued while offline. Returns
    /// whether the update went out.
    pub fn send_presence(&self, x: f64, y: f64, element_id: Option<ElementId>) -> bool {
        let presence = &self.inner.presence;
        presence.update_local_selection(element_id);
        let payload = presence.update_local_cursor(x, y);

        if !self.inner.connection.is_open() {
            return false;
        }
        match self.inner.scope.envelope(Payload::Presence(payload)).to_json() {
            Ok(text) => self.inner.connection.send(text),
            Err(e) => {
                tracing::warn!("Failed to encode presence: {e}");
                false
            }
        }
    }

    /// Ask the server for a fresh page snapshot. Queued while offline.
    ///
    /// # Errors
    ///
    /// Fails once the session is destroyed.
    pub fn request_sync(&self) -> SessionResult<()> {
        let envelope = self
            .inner
            .scope
            .envelope(Payload::SyncPage(SyncPagePayload::default()));
        self.inner.coordinator.send_or_queue(&envelope)
    }

    /// Whether a page snapshot arrived on the current connection.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.inner.synced.load(Ordering::SeqCst)
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Roster from the latest page snapshot.
    #[must_use]
    pub fn users(&self) -> Vec<SessionUser> {
        self.inner.lock_users().clone()
    }

    /// Presence of everyone, local user first.
    #[must_use]
    pub fn presence_states(&self) -> Vec<PresenceEntry> {
        self.inner.presence.get_states()
    }

    /// Identifiers this session stamps on outbound envelopes.
    #[must_use]
    pub fn scope(&self) -> &SessionScope {
        &self.inner.scope
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.coordinator.pending_count()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to connection state changes. The callback runs immediately
    /// with the current state.
    pub fn on_status(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner
            .status_listeners
            .on_with_replay(&self.status(), callback)
    }

    /// Subscribe to page snapshots. The callback receives the roster.
    pub fn on_synced(
        &self,
        callback: impl Fn(&Vec<SessionUser>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.synced_listeners.on(callback)
    }

    /// Subscribe to non-fatal errors not tied to a specific request.
    pub fn on_error(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) -> ListenerId {
        self.inner.error_listeners.on(callback)
    }

    /// Subscribe to throttled remote presence snapshots.
    pub fn on_presence(
        &self,
        callback: impl Fn(&Vec<PresenceEntry>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.presence.on_change(callback)
    }

    /// Remove a subscription made through any `on_*` method.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.status_listeners.off(id)
            || self.inner.synced_listeners.off(id)
            || self.inner.error_listeners.off(id)
            || self.inner.presence.off(id)
    }

    fn announce_leave(&self) {
        if !self.inner.connection.is_open() {
            return;
        }
        let leave = Payload::Presence(self.inner.presence.leave_payload());
        if let Ok(text) = self.inner.scope.envelope(leave).to_json() {
            self.inner.connection.send(text);
        }
    }
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("scope", &self.inner.scope)
            .field("status", &self.status())
            .field("synced", &self.is_synced())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn lock_users(&self) -> std::sync::MutexGuard<'_, Vec<SessionUser>> {
        self.users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::State(state) => {
                match state {
                    ConnectionState::Open => {
                        // `join` is already ahead of anything flushed here.
                        self.coordinator.flush_queue();
                    }
                    ConnectionState::Closed | ConnectionState::Connecting => {
                        self.synced.store(false, Ordering::SeqCst);
                    }
                    ConnectionState::Idle | ConnectionState::Destroyed => {}
                }
                self.status_listeners.emit(&state);
            }
            ConnectionEvent::Message(text) => self.handle_frame(&text),
            ConnectionEvent::Error(error) => self.error_listeners.emit(&error),
            ConnectionEvent::Unsent(frames) => self.coordinator.requeue_unsent(frames),
        }
    }

    fn handle_frame(&self, text: &str) {
        match self.router.route_text(text) {
            Routed::Synced(users) => {
                *self.lock_users() = users.clone();
                self.synced.store(true, Ordering::SeqCst);
                self.synced_listeners.emit(&users);
            }
            Routed::Error(error) => self.error_listeners.emit(&error),
            Routed::Resolved(_)
            | Routed::Applied(_)
            | Routed::Presence(_)
            | Routed::Joined(_)
            | Routed::Ignored => {}
        }
    }

    fn teardown(&self, reason: &str) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.connection.destroy();
        self.coordinator.shutdown(reason);
        self.presence.clear();
        self.synced.store(false, Ordering::SeqCst);
    }

    fn clear_listeners(&self) {
        self.status_listeners.clear();
        self.synced_listeners.clear();
        self.error_listeners.clear();
        self.presence.clear_listeners();
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.teardown("session dropped");
        }
    }
}

async fn run_events(session: Weak<SessionInner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if inner.destroyed.load(Ordering::SeqCst) {
            break;
        }
        inner.handle_event(event);
    }
    tracing::debug!("Session event loop stopped");
}

async fn run_pruner(session: Weak<SessionInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.presence.prune_stale();
    }
}
