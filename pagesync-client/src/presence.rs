//! # Presence Controller
//!
//! Sole owner of presence state for a session: the local user's cursor and
//! selection, plus one entry per remote collaborator.
//!
//! Remote changes are coalesced into at most one `change` event per throttle
//! window. A change that lands inside the window schedules a single trailing
//! emission at the window's end, which reads the state at that moment, so the
//! latest cursor positions always arrive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pagesync_core::{current_timestamp, Cursor, ElementId, PresenceEntry, PresencePayload};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PresenceConfig;
use crate::listeners::{ListenerId, Listeners};

/// Name shown for collaborators who never sent one.
const UNNAMED_USER: &str = "Anonymous";

struct RemoteEntry {
    entry: PresenceEntry,
    seen: Instant,
}

struct PresenceState {
    local: PresenceEntry,
    remote: HashMap<String, RemoteEntry>,
    last_emit: Option<Instant>,
    trailing: Option<JoinHandle<()>>,
}

impl PresenceState {
    fn remote_snapshot(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> =
            self.remote.values().map(|r| r.entry.clone()).collect();
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }
}

struct PresenceInner {
    throttle: Duration,
    stale_after: Duration,
    state: Mutex<PresenceState>,
    change: Listeners<Vec<PresenceEntry>>,
}

/// Tracks who is here and where they are pointing.
#[derive(Clone)]
pub struct PresenceController {
    inner: Arc<PresenceInner>,
}

impl PresenceController {
    /// Create a controller for the local user.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        config: &PresenceConfig,
    ) -> Self {
        let state = PresenceState {
            local: PresenceEntry::new(user_id, user_name, current_timestamp()),
            remote: HashMap::new(),
            last_emit: None,
            trailing: None,
        };
        Self {
            inner: Arc::new(PresenceInner {
                throttle: config.throttle,
                stale_after: config.stale_after,
                state: Mutex::new(state),
                change: Listeners::new(),
            }),
        }
    }

    /// Move the local cursor. Returns the payload to broadcast.
    pub fn update_local_cursor(&self, x: f64, y: f64) -> PresencePayload {
        let mut state = self.inner.lock();
        state.local.cursor = Cursor { x, y };
        state.local.last_seen_at = current_timestamp();
        local_payload(&state.local)
    }

    /// Change the local selection. Returns `None` when it is unchanged, so
    /// nothing needs broadcasting.
    pub fn update_local_selection(&self, element_id: Option<ElementId>) -> Option<PresencePayload> {
        let mut state = self.inner.lock();
        if state.local.selected_element_id == element_id {
            return None;
        }
        state.local.selected_element_id = element_id;
        state.local.last_seen_at = current_timestamp();
        Some(local_payload(&state.local))
    }

    /// Payload announcing that the local user is leaving.
    #[must_use]
    pub fn leave_payload(&self) -> PresencePayload {
        PresencePayload {
            left: true,
            ..PresencePayload::default()
        }
    }

    /// Fold a presence update from another user into the map.
    ///
    /// Updates claiming to come from the local user are ignored. Returns
    /// whether the remote map changed.
    pub fn apply_remote(&self, user_id: &str, payload: &PresencePayload) -> bool {
        {
            let mut state = self.inner.lock();
            if user_id == state.local.user_id {
                return false;
            }
            if payload.left {
                if state.remote.remove(user_id).is_none() {
                    return false;
                }
                tracing::debug!(user_id, "Collaborator left");
            } else {
                let now = current_timestamp();
                let remote = state
                    .remote
                    .entry(user_id.to_string())
                    .or_insert_with(|| {
                        tracing::debug!(user_id, "Collaborator joined presence");
                        RemoteEntry {
                            entry: PresenceEntry::new(user_id, UNNAMED_USER, now),
                            seen: Instant::now(),
                        }
                    });
                remote.entry.apply(payload, now);
                remote.seen = Instant::now();
            }
        }
        self.inner.notify_change();
        true
    }

    /// Every entry, local user first.
    #[must_use]
    pub fn get_states(&self) -> Vec<PresenceEntry> {
        let state = self.inner.lock();
        let mut entries = Vec::with_capacity(state.remote.len() + 1);
        entries.push(state.local.clone());
        entries.extend(state.remote_snapshot());
        entries
    }

    /// Remote entries only, ordered by user ID.
    #[must_use]
    pub fn remote_states(&self) -> Vec<PresenceEntry> {
        self.inner.lock().remote_snapshot()
    }

    /// The local user's entry.
    #[must_use]
    pub fn local(&self) -> PresenceEntry {
        self.inner.lock().local.clone()
    }

    /// Drop remote entries not refreshed within the stale threshold. The
    /// local entry is never pruned. Returns how many were removed.
    pub fn prune_stale(&self) -> usize {
        let removed = {
            let mut state = self.inner.lock();
            let stale_after = self.inner.stale_after;
            let now = Instant::now();
            let before = state.remote.len();
            state
                .remote
                .retain(|_, r| now.saturating_duration_since(r.seen) <= stale_after);
            before - state.remote.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "Pruned stale presence");
            self.inner.notify_change();
        }
        removed
    }

    /// Drop every remote entry and cancel a pending trailing emission.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.remote.clear();
        state.last_emit = None;
        if let Some(trailing) = state.trailing.take() {
            trailing.abort();
        }
    }

    /// Subscribe to throttled snapshots of remote presence.
    pub fn on_change(
        &self,
        callback: impl Fn(&Vec<PresenceEntry>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.change.on(callback)
    }

    /// Unsubscribe a change listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.change.off(id)
    }

    /// Remove every change listener.
    pub fn clear_listeners(&self) {
        self.inner.change.clear();
    }
}

impl PresenceInner {
    fn lock(&self) -> MutexGuard<'_, PresenceState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn notify_change(self: &Arc<Self>) {
        let snapshot = {
            let mut state = self.lock();
            if state.trailing.is_some() {
                return;
            }
            let now = Instant::now();
            match state.last_emit {
                Some(last) if now < last + self.throttle => {
                    let at = last + self.throttle;
                    let inner = Arc::clone(self);
                    state.trailing = Some(tokio::spawn(async move {
                        tokio::time::sleep_until(at).await;
                        inner.emit_trailing();
                    }));
                    return;
                }
                _ => {
                    state.last_emit = Some(now);
                    state.remote_snapshot()
                }
            }
        };
        self.change.emit(&snapshot);
    }

    fn emit_trailing(&self) {
        let snapshot = {
            let mut state = self.lock();
            state.trailing = None;
            state.last_emit = Some(Instant::now());
            state.remote_snapshot()
        };
        self.change.emit(&snapshot);
    }
}

fn local_payload(local: &PresenceEntry) -> PresencePayload {
    PresencePayload {
        user_name: Some(local.user_name.clone()),
        cursor: Some(local.cursor),
        selected_element_id: local.selected_element_id.clone(),
        left: false,
    }
}
