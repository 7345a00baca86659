//! # Inbound Router
//!
//! Dispatches every inbound frame to exactly one owner:
//!
//! | Frame | Owner |
//! |-------|-------|
//! | any type with a pending `requestId` | the waiting caller (`error` rejects it) |
//! | `sync:page` | document store + session roster |
//! | `element:*` | document store |
//! | `presence` | presence controller (own echoes dropped) |
//! | `error` without a pending match | session error listeners |
//! | `join` | logged |
//!
//! A `requestId` that matches nothing means this client is a bystander to
//! someone else's confirmed operation, so the frame falls through to the
//! broadcast rules.

use std::sync::Arc;

use pagesync_core::{
    DocumentStore, Envelope, EnvelopeType, ErrorPayload, Payload, RequestId, SessionUser,
};

use crate::error::SessionError;
use crate::presence::PresenceController;
use crate::request::RequestCoordinator;

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Completed the caller waiting on this request.
    Resolved(RequestId),
    /// Store hydrated from a page snapshot; carries the roster.
    Synced(Vec<SessionUser>),
    /// A structural broadcast was applied to the store.
    Applied(EnvelopeType),
    /// Presence of another user changed.
    Presence(String),
    /// A collaborator joined.
    Joined(String),
    /// Needs surfacing to the session error listeners.
    Error(SessionError),
    /// Nothing to do, e.g. our own presence echo.
    Ignored,
}

/// Routes parsed frames to their owners.
#[derive(Clone)]
pub struct InboundRouter {
    local_user_id: String,
    coordinator: RequestCoordinator,
    presence: PresenceController,
    store: Arc<dyn DocumentStore>,
}

impl InboundRouter {
    /// Create a router for the session of `local_user_id`.
    #[must_use]
    pub fn new(
        local_user_id: impl Into<String>,
        coordinator: RequestCoordinator,
        presence: PresenceController,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            coordinator,
            presence,
            store,
        }
    }

    /// Parse and route one text frame.
    ///
    /// A frame that fails to decode still rejects its request when a
    /// `requestId` can be recovered from it.
    pub fn route_text(&self, text: &str) -> Routed {
        match Envelope::parse(text) {
            Ok(envelope) => self.route(envelope),
            Err(e) => {
                let error = SessionError::from(e);
                if let Some(request_id) = Envelope::request_id_of(text) {
                    if let Some(responder) = self.coordinator.claim(&request_id) {
                        tracing::warn!(request_id = %request_id, "Undecodable response: {error}");
                        responder.respond(Err(error));
                        return Routed::Resolved(request_id);
                    }
                }
                tracing::warn!("Dropping undecodable frame: {error}");
                Routed::Error(error)
            }
        }
    }

    /// Route one decoded envelope.
    pub fn route(&self, envelope: Envelope) -> Routed {
        if let Some(request_id) = &envelope.request_id {
            if let Some(responder) = self.coordinator.claim(request_id) {
                let request_id = request_id.clone();
                tracing::debug!(request_id = %request_id, kind = %envelope.kind(), "Response matched");
                match envelope.payload {
                    Payload::Error(error) => responder.respond(Err(server_error(error))),
                    _ => responder.respond(Ok(envelope)),
                }
                return Routed::Resolved(request_id);
            }
        }
        self.broadcast(envelope)
    }

    fn broadcast(&self, envelope: Envelope) -> Routed {
        let kind = envelope.kind();
        match envelope.payload {
            Payload::SyncPage(page) => {
                tracing::info!(
                    elements = page.elements.len(),
                    users = page.users.len(),
                    "Page snapshot received"
                );
                self.store.load_elements(page.elements);
                Routed::Synced(page.users)
            }
            Payload::ElementCreate(create) => {
                self.store
                    .remote_add(create.element, create.parent_id.as_ref(), create.position);
                Routed::Applied(kind)
            }
            Payload::ElementUpdate(update) => {
                self.store.remote_update(&update.element_id, &update.updates);
                Routed::Applied(kind)
            }
            Payload::ElementMove(moved) => {
                self.store
                    .remote_move(&moved.element_id, moved.parent_id.as_ref(), moved.order);
                Routed::Applied(kind)
            }
            Payload::ElementDelete(delete) => {
                self.store.remote_delete(&delete.element_id);
                Routed::Applied(kind)
            }
            Payload::Presence(presence) => {
                if envelope.user_id == self.local_user_id {
                    return Routed::Ignored;
                }
                if self.presence.apply_remote(&envelope.user_id, &presence) {
                    Routed::Presence(envelope.user_id)
                } else {
                    Routed::Ignored
                }
            }
            Payload::Error(error) => {
                tracing::warn!(code = ?error.code, "Server error: {}", error.message);
                Routed::Error(server_error(error))
            }
            Payload::Join(join) => {
                tracing::info!(user_id = %envelope.user_id, user_name = ?join.user_name, "Collaborator joined");
                Routed::Joined(envelope.user_id)
            }
        }
    }
}

fn server_error(error: ErrorPayload) -> SessionError {
    SessionError::Server {
        message: error.message,
        code: error.code,
    }
}
