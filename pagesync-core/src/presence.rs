//! Presence data: cursors, selections and the room roster.

use serde::{Deserialize, Serialize};

use crate::element::ElementId;

/// Cursor position in canvas coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// X position.
    pub x: f64,
    /// Y position.
    pub y: f64,
}

impl Cursor {
    /// Create a cursor position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Presence state of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// User the entry belongs to.
    pub user_id: String,
    /// Display name.
    pub user_name: String,
    /// Last known cursor.
    pub cursor: Cursor,
    /// Currently selected element, if any.
    pub selected_element_id: Option<ElementId>,
    /// When the entry was last refreshed, ms since epoch.
    pub last_seen_at: u64,
}

impl PresenceEntry {
    /// Create an entry with no cursor movement or selection yet.
    #[must_use]
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, now: u64) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            cursor: Cursor::default(),
            selected_element_id: None,
            last_seen_at: now,
        }
    }

    /// Fold a presence payload into this entry.
    ///
    /// The cursor and selection are updated only when the payload carries them.
    pub fn apply(&mut self, payload: &PresencePayload, now: u64) {
        if let Some(name) = &payload.user_name {
            self.user_name.clone_from(name);
        }
        if let Some(cursor) = payload.cursor {
            self.cursor = cursor;
        }
        if payload.cursor.is_some() || payload.selected_element_id.is_some() {
            self.selected_element_id
                .clone_from(&payload.selected_element_id);
        }
        self.last_seen_at = now;
    }
}

/// Payload of a `presence` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// Sender's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Sender's cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    /// Sender's selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_element_id: Option<ElementId>,
    /// Explicit leave notification.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub left: bool,
}

/// One user in the room roster delivered by `sync:page`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// User ID.
    pub user_id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}
