//! # Wire Envelopes
//!
//! Every frame exchanged with the collaboration server is one JSON envelope:
//!
//! ```text
//! {"type": "element:create", "projectId": "...", "pageId": "...",
//!  "payload": {...}, "userId": "...", "requestId": "7", "timestamp": 1700000000000}
//! ```
//!
//! On the Rust side the `type`/`payload` pair collapses into the [`Payload`]
//! enum, so each discriminant carries exactly one payload schema.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::element::{ElementId, ElementNode, ElementPatch};
use crate::error::{CoreError, CoreResult};
use crate::presence::{PresencePayload, SessionUser};

/// Correlation ID carried by request envelopes and echoed by responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Borrow the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of envelope discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeType {
    /// Room join handshake, sent automatically on open.
    #[serde(rename = "join")]
    Join,
    /// Full page hydration.
    #[serde(rename = "sync:page")]
    SyncPage,
    /// Element subtree creation.
    #[serde(rename = "element:create")]
    ElementCreate,
    /// Partial element update.
    #[serde(rename = "element:update")]
    ElementUpdate,
    /// Element reparent/reorder.
    #[serde(rename = "element:move")]
    ElementMove,
    /// Element subtree deletion.
    #[serde(rename = "element:delete")]
    ElementDelete,
    /// Cursor and selection broadcast.
    #[serde(rename = "presence")]
    Presence,
    /// Server-reported failure.
    #[serde(rename = "error")]
    Error,
}

impl EnvelopeType {
    /// Wire name of this discriminant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::SyncPage => "sync:page",
            Self::ElementCreate => "element:create",
            Self::ElementUpdate => "element:update",
            Self::ElementMove => "element:move",
            Self::ElementDelete => "element:delete",
            Self::Presence => "presence",
            Self::Error => "error",
        }
    }

    /// Parse a wire name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEnvelopeType`] for names outside the closed set.
    pub fn parse(name: &str) -> CoreResult<Self> {
        match name {
            "join" => Ok(Self::Join),
            "sync:page" => Ok(Self::SyncPage),
            "element:create" => Ok(Self::ElementCreate),
            "element:update" => Ok(Self::ElementUpdate),
            "element:move" => Ok(Self::ElementMove),
            "element:delete" => Ok(Self::ElementDelete),
            "presence" => Ok(Self::Presence),
            "error" => Ok(Self::Error),
            other => Err(CoreError::UnknownEnvelopeType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `join` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Display name announced to the room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Payload of a `sync:page` envelope. A sync request sends it empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPagePayload {
    /// Every element of the page, as nested subtrees or a flat list linked
    /// by `parentId`.
    #[serde(default)]
    pub elements: Vec<ElementNode>,
    /// Users currently in the room.
    #[serde(default)]
    pub users: Vec<SessionUser>,
}

/// Payload of an `element:create` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    /// The new subtree.
    pub element: ElementNode,
    /// Parent to insert under, `None` for a page root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    /// Sibling index; appended when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

/// Payload of an `element:update` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    /// Target element.
    pub element_id: ElementId,
    /// Fields to change.
    #[serde(default)]
    pub updates: ElementPatch,
}

/// Payload of an `element:move` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    /// Element being moved.
    pub element_id: ElementId,
    /// New parent, `None` for a page root.
    #[serde(default)]
    pub parent_id: Option<ElementId>,
    /// New sibling index.
    #[serde(default)]
    pub order: u32,
}

/// Payload of an `element:delete` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    /// Root of the subtree to delete.
    pub element_id: ElementId,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human readable reason.
    pub message: String,
    /// Optional machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Typed envelope payload, one variant per [`EnvelopeType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `join`
    Join(JoinPayload),
    /// `sync:page`
    SyncPage(SyncPagePayload),
    /// `element:create`
    ElementCreate(CreatePayload),
    /// `element:update`
    ElementUpdate(UpdatePayload),
    /// `element:move`
    ElementMove(MovePayload),
    /// `element:delete`
    ElementDelete(DeletePayload),
    /// `presence`
    Presence(PresencePayload),
    /// `error`
    Error(ErrorPayload),
}

impl Payload {
    /// The discriminant this payload is sent under.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeType {
        match self {
            Self::Join(_) => EnvelopeType::Join,
            Self::SyncPage(_) => EnvelopeType::SyncPage,
            Self::ElementCreate(_) => EnvelopeType::ElementCreate,
            Self::ElementUpdate(_) => EnvelopeType::ElementUpdate,
            Self::ElementMove(_) => EnvelopeType::ElementMove,
            Self::ElementDelete(_) => EnvelopeType::ElementDelete,
            Self::Presence(_) => EnvelopeType::Presence,
            Self::Error(_) => EnvelopeType::Error,
        }
    }

    /// Decode the raw payload for a given discriminant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the payload does not match the
    /// schema for `kind`.
    pub fn decode(kind: EnvelopeType, raw: Value) -> CoreResult<Self> {
        // A missing payload decodes like an empty object.
        let raw = if raw.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            raw
        };
        Ok(match kind {
            EnvelopeType::Join => Self::Join(serde_json::from_value(raw)?),
            EnvelopeType::SyncPage => Self::SyncPage(serde_json::from_value(raw)?),
            EnvelopeType::ElementCreate => Self::ElementCreate(serde_json::from_value(raw)?),
            EnvelopeType::ElementUpdate => Self::ElementUpdate(serde_json::from_value(raw)?),
            EnvelopeType::ElementMove => Self::ElementMove(serde_json::from_value(raw)?),
            EnvelopeType::ElementDelete => Self::ElementDelete(serde_json::from_value(raw)?),
            EnvelopeType::Presence => Self::Presence(serde_json::from_value(raw)?),
            EnvelopeType::Error => Self::Error(serde_json::from_value(raw)?),
        })
    }
}

/// Identifiers stamped on every outbound envelope of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    /// Project being edited.
    pub project_id: String,
    /// Page being edited.
    pub page_id: String,
    /// Local user.
    pub user_id: String,
}

impl SessionScope {
    /// Create a scope.
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        page_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            page_id: page_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Wrap a payload in an envelope stamped with this scope and the current time.
    #[must_use]
    pub fn envelope(&self, payload: Payload) -> Envelope {
        Envelope {
            project_id: self.project_id.clone(),
            page_id: self.page_id.clone(),
            user_id: self.user_id.clone(),
            request_id: None,
            timestamp: current_timestamp(),
            payload,
        }
    }
}

/// A decoded wire envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct Envelope {
    /// Project the envelope belongs to.
    pub project_id: String,
    /// Page the envelope belongs to.
    pub page_id: String,
    /// Originating user.
    pub user_id: String,
    /// Correlation ID for request/response pairs.
    pub request_id: Option<RequestId>,
    /// Send time in milliseconds since epoch.
    pub timestamp: u64,
    /// Typed payload.
    pub payload: Payload,
}

impl Envelope {
    /// Attach a request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// The envelope's discriminant.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeType {
        self.payload.kind()
    }

    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, unknown types, or payloads that do
    /// not match their type's schema.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        Self::try_from(wire)
    }

    /// Serialize into one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Best-effort extraction of the `requestId` from a frame that may not
    /// decode as a full envelope.
    #[must_use]
    pub fn request_id_of(text: &str) -> Option<RequestId> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Header {
            request_id: Option<RequestId>,
        }
        serde_json::from_str::<Header>(text)
            .ok()
            .and_then(|h| h.request_id)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelopeRef {
            kind: self.payload.kind(),
            project_id: &self.project_id,
            page_id: &self.page_id,
            payload: &self.payload,
            user_id: &self.user_id,
            request_id: self.request_id.as_ref(),
            timestamp: self.timestamp,
        }
        .serialize(serializer)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: EnvelopeType,
    project_id: &'a str,
    page_id: &'a str,
    payload: &'a Payload,
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a RequestId>,
    timestamp: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    page_id: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    request_id: Option<RequestId>,
    #[serde(default)]
    timestamp: u64,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = CoreError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind = EnvelopeType::parse(&wire.kind)?;
        Ok(Self {
            project_id: wire.project_id,
            page_id: wire.page_id,
            user_id: wire.user_id,
            request_id: wire.request_id,
            timestamp: wire.timestamp,
            payload: Payload::decode(kind, wire.payload)?,
        })
    }
}

/// Get the current timestamp in milliseconds since epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Timestamps won't exceed u64 for billions of years
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
