//! # Pagesync Core
//!
//! Data model shared by the collaborative session client and its embedders.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                pagesync-core                │
//! ├─────────────────────────────────────────────┤
//! │  Document Tree   │  Wire Protocol           │
//! │  - Elements      │  - Envelopes             │
//! │  - Patches       │  - Typed payloads        │
//! │  - Store trait   │  - Operation results     │
//! ├─────────────────────────────────────────────┤
//! │  Presence        │  Flow Control            │
//! │  - Cursors       │  - Token bucket          │
//! │  - Roster        │  - Offline queue         │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod element;
pub mod envelope;
pub mod error;
pub mod offline;
pub mod operation;
pub mod presence;
pub mod rate;
pub mod store;
pub mod tree;

pub use element::{ElementId, ElementNode, ElementPatch};
pub use envelope::{
    current_timestamp, CreatePayload, DeletePayload, Envelope, EnvelopeType, ErrorPayload,
    JoinPayload, MovePayload, Payload, RequestId, SessionScope, SyncPagePayload, UpdatePayload,
};
pub use error::{CoreError, CoreResult};
pub use offline::{OfflineQueue, DEFAULT_QUEUE_CAPACITY};
pub use operation::OperationResult;
pub use presence::{Cursor, PresenceEntry, PresencePayload, SessionUser};
pub use rate::RateBucket;
pub use store::{DocumentStore, SharedDocument};
pub use tree::DocumentTree;

/// Core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
