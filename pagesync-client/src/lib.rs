//! # Pagesync Client Library
//!
//! Keeps one editor's view of a page in step with the collaboration server.
//! The binary and the integration tests both build on this library.
//!
//! ```text
//!  UI ──ops──▶ OperationBuilder ──▶ RequestCoordinator ──▶ ConnectionManager ──▶ socket
//!                                        ▲     (queue, rate limit)                  │
//!                                        │                                          ▼
//!  DocumentStore ◀── InboundRouter ◀─────┴──────────── CollabSession event loop ◀───┘
//!  PresenceController ◀──┘
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod listeners;
pub mod operations;
pub mod presence;
pub mod request;
pub mod router;
pub mod session;

pub use backoff::BackoffConfig;
pub use config::{PresenceConfig, RateLimitConfig, SessionConfig};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, StaticToken, TokenProvider,
};
pub use error::{SessionError, SessionResult};
pub use listeners::{ListenerId, Listeners};
pub use operations::OperationBuilder;
pub use presence::PresenceController;
pub use request::{PendingResponse, RequestCoordinator, Responder};
pub use router::{InboundRouter, Routed};
pub use session::CollabSession;
