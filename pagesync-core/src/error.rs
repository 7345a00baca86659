//! Error types for document model operations.

use thiserror::Error;

/// Result type for document model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in document model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Element not found in the document tree.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// An element with the same ID already exists.
    #[error("Element already exists: {0}")]
    ElementExists(String),

    /// Invalid structural operation on the tree.
    #[error("Invalid operation on element: {0}")]
    InvalidOperation(String),

    /// The move would place an element beneath itself.
    #[error("Cannot move {element} under its own descendant {parent}")]
    Cycle {
        /// Element being moved.
        element: String,
        /// Requested new parent.
        parent: String,
    },

    /// Envelope or payload serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The envelope `type` discriminant is not one this client understands.
    #[error("Unknown envelope type: {0}")]
    UnknownEnvelopeType(String),
}
