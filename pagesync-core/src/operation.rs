//! Typed results of structural operations.

use serde::{Deserialize, Serialize};

use crate::element::{ElementId, ElementNode};
use crate::envelope::{Envelope, EnvelopeType, Payload};

/// Server-confirmed outcome of an element operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationResult {
    /// Element subtree created.
    #[serde(rename_all = "camelCase")]
    Create {
        /// The element as stored by the server.
        element: ElementNode,
    },
    /// Element updated.
    #[serde(rename_all = "camelCase")]
    Update {
        /// Updated element.
        element_id: ElementId,
    },
    /// Element moved.
    #[serde(rename_all = "camelCase")]
    Move {
        /// Moved element.
        element_id: ElementId,
        /// New parent.
        parent_id: Option<ElementId>,
        /// New sibling index.
        order: u32,
    },
    /// Element deleted.
    #[serde(rename_all = "camelCase")]
    Delete {
        /// Root of the deleted subtree.
        deleted_element_id: ElementId,
    },
}

impl OperationResult {
    /// Interpret a response envelope as the result of an operation of type
    /// `expected`.
    ///
    /// Returns `None` when the response type does not match.
    #[must_use]
    pub fn from_response(expected: EnvelopeType, response: Envelope) -> Option<Self> {
        match (expected, response.payload) {
            (EnvelopeType::ElementCreate, Payload::ElementCreate(p)) => {
                Some(Self::Create { element: p.element })
            }
            (EnvelopeType::ElementUpdate, Payload::ElementUpdate(p)) => Some(Self::Update {
                element_id: p.element_id,
            }),
            (EnvelopeType::ElementMove, Payload::ElementMove(p)) => Some(Self::Move {
                element_id: p.element_id,
                parent_id: p.parent_id,
                order: p.order,
            }),
            (EnvelopeType::ElementDelete, Payload::ElementDelete(p)) => Some(Self::Delete {
                deleted_element_id: p.element_id,
            }),
            _ => None,
        }
    }

    /// The element this result concerns.
    #[must_use]
    pub fn element_id(&self) -> &ElementId {
        match self {
            Self::Create { element } => &element.id,
            Self::Update { element_id } | Self::Move { element_id, .. } => element_id,
            Self::Delete { deleted_element_id } => deleted_element_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{DeletePayload, ErrorPayload, MovePayload, SessionScope};

    fn scope() -> SessionScope {
        SessionScope::new("p", "page", "u")
    }

    #[test]
    fn test_move_response() {
        let response = scope().envelope(Payload::ElementMove(MovePayload {
            element_id: ElementId::from("a"),
            parent_id: Some(ElementId::from("b")),
            order: 2,
        }));

        let result = OperationResult::from_response(EnvelopeType::ElementMove, response);

        assert_eq!(
            result,
            Some(OperationResult::Move {
                element_id: ElementId::from("a"),
                parent_id: Some(ElementId::from("b")),
                order: 2,
            })
        );
    }

    #[test]
    fn test_delete_response() {
        let response = scope().envelope(Payload::ElementDelete(DeletePayload {
            element_id: ElementId::from("gone"),
        }));
        let result = OperationResult::from_response(EnvelopeType::ElementDelete, response)
            .expect("delete result");
        assert_eq!(result.element_id(), &ElementId::from("gone"));
    }

    #[test]
    fn test_mismatched_response() {
        let response = scope().envelope(Payload::Error(ErrorPayload {
            message: "nope".to_string(),
            code: None,
        }));
        assert!(OperationResult::from_response(EnvelopeType::ElementCreate, response).is_none());
    }

    #[test]
    fn test_result_serialization() {
        let result = OperationResult::Delete {
            deleted_element_id: ElementId::from("x"),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["kind"], "delete");
        assert_eq!(value["deletedElementId"], "x");
    }
}
