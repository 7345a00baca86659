//! Typed element operations on top of the request coordinator.

use std::future::Future;

use pagesync_core::{
    CreatePayload, DeletePayload, ElementId, ElementNode, ElementPatch, MovePayload,
    OperationResult, Payload, SessionScope, UpdatePayload,
};

use crate::error::{SessionError, SessionResult};
use crate::request::RequestCoordinator;

/// Builds structural requests and interprets their responses.
///
/// Every method registers its request before returning, so the operation is
/// in flight (or queued) even if the returned future is never polled.
#[derive(Clone)]
pub struct OperationBuilder {
    scope: SessionScope,
    coordinator: RequestCoordinator,
}

impl OperationBuilder {
    /// Create a builder stamping envelopes with `scope`.
    #[must_use]
    pub fn new(scope: SessionScope, coordinator: RequestCoordinator) -> Self {
        Self { scope, coordinator }
    }

    /// Create `node` and its whole subtree in one round trip.
    ///
    /// Parent links are rewritten through the subtree before sending; child
    /// order stays as given.
    pub fn create_element(
        &self,
        mut node: ElementNode,
        parent_id: Option<ElementId>,
        position: Option<u32>,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        node.link_subtree(parent_id.clone());
        if let Some(position) = position {
            node.order = position;
        }
        self.submit(Payload::ElementCreate(CreatePayload {
            element: node,
            parent_id,
            position,
        }))
    }

    /// Send the fields present in `updates`. Merging `settings` and `styles`
    /// is left to the receiving store.
    pub fn update_element(
        &self,
        element_id: ElementId,
        updates: ElementPatch,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.submit(Payload::ElementUpdate(UpdatePayload {
            element_id,
            updates,
        }))
    }

    /// Delete an element and its subtree.
    pub fn delete_element(
        &self,
        element_id: ElementId,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.submit(Payload::ElementDelete(DeletePayload { element_id }))
    }

    /// Move an element under `new_parent_id` (`None` for the page root) at
    /// sibling index `new_position`.
    pub fn move_element(
        &self,
        element_id: ElementId,
        new_parent_id: Option<ElementId>,
        new_position: u32,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        self.submit(Payload::ElementMove(MovePayload {
            element_id,
            parent_id: new_parent_id,
            order: new_position,
        }))
    }

    fn submit(
        &self,
        payload: Payload,
    ) -> impl Future<Output = SessionResult<OperationResult>> + Send + 'static {
        let expected = payload.kind();
        let request_id = self.coordinator.generate_request_id();
        let response = self.coordinator.send_request(
            self.scope.envelope(payload),
            request_id,
            self.coordinator.default_timeout(),
        );
        async move {
            let envelope = response.await?;
            let received = envelope.kind();
            OperationResult::from_response(expected, envelope).ok_or_else(|| {
                SessionError::UnexpectedResponse(format!("expected {expected}, got {received}"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::connection::{ConnectionManager, StaticToken};
    use pagesync_core::{Envelope, RequestId};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn offline_builder() -> (OperationBuilder, RequestCoordinator) {
        let config = SessionConfig::new("ws://127.0.0.1:9", "proj", "home").with_user("u1", "Ada");
        let (connection, _events) = ConnectionManager::new(&config, Arc::new(StaticToken::new("t")));
        let coordinator =
            RequestCoordinator::new(connection, Duration::from_secs(10), 100, None);
        (
            OperationBuilder::new(config.scope(), coordinator.clone()),
            coordinator,
        )
    }

    fn response(payload: Payload) -> Envelope {
        SessionScope::new("proj", "home", "server").envelope(payload)
    }

    #[tokio::test]
    async fn test_registers_before_poll() {
        let (builder, coordinator) = offline_builder();
        let _future = builder.delete_element("a".into());
        assert_eq!(coordinator.pending_count(), 1);
        assert_eq!(coordinator.queued_count(), 1);
    }

    #[tokio::test]
    async fn test_create_resolves_with_server_element() {
        let (builder, coordinator) = offline_builder();
        let node = ElementNode::with_id("a", "Section")
            .with_child(ElementNode::with_id("b", "Text").with_content("Hi"));
        let future = builder.create_element(node, None, Some(2));

        let mut stored = ElementNode::with_id("a", "Section");
        stored.order = 2;
        assert!(coordinator.resolve_pending_request(
            &RequestId::from(1),
            Ok(response(Payload::ElementCreate(CreatePayload {
                element: stored.clone(),
                parent_id: None,
                position: Some(2),
            }))),
        ));

        let result = future.await.expect("created");
        assert_eq!(result, OperationResult::Create { element: stored });
    }

    #[tokio::test]
    async fn test_update_resolves() {
        let (builder, coordinator) = offline_builder();
        let patch = ElementPatch::default().style("color", json!("red"));
        let future = builder.update_element("a".into(), patch.clone());

        coordinator.resolve_pending_request(
            &RequestId::from(1),
            Ok(response(Payload::ElementUpdate(UpdatePayload {
                element_id: "a".into(),
                updates: patch,
            }))),
        );

        assert_eq!(
            future.await.expect("updated"),
            OperationResult::Update {
                element_id: "a".into()
            }
        );
    }

    #[tokio::test]
    async fn test_move_resolves() {
        let (builder, coordinator) = offline_builder();
        let future = builder.move_element("a".into(), Some("root".into()), 0);

        coordinator.resolve_pending_request(
            &RequestId::from(1),
            Ok(response(Payload::ElementMove(MovePayload {
                element_id: "a".into(),
                parent_id: Some("root".into()),
                order: 0,
            }))),
        );

        assert_eq!(
            future.await.expect("moved"),
            OperationResult::Move {
                element_id: "a".into(),
                parent_id: Some("root".into()),
                order: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_mismatched_response_is_unexpected() {
        let (builder, coordinator) = offline_builder();
        let future = builder.delete_element("a".into());

        coordinator.resolve_pending_request(
            &RequestId::from(1),
            Ok(response(Payload::ElementUpdate(UpdatePayload {
                element_id: "a".into(),
                updates: ElementPatch::default(),
            }))),
        );

        let err = future.await.expect_err("wrong type");
        assert!(matches!(err, SessionError::UnexpectedResponse(msg) if msg.contains("element:delete")));
    }

    #[tokio::test]
    async fn test_rejection_propagates() {
        let (builder, coordinator) = offline_builder();
        let future = builder.delete_element("a".into());

        coordinator.resolve_pending_request(
            &RequestId::from(1),
            Err(SessionError::Server {
                message: "conflict".into(),
                code: None,
            }),
        );

        assert!(matches!(
            future.await,
            Err(SessionError::Server { message, .. }) if message == "conflict"
        ));
    }
}
