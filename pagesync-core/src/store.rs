//! Document store interface and a shared in-memory implementation.
//!
//! The session client never owns the document tree; it applies
//! server-confirmed mutations through [`DocumentStore`]. [`SharedDocument`]
//! is a thread-safe [`DocumentTree`] that can be handed to a session and read
//! from the UI side at the same time.

use std::sync::{Arc, RwLock};

use crate::element::{ElementId, ElementNode, ElementPatch};
use crate::error::CoreResult;
use crate::tree::DocumentTree;

/// Receiver of remote structural mutations.
///
/// Remote mutations are authoritative; an implementation that cannot apply
/// one should log and keep its current state rather than fail the session.
pub trait DocumentStore: Send + Sync {
    /// Replace the whole element list with a server snapshot.
    fn load_elements(&self, elements: Vec<ElementNode>);

    /// Insert a subtree created by another client.
    fn remote_add(&self, element: ElementNode, parent_id: Option<&ElementId>, position: Option<u32>);

    /// Apply a partial update made by another client.
    fn remote_update(&self, element_id: &ElementId, updates: &ElementPatch);

    /// Apply a move made by another client.
    fn remote_move(&self, element_id: &ElementId, parent_id: Option<&ElementId>, order: u32);

    /// Apply a delete made by another client.
    fn remote_delete(&self, element_id: &ElementId);
}

/// Thread-safe document tree shared between a session and its readers.
#[derive(Debug, Clone, Default)]
pub struct SharedDocument {
    tree: Arc<RwLock<DocumentTree>>,
}

impl SharedDocument {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Nested snapshot of the current tree.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ElementNode> {
        self.read(DocumentTree::to_nodes)
    }

    /// Look up one element (without children).
    #[must_use]
    pub fn get(&self, id: &ElementId) -> Option<ElementNode> {
        self.read(|tree| tree.get(id).cloned())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(DocumentTree::len)
    }

    /// Whether the document is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read(DocumentTree::is_empty)
    }

    /// Run `f` against the tree under the write lock.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn update<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut DocumentTree) -> CoreResult<T>,
    {
        let mut tree = self
            .tree
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut tree)
    }

    fn read<T>(&self, f: impl FnOnce(&DocumentTree) -> T) -> T {
        let tree = self
            .tree
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&tree)
    }

    fn apply(&self, operation: &str, element_id: &ElementId, result: CoreResult<()>) {
        if let Err(e) = result {
            tracing::warn!(%element_id, operation, "Remote mutation not applied: {e}");
        }
    }
}

impl DocumentStore for SharedDocument {
    fn load_elements(&self, elements: Vec<ElementNode>) {
        // Build off to the side so a bad snapshot leaves the current tree intact.
        match DocumentTree::from_nodes(elements) {
            Ok(fresh) => {
                let count = fresh.len();
                let _ = self.update(|tree| {
                    *tree = fresh;
                    Ok(())
                });
                tracing::debug!(count, "Loaded page snapshot");
            }
            Err(e) => tracing::warn!("Rejected page snapshot: {e}"),
        }
    }

    fn remote_add(&self, element: ElementNode, parent_id: Option<&ElementId>, position: Option<u32>) {
        let id = element.id.clone();
        let result = self.update(|tree| tree.insert(element, parent_id, position));
        self.apply("add", &id, result);
    }

    fn remote_update(&self, element_id: &ElementId, updates: &ElementPatch) {
        let result = self.update(|tree| tree.update(element_id, updates));
        self.apply("update", element_id, result);
    }

    fn remote_move(&self, element_id: &ElementId, parent_id: Option<&ElementId>, order: u32) {
        let result = self.update(|tree| tree.move_to(element_id, parent_id, order));
        self.apply("move", element_id, result);
    }

    fn remote_delete(&self, element_id: &ElementId) {
        let result = self.update(|tree| tree.remove(element_id).map(|_| ()));
        self.apply("delete", element_id, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> ElementId {
        ElementId::from(s)
    }

    #[test]
    fn test_load_replaces_tree() {
        let doc = SharedDocument::new();
        doc.load_elements(vec![ElementNode::with_id("old", "Section")]);
        doc.load_elements(vec![
            ElementNode::with_id("a", "Section").with_child(ElementNode::with_id("b", "Text")),
        ]);

        assert_eq!(doc.len(), 2);
        assert!(doc.get(&id("old")).is_none());
        assert_eq!(doc.snapshot()[0].children[0].id, id("b"));
    }

    #[test]
    fn test_bad_snapshot_keeps_current_tree() {
        let doc = SharedDocument::new();
        doc.load_elements(vec![ElementNode::with_id("keep", "Section")]);

        doc.load_elements(vec![
            ElementNode::with_id("dup", "Section"),
            ElementNode::with_id("dup", "Section"),
        ]);

        assert_eq!(doc.len(), 1);
        assert!(doc.get(&id("keep")).is_some());
    }

    #[test]
    fn test_remote_mutations() {
        let doc = SharedDocument::new();
        doc.remote_add(ElementNode::with_id("s", "Section"), None, None);
        doc.remote_add(ElementNode::with_id("t", "Text"), Some(&id("s")), Some(0));
        doc.remote_update(&id("t"), &ElementPatch::default().style("color", json!("red")));

        let t = doc.get(&id("t")).expect("t");
        assert_eq!(t.parent_id, Some(id("s")));
        assert_eq!(t.styles["color"], "red");

        doc.remote_move(&id("t"), None, 0);
        assert_eq!(doc.snapshot()[0].id, id("t"));

        doc.remote_delete(&id("s"));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_invalid_remote_mutation_is_ignored() {
        let doc = SharedDocument::new();
        doc.remote_add(ElementNode::with_id("s", "Section"), None, None);

        doc.remote_delete(&id("ghost"));
        doc.remote_move(&id("s"), Some(&id("s")), 0);
        doc.remote_add(ElementNode::with_id("x", "Text"), Some(&id("ghost")), None);

        assert_eq!(doc.len(), 1);
        assert_eq!(doc.snapshot()[0].id, id("s"));
    }
}
