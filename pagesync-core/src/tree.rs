//! In-memory page tree.
//!
//! Elements are indexed flat by ID; hierarchy lives in ordered child lists so
//! moves and deletes never have to walk nested vectors. Sibling `order` values
//! are renumbered after every structural change.

use std::collections::{HashMap, HashSet};

use crate::element::{ElementId, ElementNode, ElementPatch};
use crate::error::{CoreError, CoreResult};

/// A page's element hierarchy.
#[derive(Debug, Clone, Default)]
pub struct DocumentTree {
    /// All elements, indexed by ID. Stored nodes keep `children` empty.
    nodes: HashMap<ElementId, ElementNode>,
    /// Ordered child IDs per parent.
    children: HashMap<ElementId, Vec<ElementId>>,
    /// Ordered root element IDs.
    roots: Vec<ElementId>,
}

impl DocumentTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a snapshot.
    ///
    /// Accepts nested subtrees, a flat list linked by `parentId`, or a mix.
    /// A node whose parent is nowhere in the snapshot becomes a root.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ElementExists`] if an ID appears twice.
    pub fn from_nodes(nodes: Vec<ElementNode>) -> CoreResult<Self> {
        let mut tree = Self::new();
        let mut pending = nodes;
        pending.sort_by_key(|node| node.order);
        while !pending.is_empty() {
            // Split before inserting so siblings attach in one pass, by order.
            let (ready, mut waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|node| node.parent_id.as_ref().map_or(true, |p| tree.contains(p)));
            if ready.is_empty() {
                let orphan = waiting.remove(0);
                tracing::warn!(id = %orphan.id, parent = ?orphan.parent_id, "Parent missing from snapshot, loading as root");
                tree.insert(orphan, None, None)?;
            }
            for node in ready {
                let parent = node.parent_id.clone();
                tree.insert(node, parent.as_ref(), None)?;
            }
            pending = waiting;
        }
        Ok(tree)
    }

    /// Number of elements in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether an element exists.
    #[must_use]
    pub fn contains(&self, id: &ElementId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Get an element without its children.
    #[must_use]
    pub fn get(&self, id: &ElementId) -> Option<&ElementNode> {
        self.nodes.get(id)
    }

    /// Ordered child IDs of `parent`, or the roots for `None`.
    #[must_use]
    pub fn children_of(&self, parent: Option<&ElementId>) -> &[ElementId] {
        match parent {
            None => &self.roots,
            Some(id) => self.children.get(id).map_or(&[], Vec::as_slice),
        }
    }

    /// Insert a whole subtree under `parent` at `position` (appended when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ElementNotFound`] for an unknown parent and
    /// [`CoreError::ElementExists`] if any ID in the subtree is already present.
    pub fn insert(
        &mut self,
        node: ElementNode,
        parent: Option<&ElementId>,
        position: Option<u32>,
    ) -> CoreResult<()> {
        if let Some(parent_id) = parent {
            if !self.contains(parent_id) {
                return Err(CoreError::ElementNotFound(parent_id.to_string()));
            }
        }
        let mut seen = HashSet::new();
        self.check_new_ids(&node, &mut seen)?;

        let id = node.id.clone();
        self.index_subtree(node, parent.cloned());
        let siblings = self.siblings_mut(parent);
        let index = clamp_position(position, siblings.len());
        siblings.insert(index, id);
        self.renumber(parent);
        Ok(())
    }

    /// Apply a partial update.
    ///
    /// `settings` and `styles` merge key by key. A present `order` repositions
    /// the element among its siblings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ElementNotFound`] if the element does not exist.
    pub fn update(&mut self, id: &ElementId, patch: &ElementPatch) -> CoreResult<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::ElementNotFound(id.to_string()))?;
        let current_order = node.order;
        patch.apply_to(node);
        // Order is structural; the sibling list decides the final value.
        node.order = current_order;
        let parent = node.parent_id.clone();

        if let Some(order) = patch.order {
            let siblings = self.siblings_mut(parent.as_ref());
            siblings.retain(|sibling| sibling != id);
            let index = clamp_position(Some(order), siblings.len());
            siblings.insert(index, id.clone());
            self.renumber(parent.as_ref());
        }
        Ok(())
    }

    /// Reparent and/or reorder an element.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ElementNotFound`] for an unknown element or parent
    /// and [`CoreError::Cycle`] when `new_parent` is the element or one of its
    /// descendants.
    pub fn move_to(
        &mut self,
        id: &ElementId,
        new_parent: Option<&ElementId>,
        order: u32,
    ) -> CoreResult<()> {
        if !self.contains(id) {
            return Err(CoreError::ElementNotFound(id.to_string()));
        }
        if let Some(parent_id) = new_parent {
            if !self.contains(parent_id) {
                return Err(CoreError::ElementNotFound(parent_id.to_string()));
            }
            if self.is_self_or_descendant(parent_id, id) {
                return Err(CoreError::Cycle {
                    element: id.to_string(),
                    parent: parent_id.to_string(),
                });
            }
        }

        let old_parent = self.nodes.get(id).and_then(|node| node.parent_id.clone());
        self.siblings_mut(old_parent.as_ref())
            .retain(|sibling| sibling != id);
        self.renumber(old_parent.as_ref());

        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = new_parent.cloned();
        }
        let siblings = self.siblings_mut(new_parent);
        let index = clamp_position(Some(order), siblings.len());
        siblings.insert(index, id.clone());
        self.renumber(new_parent);
        Ok(())
    }

    /// Remove an element and its whole subtree, returning it nested.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ElementNotFound`] if the element does not exist.
    pub fn remove(&mut self, id: &ElementId) -> CoreResult<ElementNode> {
        let parent = self
            .nodes
            .get(id)
            .ok_or_else(|| CoreError::ElementNotFound(id.to_string()))?
            .parent_id
            .clone();
        self.siblings_mut(parent.as_ref())
            .retain(|sibling| sibling != id);
        self.renumber(parent.as_ref());
        self.take_subtree(id)
            .ok_or_else(|| CoreError::ElementNotFound(id.to_string()))
    }

    /// Rebuild the nested representation, roots in order.
    #[must_use]
    pub fn to_nodes(&self) -> Vec<ElementNode> {
        self.roots
            .iter()
            .filter_map(|id| self.build_subtree(id))
            .collect()
    }

    fn check_new_ids<'a>(
        &self,
        node: &'a ElementNode,
        seen: &mut HashSet<&'a ElementId>,
    ) -> CoreResult<()> {
        if self.contains(&node.id) || !seen.insert(&node.id) {
            return Err(CoreError::ElementExists(node.id.to_string()));
        }
        node.children
            .iter()
            .try_for_each(|child| self.check_new_ids(child, seen))
    }

    fn index_subtree(&mut self, mut node: ElementNode, parent: Option<ElementId>) {
        let mut children = std::mem::take(&mut node.children);
        children.sort_by_key(|child| child.order);
        node.parent_id = parent;
        let id = node.id.clone();

        let mut child_ids = Vec::with_capacity(children.len());
        for (index, mut child) in children.into_iter().enumerate() {
            child.order = u32::try_from(index).unwrap_or(u32::MAX);
            child_ids.push(child.id.clone());
            self.index_subtree(child, Some(id.clone()));
        }
        if !child_ids.is_empty() {
            self.children.insert(id.clone(), child_ids);
        }
        self.nodes.insert(id, node);
    }

    fn take_subtree(&mut self, id: &ElementId) -> Option<ElementNode> {
        let mut node = self.nodes.remove(id)?;
        let child_ids = self.children.remove(id).unwrap_or_default();
        node.children = child_ids
            .iter()
            .filter_map(|child| self.take_subtree(child))
            .collect();
        Some(node)
    }

    fn build_subtree(&self, id: &ElementId) -> Option<ElementNode> {
        let mut node = self.nodes.get(id)?.clone();
        node.children = self
            .children_of(Some(id))
            .iter()
            .filter_map(|child| self.build_subtree(child))
            .collect();
        Some(node)
    }

    /// Walk up from `candidate`; true if `ancestor` is reached.
    fn is_self_or_descendant(&self, candidate: &ElementId, ancestor: &ElementId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|node| node.parent_id.as_ref());
        }
        false
    }

    fn siblings_mut(&mut self, parent: Option<&ElementId>) -> &mut Vec<ElementId> {
        match parent {
            None => &mut self.roots,
            Some(id) => self.children.entry(id.clone()).or_default(),
        }
    }

    fn renumber(&mut self, parent: Option<&ElementId>) {
        let ids = self.children_of(parent).to_vec();
        for (index, id) in ids.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.order = u32::try_from(index).unwrap_or(u32::MAX);
            }
        }
        if let Some(parent_id) = parent {
            if ids.is_empty() {
                self.children.remove(parent_id);
            }
        }
    }
}

fn clamp_position(position: Option<u32>, len: usize) -> usize {
    position.map_or(len, |p| usize::try_from(p).unwrap_or(usize::MAX).min(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> ElementId {
        ElementId::from(s)
    }

    fn sample_tree() -> DocumentTree {
        let section = ElementNode::with_id("s", "Section")
            .with_child(ElementNode::with_id("t1", "Text"))
            .with_child(ElementNode::with_id("t2", "Text"));
        let mut footer = ElementNode::with_id("f", "Footer");
        footer.order = 1;
        DocumentTree::from_nodes(vec![footer, section]).expect("build")
    }

    #[test]
    fn test_from_nodes_orders_roots() {
        let tree = sample_tree();
        assert_eq!(tree.children_of(None), &[id("s"), id("f")]);
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.get(&id("t2")).map(|n| n.order), Some(1));
        assert_eq!(tree.get(&id("t2")).and_then(|n| n.parent_id.clone()), Some(id("s")));
    }

    #[test]
    fn test_from_nodes_links_flat_list_by_parent() {
        let mut text = ElementNode::with_id("t", "Text");
        text.parent_id = Some(id("col"));
        let mut column = ElementNode::with_id("col", "Column");
        column.parent_id = Some(id("s"));
        let mut second = ElementNode::with_id("t2", "Text");
        second.parent_id = Some(id("col"));
        second.order = 1;
        let mut stray = ElementNode::with_id("x", "Image");
        stray.parent_id = Some(id("missing"));

        let tree = DocumentTree::from_nodes(vec![
            second,
            text,
            stray,
            column,
            ElementNode::with_id("s", "Section"),
        ])
        .expect("build");

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.children_of(Some(&id("s"))), &[id("col")]);
        assert_eq!(tree.children_of(Some(&id("col"))), &[id("t"), id("t2")]);
        assert_eq!(tree.children_of(None), &[id("s"), id("x")]);
        assert_eq!(tree.get(&id("x")).and_then(|n| n.parent_id.clone()), None);
    }

    #[test]
    fn test_insert_subtree_at_position() {
        let mut tree = sample_tree();
        let column = ElementNode::with_id("c", "Column").with_child(ElementNode::with_id("img", "Image"));

        tree.insert(column, Some(&id("s")), Some(1)).expect("insert");

        assert_eq!(tree.children_of(Some(&id("s"))), &[id("t1"), id("c"), id("t2")]);
        assert_eq!(tree.get(&id("t2")).map(|n| n.order), Some(2));
        assert_eq!(tree.children_of(Some(&id("c"))), &[id("img")]);
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn test_insert_duplicate_id_rejected_atomically() {
        let mut tree = sample_tree();
        let dup = ElementNode::with_id("new", "Column").with_child(ElementNode::with_id("t1", "Text"));

        let err = tree.insert(dup, None, None).unwrap_err();

        assert!(matches!(err, CoreError::ElementExists(ref x) if x == "t1"));
        assert!(!tree.contains(&id("new")));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_insert_unknown_parent() {
        let mut tree = sample_tree();
        let err = tree
            .insert(ElementNode::with_id("x", "Text"), Some(&id("ghost")), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::ElementNotFound(_)));
    }

    #[test]
    fn test_update_merges_and_reorders() {
        let mut tree = sample_tree();
        let patch = ElementPatch::default()
            .style("color", json!("red"))
            .content("Hello");
        let patch = ElementPatch {
            order: Some(0),
            ..patch
        };

        tree.update(&id("t2"), &patch).expect("update");

        let t2 = tree.get(&id("t2")).expect("t2");
        assert_eq!(t2.styles["color"], "red");
        assert_eq!(t2.content.as_deref(), Some("Hello"));
        assert_eq!(tree.children_of(Some(&id("s"))), &[id("t2"), id("t1")]);
        assert_eq!(tree.get(&id("t1")).map(|n| n.order), Some(1));
    }

    #[test]
    fn test_move_across_parents() {
        let mut tree = sample_tree();

        tree.move_to(&id("t1"), Some(&id("f")), 0).expect("move");

        assert_eq!(tree.children_of(Some(&id("s"))), &[id("t2")]);
        assert_eq!(tree.get(&id("t2")).map(|n| n.order), Some(0));
        assert_eq!(tree.children_of(Some(&id("f"))), &[id("t1")]);
        assert_eq!(tree.get(&id("t1")).and_then(|n| n.parent_id.clone()), Some(id("f")));
    }

    #[test]
    fn test_move_to_root_clamps_order() {
        let mut tree = sample_tree();
        tree.move_to(&id("t1"), None, 99).expect("move");
        assert_eq!(tree.children_of(None), &[id("s"), id("f"), id("t1")]);
        assert_eq!(tree.get(&id("t1")).map(|n| n.order), Some(2));
    }

    #[test]
    fn test_move_under_descendant_rejected() {
        let mut tree = sample_tree();

        let err = tree.move_to(&id("s"), Some(&id("t1")), 0).unwrap_err();
        assert!(matches!(err, CoreError::Cycle { .. }));
        let err = tree.move_to(&id("s"), Some(&id("s")), 0).unwrap_err();
        assert!(matches!(err, CoreError::Cycle { .. }));

        // Tree untouched.
        assert_eq!(tree.children_of(None), &[id("s"), id("f")]);
        assert_eq!(tree.children_of(Some(&id("s"))), &[id("t1"), id("t2")]);
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = sample_tree();

        let removed = tree.remove(&id("s")).expect("remove");

        assert_eq!(removed.subtree_len(), 3);
        assert_eq!(tree.len(), 1);
        assert!(!tree.contains(&id("t1")));
        assert_eq!(tree.children_of(None), &[id("f")]);
        assert_eq!(tree.get(&id("f")).map(|n| n.order), Some(0));
    }

    #[test]
    fn test_to_nodes_round_trips_structure() {
        let tree = sample_tree();
        let nodes = tree.to_nodes();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, id("s"));
        assert_eq!(nodes[0].children.len(), 2);
        assert_eq!(nodes[0].children[1].id, id("t2"));
        assert!(nodes[1].children.is_empty());
    }
}
