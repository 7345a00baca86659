//! Page elements - the nodes of the shared document tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique identifier for an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Create a new unique element ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node of the page tree, carrying its whole subtree.
///
/// Optional content fields are omitted on the wire when absent, and an empty
/// `children` list is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    /// Unique identifier.
    pub id: ElementId,
    /// Element type name, e.g. `Section`, `Text`, `Image`.
    #[serde(rename = "type")]
    pub element_type: String,
    /// Behavioural settings.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Visual styles.
    #[serde(default)]
    pub styles: Map<String, Value>,
    /// Position among siblings.
    #[serde(default)]
    pub order: u32,
    /// Parent element, `None` for page roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Display name in the layer panel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Media source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Link target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Child elements, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementNode>,
}

impl ElementNode {
    /// Create a new element of the given type with a fresh ID.
    #[must_use]
    pub fn new(element_type: impl Into<String>) -> Self {
        Self::with_id(ElementId::new(), element_type)
    }

    /// Create a new element with an explicit ID.
    #[must_use]
    pub fn with_id(id: impl Into<ElementId>, element_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            element_type: element_type.into(),
            settings: Map::new(),
            styles: Map::new(),
            order: 0,
            parent_id: None,
            content: None,
            name: None,
            src: None,
            href: None,
            children: Vec::new(),
        }
    }

    /// Set the text content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set a single style property.
    #[must_use]
    pub fn with_style(mut self, key: impl Into<String>, value: Value) -> Self {
        self.styles.insert(key.into(), value);
        self
    }

    /// Set a single settings property.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Append a child; its order becomes its index.
    #[must_use]
    pub fn with_child(mut self, mut child: ElementNode) -> Self {
        child.order = u32::try_from(self.children.len()).unwrap_or(u32::MAX);
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        self
    }

    /// Point this node at `parent` and every descendant at its direct parent.
    pub fn link_subtree(&mut self, parent: Option<ElementId>) {
        self.parent_id = parent;
        let id = self.id.clone();
        for child in &mut self.children {
            child.link_subtree(Some(id.clone()));
        }
    }

    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
    }

    /// Find a node by ID anywhere in this subtree.
    #[must_use]
    pub fn find(&self, id: &ElementId) -> Option<&ElementNode> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// A partial element update. Only present fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementPatch {
    /// Settings keys to merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
    /// Style keys to merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Map<String, Value>>,
    /// New sibling position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    /// New text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New media source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// New link target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl ElementPatch {
    /// Whether the patch carries no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.is_none()
            && self.styles.is_none()
            && self.order.is_none()
            && self.content.is_none()
            && self.name.is_none()
            && self.src.is_none()
            && self.href.is_none()
    }

    /// Set one style key.
    #[must_use]
    pub fn style(mut self, key: impl Into<String>, value: Value) -> Self {
        self.styles
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Set one settings key.
    #[must_use]
    pub fn setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Set the text content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Apply the patch to a node. `settings` and `styles` are merged key by
    /// key; every other present field replaces the current value.
    pub fn apply_to(&self, node: &mut ElementNode) {
        if let Some(settings) = &self.settings {
            for (key, value) in settings {
                node.settings.insert(key.clone(), value.clone());
            }
        }
        if let Some(styles) = &self.styles {
            for (key, value) in styles {
                node.styles.insert(key.clone(), value.clone());
            }
        }
        if let Some(order) = self.order {
            node.order = order;
        }
        if let Some(content) = &self.content {
            node.content = Some(content.clone());
        }
        if let Some(name) = &self.name {
            node.name = Some(name.clone());
        }
        if let Some(src) = &self.src {
            node.src = Some(src.clone());
        }
        if let Some(href) = &self.href {
            node.href = Some(href.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_id_unique() {
        assert_ne!(ElementId::new(), ElementId::new());
    }

    #[test]
    fn test_node_omits_absent_optionals() {
        let node = ElementNode::with_id("a", "Section");
        let value = serde_json::to_value(&node).expect("serialize");

        assert_eq!(value["id"], "a");
        assert_eq!(value["type"], "Section");
        assert!(value.get("content").is_none());
        assert!(value.get("parentId").is_none());
        assert!(value.get("children").is_none());
    }

    #[test]
    fn test_node_parses_minimal_json() {
        let node: ElementNode =
            serde_json::from_value(json!({"id": "t1", "type": "Text", "content": "hi"}))
                .expect("parse");

        assert_eq!(node.id.as_str(), "t1");
        assert_eq!(node.content.as_deref(), Some("hi"));
        assert!(node.settings.is_empty());
        assert_eq!(node.order, 0);
    }

    #[test]
    fn test_with_child_sets_order_and_parent() {
        let node = ElementNode::with_id("root", "Section")
            .with_child(ElementNode::with_id("c1", "Text"))
            .with_child(ElementNode::with_id("c2", "Text"));

        assert_eq!(node.children[1].order, 1);
        assert_eq!(node.children[1].parent_id, Some(ElementId::from("root")));
    }

    #[test]
    fn test_link_subtree_rewrites_parents() {
        let mut grandchild = ElementNode::with_id("g", "Text");
        grandchild.parent_id = Some(ElementId::from("wrong"));
        let mut child = ElementNode::with_id("c", "Column");
        child.children.push(grandchild);
        let mut root = ElementNode::with_id("r", "Section");
        root.children.push(child);

        root.link_subtree(Some(ElementId::from("page")));

        assert_eq!(root.parent_id, Some(ElementId::from("page")));
        let g = root.find(&ElementId::from("g")).expect("grandchild");
        assert_eq!(g.parent_id, Some(ElementId::from("c")));
        assert_eq!(root.subtree_len(), 3);
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = ElementPatch::default().content("new");
        let value = serde_json::to_value(&patch).expect("serialize");

        assert_eq!(value, json!({"content": "new"}));
        assert!(ElementPatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patch_merges_styles() {
        let mut node = ElementNode::with_id("a", "Text")
            .with_style("color", json!("red"))
            .with_style("margin", json!(4));
        let patch = ElementPatch::default().style("color", json!("blue"));

        patch.apply_to(&mut node);

        assert_eq!(node.styles["color"], "blue");
        assert_eq!(node.styles["margin"], 4);
    }
}
