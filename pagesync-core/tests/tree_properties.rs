//! Structural invariants of the document tree under random edit sequences.

use pagesync_core::{DocumentTree, ElementId, ElementNode, ElementPatch};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Edit {
    Insert { parent: usize, position: Option<u32> },
    Move { element: usize, parent: Option<usize>, order: u32 },
    Reorder { element: usize, order: u32 },
    Remove { element: usize },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (any::<usize>(), proptest::option::of(0u32..6))
            .prop_map(|(parent, position)| Edit::Insert { parent, position }),
        2 => (any::<usize>(), proptest::option::of(any::<usize>()), 0u32..6)
            .prop_map(|(element, parent, order)| Edit::Move { element, parent, order }),
        1 => (any::<usize>(), 0u32..6).prop_map(|(element, order)| Edit::Reorder { element, order }),
        1 => any::<usize>().prop_map(|element| Edit::Remove { element }),
    ]
}

/// Every ID currently in the tree, in a stable order.
fn ids(tree: &DocumentTree) -> Vec<ElementId> {
    fn walk(node: &ElementNode, out: &mut Vec<ElementId>) {
        out.push(node.id.clone());
        node.children.iter().for_each(|child| walk(child, out));
    }
    let mut out = Vec::new();
    tree.to_nodes().iter().for_each(|node| walk(node, &mut out));
    out
}

fn pick(ids: &[ElementId], index: usize) -> Option<ElementId> {
    (!ids.is_empty()).then(|| ids[index % ids.len()].clone())
}

fn assert_consistent(tree: &DocumentTree) {
    fn check(node: &ElementNode, parent: Option<&ElementId>, index: usize, seen: &mut usize) {
        *seen += 1;
        assert_eq!(node.parent_id.as_ref(), parent, "parent link of {}", node.id);
        assert_eq!(node.order as usize, index, "order of {}", node.id);
        for (i, child) in node.children.iter().enumerate() {
            check(child, Some(&node.id), i, seen);
        }
    }
    let mut seen = 0;
    for (i, root) in tree.to_nodes().iter().enumerate() {
        check(root, None, i, &mut seen);
    }
    assert_eq!(seen, tree.len());
}

proptest! {
    #[test]
    fn prop_random_edits_keep_tree_consistent(edits in proptest::collection::vec(edit(), 1..40)) {
        let mut tree = DocumentTree::new();
        let mut next = 0u32;

        for edit in edits {
            let current = ids(&tree);
            // Failures such as cycles are expected; the tree must stay intact either way.
            let _ = match edit {
                Edit::Insert { parent, position } => {
                    next += 1;
                    let node = ElementNode::with_id(format!("n{next}"), "Box");
                    let parent = if parent % 3 == 0 { None } else { pick(&current, parent) };
                    tree.insert(node, parent.as_ref(), position)
                }
                Edit::Move { element, parent, order } => match pick(&current, element) {
                    Some(id) => {
                        let parent = parent.and_then(|p| pick(&current, p));
                        tree.move_to(&id, parent.as_ref(), order)
                    }
                    None => Ok(()),
                },
                Edit::Reorder { element, order } => match pick(&current, element) {
                    Some(id) => tree.update(&id, &ElementPatch { order: Some(order), ..ElementPatch::default() }),
                    None => Ok(()),
                },
                Edit::Remove { element } => match pick(&current, element) {
                    Some(id) => tree.remove(&id).map(|_| ()),
                    None => Ok(()),
                },
            };
            assert_consistent(&tree);
        }
    }
}
