//! Hierarchical layer model for the layers panel.
//!
//! The tree is a UI-facing view over the canvas object graph: object layers
//! carry a weak string reference (`object_ref`) to a live canvas object,
//! while groups are a pure view construct with no canvas-level stacking
//! semantics of their own.  Sequence order at a given nesting level mirrors
//! paint order for object layers (index 0 is painted first, i.e. bottom).

pub mod persist;
pub mod reducer;
pub mod sync;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// LAYER NODES
// ============================================================================

/// A single canvas object as seen by the layers panel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectLayer {
    pub id: String,
    pub name: String,
    /// Display kind derived from the canvas object ("Text", "Image", ...).
    pub kind: String,
    pub visible: bool,
    pub editable: bool,
    /// Paint-order position at the time of the last rebuild.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<usize>,
    /// Weak key into the canvas object graph.  The canvas owns the object;
    /// reconciliation drops layers whose referent is gone.
    pub object_ref: String,
}

/// A named, collapsible collection of layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupLayer {
    pub id: String,
    pub name: String,
    pub visible: bool,
    pub editable: bool,
    pub expanded: bool,
    pub children: Vec<LayerNode>,
}

/// Node of the layer tree.  Both variants share one id namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum LayerNode {
    Object(ObjectLayer),
    Group(GroupLayer),
}

impl LayerNode {
    pub fn id(&self) -> &str {
        match self {
            LayerNode::Object(o) => &o.id,
            LayerNode::Group(g) => &g.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LayerNode::Object(o) => &o.name,
            LayerNode::Group(g) => &g.name,
        }
    }

    pub fn is_visible(&self) -> bool {
        match self {
            LayerNode::Object(o) => o.visible,
            LayerNode::Group(g) => g.visible,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, LayerNode::Group(_))
    }
}

// ============================================================================
// PURE TREE UTILITIES
// ============================================================================

/// Depth-first lookup: direct children of a level are checked before
/// descending into nested groups.  Ids are unique, so first match wins.
pub fn find_by_id<'a>(nodes: &'a [LayerNode], id: &str) -> Option<&'a LayerNode> {
    for node in nodes {
        if node.id() == id {
            return Some(node);
        }
    }
    for node in nodes {
        if let LayerNode::Group(group) = node
            && let Some(found) = find_by_id(&group.children, id)
        {
            return Some(found);
        }
    }
    None
}

/// Copy-on-write update of the node with the given id, at any depth.
/// An unknown id returns the input unchanged.
pub fn update_by_id(
    nodes: Vec<LayerNode>,
    id: &str,
    updater: &dyn Fn(LayerNode) -> LayerNode,
) -> Vec<LayerNode> {
    nodes
        .into_iter()
        .map(|node| {
            if node.id() == id {
                updater(node)
            } else if let LayerNode::Group(mut group) = node {
                group.children = update_by_id(group.children, id, updater);
                LayerNode::Group(group)
            } else {
                node
            }
        })
        .collect()
}

/// Remove the node with the given id at whatever depth it occurs.  Groups
/// emptied by the removal are pruned in the same pass.  Unknown id: input
/// unchanged.
pub fn delete_by_id(nodes: Vec<LayerNode>, id: &str) -> Vec<LayerNode> {
    nodes
        .into_iter()
        .filter_map(|node| {
            if node.id() == id {
                return None;
            }
            if let LayerNode::Group(mut group) = node {
                group.children = delete_by_id(group.children, id);
                if group.children.is_empty() {
                    return None;
                }
                return Some(LayerNode::Group(group));
            }
            Some(node)
        })
        .collect()
}

/// Swap a node with its previous sibling at the same nesting level.
/// No-op when the node is first at its level or the id is absent; moves
/// never promote or demote across nesting.
pub fn move_up(nodes: Vec<LayerNode>, id: &str) -> Vec<LayerNode> {
    move_within_level(nodes, id, -1)
}

/// Swap a node with its next sibling at the same nesting level.
pub fn move_down(nodes: Vec<LayerNode>, id: &str) -> Vec<LayerNode> {
    move_within_level(nodes, id, 1)
}

fn move_within_level(mut nodes: Vec<LayerNode>, id: &str, dir: i32) -> Vec<LayerNode> {
    if let Some(pos) = nodes.iter().position(|n| n.id() == id) {
        let target = pos as i64 + dir as i64;
        if target >= 0 && (target as usize) < nodes.len() {
            nodes.swap(pos, target as usize);
        }
        return nodes;
    }
    nodes
        .into_iter()
        .map(|node| {
            if let LayerNode::Group(mut group) = node {
                group.children = move_within_level(group.children, id, dir);
                LayerNode::Group(group)
            } else {
                node
            }
        })
        .collect()
}

/// Build a new group around the given children.  The group always starts
/// expanded and visible regardless of what its members carry.
pub fn create_group(children: Vec<LayerNode>, name: String) -> GroupLayer {
    GroupLayer {
        id: Uuid::new_v4().to_string(),
        name,
        visible: true,
        editable: true,
        expanded: true,
        children,
    }
}

/// Rewrite the visibility flag of every descendant of a group, recursively.
/// The cascade is parent→children only; nothing aggregates back up.
pub fn set_children_visibility(mut group: GroupLayer, visible: bool) -> GroupLayer {
    group.children = group
        .children
        .into_iter()
        .map(|child| match child {
            LayerNode::Object(mut o) => {
                o.visible = visible;
                LayerNode::Object(o)
            }
            LayerNode::Group(mut g) => {
                g.visible = visible;
                LayerNode::Group(set_children_visibility(g, visible))
            }
        })
        .collect();
    group
}

/// Pull every node whose id is in `ids` out of the tree, at any depth, in
/// tree order.  Parent groups emptied by the extraction are pruned.
/// Returns (remaining tree, extracted nodes).
pub fn extract_by_ids(nodes: Vec<LayerNode>, ids: &[String]) -> (Vec<LayerNode>, Vec<LayerNode>) {
    let mut remaining = Vec::with_capacity(nodes.len());
    let mut extracted = Vec::new();
    for node in nodes {
        if ids.iter().any(|id| id == node.id()) {
            extracted.push(node);
            continue;
        }
        if let LayerNode::Group(mut group) = node {
            let (kept, inner) = extract_by_ids(group.children, ids);
            extracted.extend(inner);
            group.children = kept;
            if group.children.is_empty() {
                continue;
            }
            remaining.push(LayerNode::Group(group));
        } else {
            remaining.push(node);
        }
    }
    (remaining, extracted)
}

/// All ids in the tree, depth-first.  Used by invariant checks and the
/// snapshot merge.
pub fn collect_ids(nodes: &[LayerNode]) -> Vec<String> {
    let mut out = Vec::new();
    for node in nodes {
        out.push(node.id().to_string());
        if let LayerNode::Group(group) = node {
            out.extend(collect_ids(&group.children));
        }
    }
    out
}

/// Object ids referenced anywhere in the tree (the `object_ref` keys).
pub fn collect_object_refs(nodes: &[LayerNode]) -> Vec<String> {
    let mut out = Vec::new();
    for node in nodes {
        match node {
            LayerNode::Object(o) => out.push(o.object_ref.clone()),
            LayerNode::Group(g) => out.extend(collect_object_refs(&g.children)),
        }
    }
    out
}

/// Top-level groups of the tree, cloned.  This is the persisted subset.
pub fn collect_groups(nodes: &[LayerNode]) -> Vec<GroupLayer> {
    nodes
        .iter()
        .filter_map(|node| match node {
            LayerNode::Group(g) => Some(g.clone()),
            LayerNode::Object(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str) -> LayerNode {
        LayerNode::Object(ObjectLayer {
            id: id.to_string(),
            name: id.to_string(),
            kind: "Rectangle".to_string(),
            visible: true,
            editable: true,
            z_index: None,
            object_ref: id.to_string(),
        })
    }

    fn group(id: &str, children: Vec<LayerNode>) -> LayerNode {
        LayerNode::Group(GroupLayer {
            id: id.to_string(),
            name: id.to_string(),
            visible: true,
            editable: true,
            expanded: true,
            children,
        })
    }

    #[test]
    fn find_checks_level_before_descending() {
        let tree = vec![group("g", vec![obj("a")]), obj("b")];
        assert_eq!(find_by_id(&tree, "b").unwrap().id(), "b");
        assert_eq!(find_by_id(&tree, "a").unwrap().id(), "a");
        assert!(find_by_id(&tree, "missing").is_none());
    }

    #[test]
    fn update_unknown_id_is_identity() {
        let tree = vec![obj("a"), obj("b")];
        let out = update_by_id(tree.clone(), "nope", &|n| n);
        assert_eq!(out, tree);
    }

    #[test]
    fn update_reaches_nested_nodes() {
        let tree = vec![group("g", vec![obj("a")])];
        let out = update_by_id(tree, "a", &|n| match n {
            LayerNode::Object(mut o) => {
                o.name = "renamed".to_string();
                LayerNode::Object(o)
            }
            other => other,
        });
        match find_by_id(&out, "a").unwrap() {
            LayerNode::Object(o) => assert_eq!(o.name, "renamed"),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn delete_prunes_emptied_groups() {
        let tree = vec![group("g", vec![obj("a")]), obj("b")];
        let out = delete_by_id(tree, "a");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "b");
    }

    #[test]
    fn move_up_at_first_position_is_noop() {
        let tree = vec![obj("a"), obj("b")];
        let out = move_up(tree.clone(), "a");
        assert_eq!(out, tree);
    }

    #[test]
    fn move_down_at_last_position_is_noop() {
        let tree = vec![obj("a"), obj("b")];
        let out = move_down(tree.clone(), "b");
        assert_eq!(out, tree);
    }

    #[test]
    fn moves_stay_within_their_level() {
        let tree = vec![group("g", vec![obj("a"), obj("b")]), obj("c")];
        // "b" is last inside the group: move_down must not demote it out.
        let out = move_down(tree.clone(), "b");
        assert_eq!(out, tree);
        let out = move_up(tree, "b");
        match &out[0] {
            LayerNode::Group(g) => {
                assert_eq!(g.children[0].id(), "b");
                assert_eq!(g.children[1].id(), "a");
            }
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn create_group_is_expanded_and_visible() {
        let mut a = obj("a");
        if let LayerNode::Object(o) = &mut a {
            o.visible = false;
        }
        let g = create_group(vec![a, obj("b")], "Group 1".to_string());
        assert!(g.expanded);
        assert!(g.visible);
        assert!(!g.id.is_empty());
        assert_eq!(g.children.len(), 2);
    }

    #[test]
    fn visibility_rewrite_reaches_all_descendants() {
        let inner = group("inner", vec![obj("a")]);
        let outer = match group("outer", vec![inner, obj("b")]) {
            LayerNode::Group(g) => g,
            _ => unreachable!(),
        };
        let hidden = set_children_visibility(outer, false);
        for id in ["a", "b", "inner"] {
            assert!(!find_by_id(&hidden.children, id).unwrap().is_visible());
        }
    }

    #[test]
    fn extract_collects_in_tree_order_and_prunes() {
        let tree = vec![group("g", vec![obj("a")]), obj("b"), obj("c")];
        let (rest, got) = extract_by_ids(tree, &["a".to_string(), "c".to_string()]);
        let got_ids: Vec<_> = got.iter().map(|n| n.id().to_string()).collect();
        assert_eq!(got_ids, vec!["a", "c"]);
        // "g" lost its only child and must be gone.
        let rest_ids = collect_ids(&rest);
        assert_eq!(rest_ids, vec!["b"]);
    }
}
