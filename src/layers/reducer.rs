//! Pure reducer over the layer tree.
//!
//! Every structural edit the panel can perform is an event; `reduce` maps
//! (tree, event) to the next tree and nothing else.  Unmatched
//! preconditions (missing id, fewer than two nodes to group, ungroup on a
//! non-group) return the tree unchanged — the panel constrains its own
//! input, so these are silent no-ops rather than errors, and the tree
//! stays renderable no matter what is dispatched.

use super::{
    GroupLayer, LayerNode, collect_ids, create_group, delete_by_id, extract_by_ids, move_down,
    move_up, set_children_visibility, update_by_id,
};

/// Structural edits accepted by [`reduce`].
#[derive(Clone, Debug)]
pub enum LayerEvent {
    ToggleVisibility { id: String },
    Rename { id: String, name: String },
    /// Group the nodes with the given ids, wherever they sit in the tree.
    /// Commits only when at least two of the ids resolve.
    Group { ids: Vec<String>, name: Option<String> },
    /// Dissolve a group, splicing its children back where it stood.
    Ungroup { id: String },
    ToggleExpand { id: String },
    MoveUp { id: String },
    MoveDown { id: String },
    Delete { id: String },
    /// Full replace, used after canvas reconciliation.
    SetLayers { layers: Vec<LayerNode> },
    /// Merge previously-persisted groups onto the current flat layers.
    InitializeWithGroups { groups: Vec<GroupLayer> },
}

pub fn reduce(layers: Vec<LayerNode>, event: LayerEvent) -> Vec<LayerNode> {
    match event {
        LayerEvent::ToggleVisibility { id } => update_by_id(layers, &id, &|node| match node {
            LayerNode::Object(mut o) => {
                o.visible = !o.visible;
                LayerNode::Object(o)
            }
            LayerNode::Group(mut g) => {
                g.visible = !g.visible;
                let next = g.visible;
                LayerNode::Group(set_children_visibility(g, next))
            }
        }),

        LayerEvent::Rename { id, name } => update_by_id(layers, &id, &|node| match node {
            LayerNode::Object(mut o) => {
                o.name = name.clone();
                LayerNode::Object(o)
            }
            LayerNode::Group(mut g) => {
                g.name = name.clone();
                LayerNode::Group(g)
            }
        }),

        LayerEvent::Group { ids, name } => group_nodes(layers, &ids, name),

        LayerEvent::Ungroup { id } => ungroup(layers, &id),

        LayerEvent::ToggleExpand { id } => update_by_id(layers, &id, &|node| match node {
            LayerNode::Group(mut g) => {
                g.expanded = !g.expanded;
                LayerNode::Group(g)
            }
            other => other,
        }),

        LayerEvent::MoveUp { id } => move_up(layers, &id),
        LayerEvent::MoveDown { id } => move_down(layers, &id),
        LayerEvent::Delete { id } => delete_by_id(layers, &id),
        LayerEvent::SetLayers { layers } => layers,
        LayerEvent::InitializeWithGroups { groups } => merge_groups(layers, groups),
    }
}

/// Extract the named nodes and wrap them in a fresh group appended at the
/// root level.  Fewer than two resolved nodes leaves the tree untouched
/// (the extraction is rolled back by never committing it).
fn group_nodes(layers: Vec<LayerNode>, ids: &[String], name: Option<String>) -> Vec<LayerNode> {
    let (mut remaining, extracted) = extract_by_ids(layers.clone(), ids);
    if extracted.len() < 2 {
        return layers;
    }
    let name = name.unwrap_or_else(|| "Group".to_string());
    remaining.push(LayerNode::Group(create_group(extracted, name)));
    remaining
}

/// Remove a group node and splice its direct children into the position it
/// occupied at its own nesting level.  If the group cannot be located the
/// tree is returned unchanged; if its position inside a level cannot be
/// determined (not expected to happen), the children land at the end of
/// the root level.
fn ungroup(layers: Vec<LayerNode>, id: &str) -> Vec<LayerNode> {
    match ungroup_level(layers, id) {
        UngroupOutcome::Done(nodes) => nodes,
        UngroupOutcome::NotFound(nodes) => nodes,
        UngroupOutcome::Orphaned(mut nodes, children) => {
            // Fallback: the group was found but its slot was lost.
            nodes.extend(children);
            nodes
        }
    }
}

enum UngroupOutcome {
    Done(Vec<LayerNode>),
    NotFound(Vec<LayerNode>),
    /// Children recovered but no insertion slot — bubbled to the root.
    Orphaned(Vec<LayerNode>, Vec<LayerNode>),
}

fn ungroup_level(nodes: Vec<LayerNode>, id: &str) -> UngroupOutcome {
    if let Some(pos) = nodes
        .iter()
        .position(|n| n.id() == id && matches!(n, LayerNode::Group(_)))
    {
        let mut out = nodes;
        let LayerNode::Group(group) = out.remove(pos) else {
            unreachable!("position matched a group");
        };
        for (offset, child) in group.children.into_iter().enumerate() {
            out.insert(pos + offset, child);
        }
        return UngroupOutcome::Done(out);
    }

    let mut out = Vec::with_capacity(nodes.len());
    let mut found = false;
    let mut orphans: Vec<LayerNode> = Vec::new();
    for node in nodes {
        if found {
            out.push(node);
            continue;
        }
        if let LayerNode::Group(mut g) = node {
            match ungroup_level(g.children, id) {
                UngroupOutcome::Done(children) => {
                    found = true;
                    g.children = children;
                    // The splice may have emptied the parent (a group whose
                    // only child was the dissolved, childless group).
                    if !g.children.is_empty() {
                        out.push(LayerNode::Group(g));
                    }
                }
                UngroupOutcome::NotFound(children) => {
                    g.children = children;
                    out.push(LayerNode::Group(g));
                }
                UngroupOutcome::Orphaned(children, inner_orphans) => {
                    found = true;
                    g.children = children;
                    orphans = inner_orphans;
                    if !g.children.is_empty() {
                        out.push(LayerNode::Group(g));
                    }
                }
            }
        } else {
            out.push(node);
        }
    }

    if !orphans.is_empty() {
        UngroupOutcome::Orphaned(out, orphans)
    } else if found {
        UngroupOutcome::Done(out)
    } else {
        UngroupOutcome::NotFound(out)
    }
}

/// Merge persisted groups onto the current flat object layers: each group
/// keeps only the members whose ids still exist in the tree, claimed ids
/// leave the flat level, and groups that end up empty are dropped.
fn merge_groups(layers: Vec<LayerNode>, groups: Vec<GroupLayer>) -> Vec<LayerNode> {
    let live_ids = collect_ids(&layers);
    let mut out = layers;
    for group in groups {
        let member_ids: Vec<String> = collect_ids(&group.children)
            .into_iter()
            .filter(|id| live_ids.iter().any(|live| live == id))
            .collect();
        if member_ids.is_empty() {
            continue;
        }
        let (remaining, mut extracted) = extract_by_ids(out, &member_ids);
        out = remaining;
        if extracted.is_empty() {
            continue;
        }
        // Members keep the order they had inside the saved group.
        extracted.sort_by_key(|node| {
            member_ids
                .iter()
                .position(|id| id == node.id())
                .unwrap_or(usize::MAX)
        });
        out.push(LayerNode::Group(GroupLayer {
            id: group.id,
            name: group.name,
            visible: group.visible,
            editable: group.editable,
            expanded: group.expanded,
            children: extracted,
        }));
    }
    out
}
