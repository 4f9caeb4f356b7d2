//! Bidirectional reconciliation between the canvas object graph and the
//! layer tree.
//!
//! Canvas → tree: the synchronizer drains its event queue once per frame;
//! any relevant event arms a coalescing deadline, and when the deadline
//! passes the whole tree is regenerated from the then-current object set
//! (never from a replayed diff queue).  Rebuilding with an unchanged
//! canvas yields a deeply-equal tree, so a quiet canvas never causes a
//! dispatch or a persist.
//!
//! Tree → canvas: selection, stacking, and deletion are pushed straight
//! onto the engine; the resulting events flow back through the same
//! reconciliation loop, which converges because the rebuild is a pure
//! function of canvas state.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::{GroupLayer, LayerNode, ObjectLayer};
use crate::canvas::{CanvasEngine, CanvasEventKind, CanvasObject, ListenerId, ObjectKind};
use crate::log_info;

/// Quiet window for coalescing canvas event bursts (drag-move fires a
/// modified event per frame).
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(40);

/// Longest text prefix shown as a text layer's display name.
const TEXT_NAME_LEN: usize = 24;

const SUBSCRIBED_KINDS: &[CanvasEventKind] = &[
    CanvasEventKind::ObjectAdded,
    CanvasEventKind::ObjectRemoved,
    CanvasEventKind::ObjectModified,
    CanvasEventKind::TextChanged,
    CanvasEventKind::TextEditEntered,
    CanvasEventKind::TextEditExited,
];

pub struct CanvasSynchronizer {
    listener: Option<ListenerId>,
    /// Object ids whose text events we watch; grows by exactly one watch
    /// per id and is emptied symmetrically on detach.
    text_watched: HashSet<String>,
    /// Armed deadline of the pending recompute; replaced (not stacked) on
    /// every new trigger.
    pending_recompute: Option<Instant>,
    debounce: Duration,
}

impl Default for CanvasSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasSynchronizer {
    pub fn new() -> Self {
        Self {
            listener: None,
            text_watched: HashSet::new(),
            pending_recompute: None,
            debounce: DEBOUNCE_WINDOW,
        }
    }

    #[cfg(test)]
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce,
            ..Self::new()
        }
    }

    pub fn is_attached(&self) -> bool {
        self.listener.is_some()
    }

    /// Register with the engine's event bus.  Idempotent.
    pub fn attach(&mut self, canvas: &mut CanvasEngine) {
        if self.listener.is_none() {
            self.listener = Some(canvas.subscribe(SUBSCRIBED_KINDS));
        }
    }

    /// Tear down exactly what `attach` and the rebuild passes registered:
    /// every per-object text watch, then the bus listener itself.  Also
    /// cancels any pending recompute.
    pub fn detach(&mut self, canvas: &mut CanvasEngine) {
        if let Some(listener) = self.listener.take() {
            for id in self.text_watched.drain() {
                canvas.unwatch_text(&id, listener);
            }
            canvas.unsubscribe(listener);
        }
        self.pending_recompute = None;
    }

    /// Drain queued canvas events; any relevant event re-arms the
    /// coalescing deadline.  Returns how many events were seen.
    pub fn pump(&mut self, canvas: &mut CanvasEngine, now: Instant) -> usize {
        let Some(listener) = self.listener else {
            return 0;
        };
        let events = canvas.drain(listener);
        if !events.is_empty() {
            self.pending_recompute = Some(now + self.debounce);
        }
        events.len()
    }

    /// Ask for a rebuild without waiting for a canvas event (startup, or
    /// after a document swap).
    pub fn request_recompute(&mut self, now: Instant) {
        self.pending_recompute = Some(now);
    }

    /// When is the armed deadline due, if any?  The shell uses this to
    /// schedule a repaint instead of polling blind.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending_recompute
    }

    /// If the deadline has passed and the canvas is ready, recompute the
    /// tree from the live object set.  A not-ready canvas keeps the
    /// deadline armed so the cycle is skipped and retried, never dropped.
    pub fn poll_recompute(
        &mut self,
        canvas: &mut CanvasEngine,
        previous: &[LayerNode],
        now: Instant,
    ) -> Option<Vec<LayerNode>> {
        let due = self.pending_recompute.is_some_and(|deadline| now >= deadline);
        if !due {
            return None;
        }
        if !canvas.is_ready() {
            log_info!("layer sync: canvas not ready, skipping this cycle");
            return None;
        }
        self.pending_recompute = None;
        canvas.ensure_object_ids();
        let rebuilt = rebuild_layers(canvas, previous);
        self.reconcile_text_watchers(canvas);
        Some(rebuilt)
    }

    /// Watch text events for live text objects (exactly once per id) and
    /// release watches whose object is gone.
    fn reconcile_text_watchers(&mut self, canvas: &mut CanvasEngine) {
        let Some(listener) = self.listener else {
            return;
        };
        let live: HashSet<String> = canvas
            .objects()
            .iter()
            .filter(|o| o.kind == ObjectKind::Text)
            .map(|o| o.id.clone())
            .collect();
        let to_add: Vec<String> = live.difference(&self.text_watched).cloned().collect();
        let to_remove: Vec<String> = self.text_watched.difference(&live).cloned().collect();
        for id in to_add {
            canvas.watch_text(&id, listener);
            self.text_watched.insert(id);
        }
        for id in to_remove {
            canvas.unwatch_text(&id, listener);
            self.text_watched.remove(&id);
        }
    }

    // ---- tree → canvas -----------------------------------------------------

    /// Make the clicked layer the canvas's active selection (non-additive).
    pub fn select_on_canvas(&self, canvas: &mut CanvasEngine, node: &LayerNode) {
        canvas.set_active_selection(super::collect_object_refs(std::slice::from_ref(node)));
    }

    /// Map a tree move onto the object's stacking position.  Tree index 0
    /// is the top of the stack, so moving up means one step forward.
    pub fn reorder_on_canvas(&self, canvas: &mut CanvasEngine, object_ref: &str, up: bool) {
        if up {
            canvas.bring_forward(object_ref);
        } else {
            canvas.send_backward(object_ref);
        }
    }

    /// Remove the layer's underlying objects from the canvas (the canvas
    /// first, then the tree — the caller applies the tree edit).  Returns
    /// the removed objects with their paint indices, for undo.
    pub fn delete_on_canvas(
        &self,
        canvas: &mut CanvasEngine,
        node: &LayerNode,
    ) -> Vec<(usize, CanvasObject)> {
        let refs = super::collect_object_refs(std::slice::from_ref(node));
        let mut removed = Vec::with_capacity(refs.len());
        for object_ref in refs {
            if let Some(entry) = canvas.remove_object(&object_ref) {
                removed.push(entry);
            }
        }
        removed
    }
}

// ============================================================================
// REBUILD
// ============================================================================

/// Regenerate the tree from the live object set, preserving the group
/// structure known from `previous`.  Members are refreshed from their live
/// object (display name, kind, visibility, stacking position); members
/// whose object is gone are dropped, and groups emptied by that are
/// pruned.  Objects not claimed by any group become flat layers, top of
/// the stack first (tree index 0 is the frontmost object); groups follow
/// the flat section.
pub fn rebuild_layers(canvas: &CanvasEngine, previous: &[LayerNode]) -> Vec<LayerNode> {
    let live: HashMap<&str, (usize, &CanvasObject)> = canvas
        .objects()
        .iter()
        .enumerate()
        .map(|(index, obj)| (obj.id.as_str(), (index, obj)))
        .collect();

    let mut claimed: HashSet<String> = HashSet::new();
    let mut groups: Vec<LayerNode> = Vec::new();
    for node in previous {
        if let LayerNode::Group(group) = node
            && let Some(refreshed) = refresh_group(group, &live, &mut claimed)
        {
            groups.push(LayerNode::Group(refreshed));
        }
    }

    let mut flat: Vec<LayerNode> = canvas
        .objects()
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, obj)| !claimed.contains(&obj.id))
        .map(|(index, obj)| LayerNode::Object(object_layer(obj, index)))
        .collect();
    flat.extend(groups);
    flat
}

fn refresh_group(
    group: &GroupLayer,
    live: &HashMap<&str, (usize, &CanvasObject)>,
    claimed: &mut HashSet<String>,
) -> Option<GroupLayer> {
    let mut children = Vec::with_capacity(group.children.len());
    for child in &group.children {
        match child {
            LayerNode::Object(member) => {
                if let Some((index, obj)) = live.get(member.object_ref.as_str()) {
                    claimed.insert(obj.id.clone());
                    children.push(LayerNode::Object(object_layer(obj, *index)));
                }
            }
            LayerNode::Group(inner) => {
                if let Some(refreshed) = refresh_group(inner, live, claimed) {
                    children.push(LayerNode::Group(refreshed));
                }
            }
        }
    }
    if children.is_empty() {
        return None;
    }
    Some(GroupLayer {
        id: group.id.clone(),
        name: group.name.clone(),
        visible: group.visible,
        editable: group.editable,
        expanded: group.expanded,
        children,
    })
}

fn object_layer(obj: &CanvasObject, paint_index: usize) -> ObjectLayer {
    ObjectLayer {
        id: obj.id.clone(),
        name: display_name(obj),
        kind: obj.kind.label().to_string(),
        visible: obj.visible,
        editable: !obj.locked,
        z_index: Some(paint_index),
        object_ref: obj.id.clone(),
    }
}

/// Text layers display their (truncated) content; everything else shows
/// its object name, falling back to the kind label.
fn display_name(obj: &CanvasObject) -> String {
    if obj.kind == ObjectKind::Text
        && let Some(text) = obj.text.as_deref()
        && !text.trim().is_empty()
    {
        let trimmed = text.trim();
        let mut name: String = trimmed.chars().take(TEXT_NAME_LEN).collect();
        if trimmed.chars().count() > TEXT_NAME_LEN {
            name.push('…');
        }
        return name;
    }
    if obj.name.is_empty() {
        obj.kind.label().to_string()
    } else {
        obj.name.clone()
    }
}

/// Push the tree's object-layer visibility flags back onto their canvas
/// objects.  Group flags stay tree-only; the engine swallows writes that
/// change nothing.
pub fn push_visibility(canvas: &mut CanvasEngine, nodes: &[LayerNode]) {
    for node in nodes {
        match node {
            LayerNode::Object(layer) => canvas.set_visible(&layer.object_ref, layer.visible),
            LayerNode::Group(group) => push_visibility(canvas, &group.children),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::reducer::{LayerEvent, reduce};

    fn engine_with(names: &[&str]) -> (CanvasEngine, Vec<String>) {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        engine.load_objects(Vec::new());
        let ids = names
            .iter()
            .map(|name| engine.add_object(CanvasObject::new(ObjectKind::Rect, *name)))
            .collect();
        (engine, ids)
    }

    #[test]
    fn rebuild_is_idempotent_for_an_unchanged_canvas() {
        let (engine, _) = engine_with(&["a", "b", "c"]);
        let first = rebuild_layers(&engine, &[]);
        let second = rebuild_layers(&engine, &first);
        assert_eq!(first, second);
    }

    #[test]
    fn rebuild_lists_top_of_stack_first() {
        let (engine, ids) = engine_with(&["a", "b"]);
        let tree = rebuild_layers(&engine, &[]);
        // "b" was added last, paints last, and so leads the tree.
        let got: Vec<&str> = tree.iter().map(|n| n.id()).collect();
        assert_eq!(got, vec![ids[1].as_str(), ids[0].as_str()]);
        match &tree[1] {
            LayerNode::Object(o) => assert_eq!(o.z_index, Some(0)),
            _ => panic!("expected object layer"),
        }
    }

    #[test]
    fn rebuild_preserves_groups_and_drops_dead_members() {
        let (mut engine, ids) = engine_with(&["a", "b", "c"]);
        let tree = rebuild_layers(&engine, &[]);
        let grouped = reduce(
            tree,
            LayerEvent::Group {
                ids: vec![ids[0].clone(), ids[1].clone()],
                name: Some("Pair".to_string()),
            },
        );
        engine.remove_object(&ids[1]);
        let rebuilt = rebuild_layers(&engine, &grouped);
        // "c" flat, then the group with the sole survivor "a".
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt[0].id(), ids[2]);
        match &rebuilt[1] {
            LayerNode::Group(g) => {
                assert_eq!(g.name, "Pair");
                assert_eq!(g.children.len(), 1);
                assert_eq!(g.children[0].id(), ids[0]);
            }
            _ => panic!("expected group"),
        }
        // Removing the survivor prunes the group entirely.
        engine.remove_object(&ids[0]);
        let rebuilt = rebuild_layers(&engine, &rebuilt);
        assert_eq!(rebuilt.len(), 1);
        assert!(!rebuilt[0].is_group());
    }

    #[test]
    fn rebuild_refreshes_member_display_state_from_live_objects() {
        let (mut engine, ids) = engine_with(&["a", "b"]);
        let tree = rebuild_layers(&engine, &[]);
        let grouped = reduce(
            tree,
            LayerEvent::Group {
                ids: ids.clone(),
                name: None,
            },
        );
        engine.with_object_mut(&ids[0], |o| {
            o.name = "Hero".to_string();
            o.visible = false;
        });
        let rebuilt = rebuild_layers(&engine, &grouped);
        let member = crate::layers::find_by_id(&rebuilt, &ids[0]).unwrap();
        assert_eq!(member.name(), "Hero");
        assert!(!member.is_visible());
    }

    #[test]
    fn burst_of_events_coalesces_into_one_recompute() {
        let (mut engine, ids) = engine_with(&[]);
        assert!(ids.is_empty());
        let mut sync = CanvasSynchronizer::with_debounce(Duration::from_millis(40));
        sync.attach(&mut engine);
        let t0 = Instant::now();

        for name in ["a", "b", "c"] {
            engine.add_object(CanvasObject::new(ObjectKind::Rect, name));
        }
        assert_eq!(sync.pump(&mut engine, t0), 3);

        // Inside the quiet window: nothing yet.
        assert!(sync.poll_recompute(&mut engine, &[], t0 + Duration::from_millis(10)).is_none());
        // Past the window: exactly one rebuild, then quiescence.
        let tree = sync
            .poll_recompute(&mut engine, &[], t0 + Duration::from_millis(50))
            .expect("deadline passed");
        assert_eq!(tree.len(), 3);
        assert!(sync.poll_recompute(&mut engine, &tree, t0 + Duration::from_millis(60)).is_none());
    }

    #[test]
    fn new_events_replace_the_pending_deadline() {
        let (mut engine, _) = engine_with(&[]);
        let mut sync = CanvasSynchronizer::with_debounce(Duration::from_millis(40));
        sync.attach(&mut engine);
        let t0 = Instant::now();

        engine.add_object(CanvasObject::new(ObjectKind::Rect, "a"));
        sync.pump(&mut engine, t0);
        engine.add_object(CanvasObject::new(ObjectKind::Rect, "b"));
        sync.pump(&mut engine, t0 + Duration::from_millis(30));

        // The first deadline (t0+40) was cancelled and replaced (t0+70).
        assert!(sync.poll_recompute(&mut engine, &[], t0 + Duration::from_millis(45)).is_none());
        assert!(sync.poll_recompute(&mut engine, &[], t0 + Duration::from_millis(75)).is_some());
    }

    #[test]
    fn recompute_waits_for_a_ready_canvas() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        // Never loaded: not ready.
        let mut sync = CanvasSynchronizer::with_debounce(Duration::ZERO);
        sync.attach(&mut engine);
        let t0 = Instant::now();
        sync.request_recompute(t0);
        assert!(sync.poll_recompute(&mut engine, &[], t0).is_none());
        // Deadline survives the skipped cycle.
        engine.load_objects(vec![CanvasObject::new(ObjectKind::Rect, "a")]);
        assert!(sync.poll_recompute(&mut engine, &[], t0).is_some());
    }

    #[test]
    fn text_watchers_register_once_and_detach_cleanly() {
        let (mut engine, _) = engine_with(&[]);
        let mut sync = CanvasSynchronizer::with_debounce(Duration::ZERO);
        sync.attach(&mut engine);
        let t0 = Instant::now();

        let mut caption = CanvasObject::new(ObjectKind::Text, "caption");
        caption.text = Some("hi".to_string());
        engine.add_object(caption);
        sync.pump(&mut engine, t0);
        let tree = sync.poll_recompute(&mut engine, &[], t0).unwrap();
        assert_eq!(engine.text_watcher_count(), 1);

        // A second pass must not register a second watch for the same id.
        sync.request_recompute(t0);
        sync.poll_recompute(&mut engine, &tree, t0);
        assert_eq!(engine.text_watcher_count(), 1);

        sync.detach(&mut engine);
        assert_eq!(engine.text_watcher_count(), 0);
        assert_eq!(engine.listener_count(), 0);
        assert!(sync.pending_deadline().is_none());
    }

    #[test]
    fn delete_on_canvas_removes_every_object_of_a_group() {
        let (mut engine, ids) = engine_with(&["a", "b", "c"]);
        let tree = rebuild_layers(&engine, &[]);
        let grouped = reduce(
            tree,
            LayerEvent::Group {
                ids: vec![ids[0].clone(), ids[1].clone()],
                name: None,
            },
        );
        let sync = CanvasSynchronizer::new();
        let group_node = grouped.iter().find(|n| n.is_group()).unwrap();
        let removed = sync.delete_on_canvas(&mut engine, group_node);
        assert_eq!(removed.len(), 2);
        assert_eq!(engine.objects().len(), 1);
        assert_eq!(engine.objects()[0].id, ids[2]);
    }

    #[test]
    fn push_visibility_writes_through_to_objects() {
        let (mut engine, ids) = engine_with(&["a", "b"]);
        let tree = rebuild_layers(&engine, &[]);
        let grouped = reduce(
            tree,
            LayerEvent::Group {
                ids: ids.clone(),
                name: None,
            },
        );
        let gid = grouped.iter().find(|n| n.is_group()).unwrap().id().to_string();
        let hidden = reduce(grouped, LayerEvent::ToggleVisibility { id: gid });
        push_visibility(&mut engine, &hidden);
        assert!(engine.objects().iter().all(|o| !o.visible));
    }
}
