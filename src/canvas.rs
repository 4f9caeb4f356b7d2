//! Canvas object graph and interactive view.
//!
//! `CanvasEngine` is the single authoritative mutable store of drawable
//! objects.  Everything else in the editor treats it as externally owned:
//! interested parties subscribe to lifecycle events and drain their queue
//! once per frame, rather than caching object state across ticks.  The
//! layers subsystem holds only weak string references into this graph.

use std::collections::{HashMap, HashSet, VecDeque};

use egui::{Align2, Color32, FontId, Pos2, Rect, Sense, Stroke, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log_warn;

// ============================================================================
// OBJECTS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Rect,
    Ellipse,
    Text,
    Image,
}

impl ObjectKind {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::Rect => "Rectangle",
            ObjectKind::Ellipse => "Ellipse",
            ObjectKind::Text => "Text",
            ObjectKind::Image => "Image",
        }
    }
}

/// A drawable entity.  `id` is the stable string identity everything keys
/// on; the engine assigns one when an object arrives without it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub kind: ObjectKind,
    pub visible: bool,
    pub locked: bool,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub fill: [u8; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CanvasObject {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            kind,
            visible: true,
            locked: false,
            left: 80.0,
            top: 80.0,
            width: 160.0,
            height: 120.0,
            fill: [120, 160, 220, 255],
            text: None,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_min_size(
            Pos2::new(self.left, self.top),
            Vec2::new(self.width, self.height),
        )
    }
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanvasEvent {
    ObjectAdded { id: String },
    ObjectRemoved { id: String },
    ObjectModified { id: String },
    TextChanged { id: String },
    TextEditEntered { id: String },
    TextEditExited { id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CanvasEventKind {
    ObjectAdded,
    ObjectRemoved,
    ObjectModified,
    TextChanged,
    TextEditEntered,
    TextEditExited,
}

impl CanvasEvent {
    pub fn kind(&self) -> CanvasEventKind {
        match self {
            CanvasEvent::ObjectAdded { .. } => CanvasEventKind::ObjectAdded,
            CanvasEvent::ObjectRemoved { .. } => CanvasEventKind::ObjectRemoved,
            CanvasEvent::ObjectModified { .. } => CanvasEventKind::ObjectModified,
            CanvasEvent::TextChanged { .. } => CanvasEventKind::TextChanged,
            CanvasEvent::TextEditEntered { .. } => CanvasEventKind::TextEditEntered,
            CanvasEvent::TextEditExited { .. } => CanvasEventKind::TextEditExited,
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            CanvasEvent::ObjectAdded { id }
            | CanvasEvent::ObjectRemoved { id }
            | CanvasEvent::ObjectModified { id }
            | CanvasEvent::TextChanged { id }
            | CanvasEvent::TextEditEntered { id }
            | CanvasEvent::TextEditExited { id } => id,
        }
    }
}

/// Opaque listener identity.  Unsubscribing requires the same id that
/// subscribing handed out, which keeps setup and teardown symmetric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerSlot {
    id: ListenerId,
    kinds: HashSet<CanvasEventKind>,
    queue: VecDeque<CanvasEvent>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Serialized form of the object graph, also the document payload.
#[derive(Serialize)]
struct EngineSnapshot<'a> {
    width: f32,
    height: f32,
    objects: &'a [CanvasObject],
}

pub struct CanvasEngine {
    /// Paint order: index 0 is painted first (bottom of the stack).
    objects: Vec<CanvasObject>,
    active_selection: Vec<String>,
    listeners: Vec<ListenerSlot>,
    /// Text-change events are delivered only to listeners that watch the
    /// object id, mirroring per-object listener registration.
    text_watchers: HashMap<String, HashSet<ListenerId>>,
    next_listener: u64,
    ready: bool,
    pub width: f32,
    pub height: f32,
}

impl CanvasEngine {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            objects: Vec::new(),
            active_selection: Vec::new(),
            listeners: Vec::new(),
            text_watchers: HashMap::new(),
            next_listener: 1,
            ready: false,
            width,
            height,
        }
    }

    /// Capability check used by consumers before reading the graph.  False
    /// while a document swap is in flight.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Replace the whole object set (new document / loaded document).
    /// Emits removals for the old set and additions for the new one.
    pub fn load_objects(&mut self, objects: Vec<CanvasObject>) {
        self.ready = false;
        let old: Vec<String> = self.objects.iter().map(|o| o.id.clone()).collect();
        self.objects.clear();
        self.active_selection.clear();
        self.text_watchers.clear();
        for id in old {
            self.emit(CanvasEvent::ObjectRemoved { id });
        }
        for mut obj in objects {
            if obj.id.is_empty() {
                obj.id = Uuid::new_v4().to_string();
            }
            let id = obj.id.clone();
            self.objects.push(obj);
            self.emit(CanvasEvent::ObjectAdded { id });
        }
        self.ready = true;
    }

    // ---- object access ------------------------------------------------------

    pub fn objects(&self) -> &[CanvasObject] {
        &self.objects
    }

    pub fn get(&self, id: &str) -> Option<&CanvasObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.id == id)
    }

    /// Assign generated ids to any objects still lacking one.  Quiet: the
    /// follow-up rebuild picks the ids up without another event round.
    pub fn ensure_object_ids(&mut self) {
        for obj in &mut self.objects {
            if obj.id.is_empty() {
                obj.id = Uuid::new_v4().to_string();
            }
        }
    }

    // ---- mutation -----------------------------------------------------------

    /// Add an object on top of the stack, generating an id if needed.
    /// Returns the object's id.
    pub fn add_object(&mut self, mut obj: CanvasObject) -> String {
        if obj.id.is_empty() {
            obj.id = Uuid::new_v4().to_string();
        }
        let id = obj.id.clone();
        self.objects.push(obj);
        self.emit(CanvasEvent::ObjectAdded { id: id.clone() });
        id
    }

    /// Re-insert an object at a specific paint index (undo of a delete).
    pub fn insert_object_at(&mut self, index: usize, mut obj: CanvasObject) -> String {
        if obj.id.is_empty() {
            obj.id = Uuid::new_v4().to_string();
        }
        let id = obj.id.clone();
        let index = index.min(self.objects.len());
        self.objects.insert(index, obj);
        self.emit(CanvasEvent::ObjectAdded { id: id.clone() });
        id
    }

    /// Remove an object.  Returns it together with its paint index so
    /// callers can restore it on undo.
    pub fn remove_object(&mut self, id: &str) -> Option<(usize, CanvasObject)> {
        let index = self.index_of(id)?;
        let obj = self.objects.remove(index);
        self.active_selection.retain(|s| s != id);
        self.text_watchers.remove(id);
        self.emit(CanvasEvent::ObjectRemoved { id: id.to_string() });
        Some((index, obj))
    }

    /// Run a closure against the object, then announce the modification.
    /// Returns false when the id is unknown.
    pub fn with_object_mut(&mut self, id: &str, f: impl FnOnce(&mut CanvasObject)) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        f(&mut self.objects[index]);
        self.emit(CanvasEvent::ObjectModified { id: id.to_string() });
        true
    }

    /// Set an object's visibility; quiet no-op when already at the target
    /// value so push-backs from the layer tree don't echo.
    pub fn set_visible(&mut self, id: &str, visible: bool) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        if self.objects[index].visible == visible {
            return;
        }
        self.objects[index].visible = visible;
        self.emit(CanvasEvent::ObjectModified { id: id.to_string() });
    }

    /// Replace a text object's content.  The event is delivered only to
    /// watchers of the object, like a listener attached to the object
    /// itself.
    pub fn set_text(&mut self, id: &str, text: String) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        if self.objects[index].text.as_deref() == Some(text.as_str()) {
            return;
        }
        self.objects[index].text = Some(text);
        self.emit(CanvasEvent::TextChanged { id: id.to_string() });
    }

    pub fn begin_text_edit(&mut self, id: &str) {
        self.emit(CanvasEvent::TextEditEntered { id: id.to_string() });
    }

    pub fn end_text_edit(&mut self, id: &str) {
        self.emit(CanvasEvent::TextEditExited { id: id.to_string() });
    }

    // ---- stacking -----------------------------------------------------------

    /// Swap the object one step toward the top of the stack.
    pub fn bring_forward(&mut self, id: &str) {
        if let Some(index) = self.index_of(id)
            && index + 1 < self.objects.len()
        {
            self.objects.swap(index, index + 1);
            self.emit(CanvasEvent::ObjectModified { id: id.to_string() });
        }
    }

    /// Swap the object one step toward the bottom of the stack.
    pub fn send_backward(&mut self, id: &str) {
        if let Some(index) = self.index_of(id)
            && index > 0
        {
            self.objects.swap(index, index - 1);
            self.emit(CanvasEvent::ObjectModified { id: id.to_string() });
        }
    }

    // ---- selection ----------------------------------------------------------

    pub fn active_selection(&self) -> &[String] {
        &self.active_selection
    }

    pub fn set_active_selection(&mut self, ids: Vec<String>) {
        self.active_selection = ids
            .into_iter()
            .filter(|id| self.objects.iter().any(|o| &o.id == id))
            .collect();
    }

    // ---- serialization ------------------------------------------------------

    /// JSON rendition of the graph; input for the content fingerprint and
    /// the document file.  An empty string on failure — the fingerprint
    /// consumer treats that as "no content".
    pub fn serialize(&self) -> String {
        let snapshot = EngineSnapshot {
            width: self.width,
            height: self.height,
            objects: &self.objects,
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                log_warn!("canvas serialization failed: {}", e);
                String::new()
            }
        }
    }

    // ---- listeners ----------------------------------------------------------

    pub fn subscribe(&mut self, kinds: &[CanvasEventKind]) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push(ListenerSlot {
            id,
            kinds: kinds.iter().copied().collect(),
            queue: VecDeque::new(),
        });
        id
    }

    pub fn unsubscribe(&mut self, listener: ListenerId) {
        self.listeners.retain(|slot| slot.id != listener);
        for watchers in self.text_watchers.values_mut() {
            watchers.remove(&listener);
        }
        self.text_watchers.retain(|_, watchers| !watchers.is_empty());
    }

    /// Take every event queued for the listener since the last drain, in
    /// dispatch order.
    pub fn drain(&mut self, listener: ListenerId) -> Vec<CanvasEvent> {
        self.listeners
            .iter_mut()
            .find(|slot| slot.id == listener)
            .map(|slot| slot.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Deliver this object's text-change events to the listener.
    pub fn watch_text(&mut self, object_id: &str, listener: ListenerId) {
        self.text_watchers
            .entry(object_id.to_string())
            .or_default()
            .insert(listener);
    }

    pub fn unwatch_text(&mut self, object_id: &str, listener: ListenerId) {
        if let Some(watchers) = self.text_watchers.get_mut(object_id) {
            watchers.remove(&listener);
            if watchers.is_empty() {
                self.text_watchers.remove(object_id);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn text_watcher_count(&self) -> usize {
        self.text_watchers.values().map(|w| w.len()).sum()
    }

    fn emit(&mut self, event: CanvasEvent) {
        let watchers = if event.kind() == CanvasEventKind::TextChanged {
            self.text_watchers.get(event.object_id()).cloned()
        } else {
            None
        };
        for slot in &mut self.listeners {
            if !slot.kinds.contains(&event.kind()) {
                continue;
            }
            if event.kind() == CanvasEventKind::TextChanged {
                let watched = watchers.as_ref().is_some_and(|w| w.contains(&slot.id));
                if !watched {
                    continue;
                }
            }
            slot.queue.push_back(event.clone());
        }
    }
}

// ============================================================================
// INTERACTIVE VIEW
// ============================================================================

/// In-flight text edit session (floating edit box over the canvas).
pub struct TextEditSession {
    pub object_id: String,
    pub buffer: String,
}

/// Central-panel canvas: paints the object stack and translates pointer
/// gestures into engine mutations.  Purely presentational — holds no
/// authoritative object state of its own.
#[derive(Default)]
pub struct CanvasView {
    dragging: Option<String>,
    pub text_edit: Option<TextEditSession>,
}

/// Gap between the panel edge and the document frame.
const DOC_MARGIN: f32 = 16.0;

impl CanvasView {
    pub fn show(&mut self, ui: &mut egui::Ui, engine: &mut CanvasEngine) {
        let avail = ui.available_size();
        let (response, painter) = ui.allocate_painter(avail, Sense::click_and_drag());

        // Work area backdrop + document frame.
        painter.rect_filled(response.rect, 0.0, Color32::from_gray(34));
        let doc_rect = Rect::from_min_size(
            response.rect.min + Vec2::splat(DOC_MARGIN),
            Vec2::new(engine.width, engine.height),
        );
        painter.rect_filled(doc_rect, 2.0, Color32::from_gray(250));
        painter.rect_stroke(doc_rect, 2.0, Stroke::new(1.0, Color32::from_gray(90)));
        let doc_origin = doc_rect.min.to_vec2();

        // Paint order: index 0 first, so later objects cover earlier ones.
        let selection: HashSet<String> = engine.active_selection().iter().cloned().collect();
        for obj in engine.objects() {
            if !obj.visible {
                continue;
            }
            let rect = obj.bounds().translate(doc_origin);
            let fill =
                Color32::from_rgba_unmultiplied(obj.fill[0], obj.fill[1], obj.fill[2], obj.fill[3]);
            match obj.kind {
                ObjectKind::Rect | ObjectKind::Image => {
                    painter.rect_filled(rect, 3.0, fill);
                }
                ObjectKind::Ellipse => {
                    painter.circle_filled(
                        rect.center(),
                        rect.width().min(rect.height()) / 2.0,
                        fill,
                    );
                }
                ObjectKind::Text => {
                    let content = obj.text.as_deref().unwrap_or("");
                    painter.text(
                        rect.min,
                        Align2::LEFT_TOP,
                        content,
                        FontId::proportional(18.0),
                        Color32::from_gray(20),
                    );
                }
            }
            if selection.contains(&obj.id) {
                painter.rect_stroke(
                    rect.expand(2.0),
                    2.0,
                    Stroke::new(1.5, ui.visuals().selection.bg_fill),
                );
            }
        }

        // -- pointer handling ------------------------------------------------
        let pointer = response
            .interact_pointer_pos()
            .map(|p| Pos2::new(p.x, p.y) - doc_origin);

        if response.drag_started()
            && let Some(pos) = pointer
        {
            self.dragging = Self::hit_test(engine, pos);
            if let Some(id) = self.dragging.clone() {
                engine.set_active_selection(vec![id]);
            }
        }
        if response.dragged()
            && let Some(id) = self.dragging.clone()
        {
            // Drag-move generates a modified event per frame; downstream
            // reconciliation coalesces the burst.
            let delta = response.drag_delta();
            engine.with_object_mut(&id, |obj| {
                obj.left += delta.x;
                obj.top += delta.y;
            });
        }
        if response.drag_released() {
            self.dragging = None;
        }

        if response.clicked()
            && let Some(pos) = pointer
        {
            let additive = ui.input(|i| i.modifiers.shift);
            match Self::hit_test(engine, pos) {
                Some(id) => {
                    let mut sel: Vec<String> = if additive {
                        engine.active_selection().to_vec()
                    } else {
                        Vec::new()
                    };
                    if !sel.contains(&id) {
                        sel.push(id);
                    }
                    engine.set_active_selection(sel);
                }
                None => {
                    if !additive {
                        engine.set_active_selection(Vec::new());
                    }
                }
            }
        }

        if response.double_clicked()
            && let Some(pos) = pointer
            && let Some(id) = Self::hit_test(engine, pos)
            && engine.get(&id).map(|o| o.kind) == Some(ObjectKind::Text)
        {
            let buffer = engine
                .get(&id)
                .and_then(|o| o.text.clone())
                .unwrap_or_default();
            self.text_edit = Some(TextEditSession {
                object_id: id.clone(),
                buffer,
            });
            engine.begin_text_edit(&id);
        }

        self.show_text_editor(ui, engine);
    }

    /// Floating edit box for the active text session.  Each keystroke lands
    /// on the engine immediately; closing the box ends the edit session.
    fn show_text_editor(&mut self, ui: &mut egui::Ui, engine: &mut CanvasEngine) {
        let Some(session) = &mut self.text_edit else {
            return;
        };
        let mut open = true;
        let mut done = false;
        egui::Window::new("Edit text")
            .id(egui::Id::new("canvas_text_editor"))
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ui.ctx(), |ui| {
                let edit = ui.text_edit_singleline(&mut session.buffer);
                if edit.changed() {
                    engine.set_text(&session.object_id, session.buffer.clone());
                }
                if ui.input(|i| i.key_pressed(egui::Key::Enter) || i.key_pressed(egui::Key::Escape))
                {
                    done = true;
                }
            });
        if !open || done {
            let id = session.object_id.clone();
            engine.end_text_edit(&id);
            self.text_edit = None;
        }
    }

    /// Topmost visible object under the point, in document coordinates.
    fn hit_test(engine: &CanvasEngine, pos: Pos2) -> Option<String> {
        engine
            .objects()
            .iter()
            .rev()
            .find(|obj| obj.visible && !obj.locked && obj.bounds().contains(pos))
            .map(|obj| obj.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_named(name: &str) -> CanvasObject {
        CanvasObject::new(ObjectKind::Rect, name)
    }

    const ALL_KINDS: &[CanvasEventKind] = &[
        CanvasEventKind::ObjectAdded,
        CanvasEventKind::ObjectRemoved,
        CanvasEventKind::ObjectModified,
        CanvasEventKind::TextChanged,
        CanvasEventKind::TextEditEntered,
        CanvasEventKind::TextEditExited,
    ];

    #[test]
    fn add_assigns_an_id_and_emits() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let listener = engine.subscribe(ALL_KINDS);
        let id = engine.add_object(rect_named("a"));
        assert!(!id.is_empty());
        let events = engine.drain(listener);
        assert_eq!(events, vec![CanvasEvent::ObjectAdded { id }]);
        // Queue is consumed by the drain.
        assert!(engine.drain(listener).is_empty());
    }

    #[test]
    fn events_preserve_dispatch_order() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let listener = engine.subscribe(ALL_KINDS);
        let a = engine.add_object(rect_named("a"));
        engine.with_object_mut(&a, |o| o.left = 10.0);
        engine.remove_object(&a);
        let kinds: Vec<CanvasEventKind> =
            engine.drain(listener).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CanvasEventKind::ObjectAdded,
                CanvasEventKind::ObjectModified,
                CanvasEventKind::ObjectRemoved,
            ]
        );
    }

    #[test]
    fn text_changes_reach_only_watchers() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let watcher = engine.subscribe(ALL_KINDS);
        let bystander = engine.subscribe(ALL_KINDS);
        let mut text = CanvasObject::new(ObjectKind::Text, "caption");
        text.text = Some("hello".to_string());
        let id = engine.add_object(text);
        engine.drain(watcher);
        engine.drain(bystander);

        engine.watch_text(&id, watcher);
        engine.set_text(&id, "hello world".to_string());

        assert_eq!(
            engine.drain(watcher),
            vec![CanvasEvent::TextChanged { id: id.clone() }]
        );
        assert!(engine.drain(bystander).is_empty());
    }

    #[test]
    fn unsubscribe_also_clears_text_watches() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let listener = engine.subscribe(ALL_KINDS);
        let id = engine.add_object(CanvasObject::new(ObjectKind::Text, "t"));
        engine.watch_text(&id, listener);
        assert_eq!(engine.text_watcher_count(), 1);
        engine.unsubscribe(listener);
        assert_eq!(engine.listener_count(), 0);
        assert_eq!(engine.text_watcher_count(), 0);
    }

    #[test]
    fn stacking_commands_swap_one_step() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let a = engine.add_object(rect_named("a"));
        let b = engine.add_object(rect_named("b"));
        engine.bring_forward(&a);
        assert_eq!(engine.index_of(&a), Some(1));
        assert_eq!(engine.index_of(&b), Some(0));
        // Already on top: no movement.
        engine.bring_forward(&a);
        assert_eq!(engine.index_of(&a), Some(1));
        engine.send_backward(&a);
        assert_eq!(engine.index_of(&a), Some(0));
    }

    #[test]
    fn removing_an_object_drops_it_from_the_selection() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let a = engine.add_object(rect_named("a"));
        engine.set_active_selection(vec![a.clone()]);
        engine.remove_object(&a);
        assert!(engine.active_selection().is_empty());
    }

    #[test]
    fn set_visible_at_current_value_is_silent() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        let a = engine.add_object(rect_named("a"));
        let listener = engine.subscribe(ALL_KINDS);
        engine.set_visible(&a, true);
        assert!(engine.drain(listener).is_empty());
        engine.set_visible(&a, false);
        assert_eq!(engine.drain(listener).len(), 1);
    }

    #[test]
    fn serialize_is_stable_for_unchanged_content() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        engine.add_object(rect_named("a"));
        assert_eq!(engine.serialize(), engine.serialize());
    }
}
