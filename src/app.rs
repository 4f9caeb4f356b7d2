use std::time::Instant;

use eframe::egui;

use crate::canvas::{CanvasEngine, CanvasObject, CanvasView, ObjectKind};
use crate::components::history::{
    DeleteCommand, HistoryManager, HistoryPanel, InsertCommand, ReorderCommand, TreeCommand,
};
use crate::components::layers::{LayersPanel, PanelRequest};
use crate::io::{self, DocumentFile, FileHandler};
use crate::layers::persist::{DiskStore, GroupStore, content_hash};
use crate::layers::reducer::{LayerEvent, reduce};
use crate::layers::sync::{CanvasSynchronizer, push_visibility};
use crate::layers::{GroupLayer, LayerNode, collect_groups, find_by_id};
use crate::project::Document;
use crate::{log_err, log_info};

pub struct RetouchrApp {
    document: Document,
    engine: CanvasEngine,
    layers: Vec<LayerNode>,
    synchronizer: CanvasSynchronizer,
    history: HistoryManager,
    group_store: GroupStore<DiskStore>,
    file_handler: FileHandler,

    // UI components
    canvas_view: CanvasView,
    layers_panel: LayersPanel,
    history_panel: HistoryPanel,
    show_layers_window: bool,
    show_history_window: bool,

    /// Group layout at the last persist; layouts are written only when
    /// this differs.
    last_saved_groups: Vec<GroupLayer>,
    /// Fingerprint of the canvas content backing `last_saved_groups`.
    canvas_hash: String,

    untitled_counter: usize,
    shape_counter: usize,
    window_title: String,

    /// True only on the very first update() call — startup work that needs
    /// a frame context happens there.
    first_frame: bool,
}

impl RetouchrApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let mut engine = CanvasEngine::new(960.0, 640.0);
        engine.load_objects(starter_objects(engine.width, engine.height));

        Self {
            document: Document::new_untitled(1),
            engine,
            layers: Vec::new(),
            synchronizer: CanvasSynchronizer::new(),
            history: HistoryManager::default(),
            group_store: GroupStore::new(DiskStore::in_app_data()),
            file_handler: FileHandler::default(),
            canvas_view: CanvasView::default(),
            layers_panel: LayersPanel::default(),
            history_panel: HistoryPanel::default(),
            show_layers_window: true,
            show_history_window: false,
            last_saved_groups: Vec::new(),
            canvas_hash: String::new(),
            untitled_counter: 1,
            shape_counter: 0,
            window_title: String::new(),
            first_frame: true,
        }
    }

    // ------------------------------------------------------------------
    // document lifecycle
    // ------------------------------------------------------------------

    /// Build the layer tree for freshly-loaded canvas content and merge
    /// the group layout that belongs to it (embedded layout first, then
    /// the stored one for this fingerprint, then the global slot).
    fn initialize_layers(&mut self, embedded_groups: Vec<GroupLayer>, now: Instant) {
        self.canvas_hash = content_hash(&self.engine.serialize());
        let groups = if embedded_groups.is_empty() {
            self.group_store.load_with_fallback(&self.canvas_hash)
        } else {
            embedded_groups
        };
        self.layers.clear();
        self.layers_panel.selection.clear();
        self.synchronizer.pump(&mut self.engine, now);
        self.synchronizer.request_recompute(now);
        if let Some(rebuilt) = self
            .synchronizer
            .poll_recompute(&mut self.engine, &self.layers, now)
        {
            self.layers = reduce(rebuilt, LayerEvent::InitializeWithGroups { groups });
        }
        self.last_saved_groups = collect_groups(&self.layers);
        log_info!(
            "document '{}' ready: {} objects, {} groups",
            self.document.name,
            self.engine.objects().len(),
            self.last_saved_groups.len()
        );
    }

    fn new_document(&mut self, now: Instant) {
        self.untitled_counter += 1;
        self.document = Document::new_untitled(self.untitled_counter);
        self.history.clear();
        self.engine
            .load_objects(starter_objects(self.engine.width, self.engine.height));
        self.initialize_layers(Vec::new(), now);
    }

    fn open_document(&mut self, now: Instant) {
        let Some(path) = self.file_handler.pick_open_path() else {
            return;
        };
        match io::load_document(&path) {
            Ok(doc) => {
                self.engine.width = doc.width;
                self.engine.height = doc.height;
                self.engine.load_objects(doc.objects);
                self.document = Document::from_path(path);
                self.history.clear();
                self.initialize_layers(doc.groups, now);
            }
            Err(e) => {
                log_err!("open failed: {}", e);
            }
        }
    }

    fn save_document(&mut self, save_as: bool) {
        let path = match (&self.document.path, save_as) {
            (Some(path), false) => path.clone(),
            _ => match self.file_handler.pick_save_path(&self.document.name) {
                Some(path) => path,
                None => return,
            },
        };
        let doc = DocumentFile::new(
            self.engine.width,
            self.engine.height,
            self.engine.objects().to_vec(),
            collect_groups(&self.layers),
        );
        match io::save_document(&path, &doc) {
            Ok(()) => {
                self.document.path = Some(path);
                self.document.update_name_from_path();
                self.document.mark_clean();
                log_info!("saved '{}'", self.document.name);
            }
            Err(e) => {
                log_err!("save failed: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // layer edits
    // ------------------------------------------------------------------

    /// Apply a pure tree edit, record it when it changed anything, and
    /// persist the group layout.  `push_vis` writes the resulting
    /// object-layer visibility flags through to the canvas.
    fn apply_tree_edit(&mut self, event: LayerEvent, description: Option<String>, push_vis: bool) {
        let before = self.layers.clone();
        let next = reduce(before.clone(), event);
        if next == before {
            return;
        }
        self.layers = next;
        if push_vis {
            push_visibility(&mut self.engine, &self.layers);
        }
        if let Some(description) = description {
            let mut cmd = TreeCommand::new(description, before);
            cmd.set_after(self.layers.clone());
            self.history.push(Box::new(cmd));
        }
        self.document.mark_dirty();
        self.persist_groups();
    }

    fn handle_request(&mut self, request: PanelRequest) {
        match request {
            PanelRequest::Select { id, additive } => {
                if !additive
                    && let Some(node) = find_by_id(&self.layers, &id)
                {
                    self.synchronizer.select_on_canvas(&mut self.engine, node);
                }
            }
            PanelRequest::ToggleVisibility(id) => {
                let name = find_by_id(&self.layers, &id)
                    .map(|n| n.name().to_string())
                    .unwrap_or_default();
                self.apply_tree_edit(
                    LayerEvent::ToggleVisibility { id },
                    Some(format!("Toggle Visibility: {}", name)),
                    true,
                );
            }
            PanelRequest::ToggleExpand(id) => {
                // Not an undoable edit, but the layout (expanded flags ride
                // along with the groups) is still persisted.
                self.apply_tree_edit(LayerEvent::ToggleExpand { id }, None, false);
            }
            PanelRequest::Rename { id, name } => {
                self.apply_tree_edit(
                    LayerEvent::Rename {
                        id,
                        name: name.clone(),
                    },
                    Some(format!("Rename: {}", name)),
                    false,
                );
            }
            PanelRequest::GroupSelection => {
                let ids = self.layers_panel.selection.ids();
                self.apply_tree_edit(
                    LayerEvent::Group { ids, name: None },
                    Some("Group Layers".to_string()),
                    false,
                );
            }
            PanelRequest::Ungroup(id) => {
                self.apply_tree_edit(
                    LayerEvent::Ungroup { id },
                    Some("Ungroup".to_string()),
                    false,
                );
            }
            PanelRequest::Move { id, up } => self.move_layer(&id, up),
            PanelRequest::Delete(id) => self.delete_layer(&id),
        }
    }

    fn move_layer(&mut self, id: &str, up: bool) {
        let before = self.layers.clone();
        let event = if up {
            LayerEvent::MoveUp { id: id.to_string() }
        } else {
            LayerEvent::MoveDown { id: id.to_string() }
        };
        let next = reduce(before.clone(), event);
        if next == before {
            return;
        }
        self.layers = next;

        // Object layers also swap their canvas stacking position; group
        // moves exist only in the tree.
        let object_ref = match find_by_id(&self.layers, id) {
            Some(LayerNode::Object(layer)) => Some(layer.object_ref.clone()),
            _ => None,
        };
        if let Some(object_ref) = &object_ref {
            self.synchronizer
                .reorder_on_canvas(&mut self.engine, object_ref, up);
        }

        let name = find_by_id(&self.layers, id)
            .map(|n| n.name().to_string())
            .unwrap_or_default();
        let direction = if up { "Up" } else { "Down" };
        let mut cmd = ReorderCommand::new(
            format!("Move {}: {}", direction, name),
            object_ref,
            up,
            before,
        );
        cmd.set_after(self.layers.clone());
        self.history.push(Box::new(cmd));
        self.document.mark_dirty();
    }

    fn delete_layer(&mut self, id: &str) {
        let Some(node) = find_by_id(&self.layers, id).cloned() else {
            return;
        };
        let before = self.layers.clone();
        // Canvas first, then the tree; the follow-up reconciliation pass
        // converges on the same answer.
        let removed = self.synchronizer.delete_on_canvas(&mut self.engine, &node);
        self.layers = reduce(
            std::mem::take(&mut self.layers),
            LayerEvent::Delete { id: id.to_string() },
        );
        let mut cmd = DeleteCommand::new(format!("Delete: {}", node.name()), removed, before);
        cmd.set_after(self.layers.clone());
        self.history.push(Box::new(cmd));
        self.document.mark_dirty();
        self.persist_groups();
    }

    fn insert_object(&mut self, kind: ObjectKind, now: Instant) {
        let before = self.layers.clone();
        self.shape_counter += 1;
        let mut obj = CanvasObject::new(kind, format!("{} {}", kind.label(), self.shape_counter));
        let offset = (self.shape_counter % 8) as f32 * 24.0;
        obj.left = 120.0 + offset;
        obj.top = 100.0 + offset;
        if kind == ObjectKind::Text {
            obj.text = Some("New text".to_string());
            obj.fill = [30, 30, 30, 255];
        }
        let id = self.engine.add_object(obj);
        // Explicit user action: reconcile immediately instead of waiting
        // out the debounce window.
        self.force_sync(now);

        if let (Some(index), Some(obj)) = (self.engine.index_of(&id), self.engine.get(&id).cloned())
        {
            let mut cmd = InsertCommand::new(format!("Add {}", kind.label()), index, obj, before);
            cmd.set_after(self.layers.clone());
            self.history.push(Box::new(cmd));
        }
        self.document.mark_dirty();
    }

    /// Drain pending events and rebuild right now.
    fn force_sync(&mut self, now: Instant) {
        self.synchronizer.pump(&mut self.engine, now);
        self.synchronizer.request_recompute(now);
        if let Some(rebuilt) = self
            .synchronizer
            .poll_recompute(&mut self.engine, &self.layers, now)
            && rebuilt != self.layers
        {
            self.layers = reduce(
                std::mem::take(&mut self.layers),
                LayerEvent::SetLayers { layers: rebuilt },
            );
        }
    }

    fn undo(&mut self) {
        if let Some(description) = self.history.undo(&mut self.engine, &mut self.layers) {
            push_visibility(&mut self.engine, &self.layers);
            self.document.mark_dirty();
            self.persist_groups();
            log_info!("undo: {}", description);
        }
    }

    fn redo(&mut self) {
        if let Some(description) = self.history.redo(&mut self.engine, &mut self.layers) {
            push_visibility(&mut self.engine, &self.layers);
            self.document.mark_dirty();
            self.persist_groups();
            log_info!("redo: {}", description);
        }
    }

    /// Write the group layout when it changed, under both the fingerprint
    /// of the current content and the global fallback slot.
    fn persist_groups(&mut self) {
        let groups = collect_groups(&self.layers);
        if groups == self.last_saved_groups {
            return;
        }
        self.canvas_hash = content_hash(&self.engine.serialize());
        self.group_store.save_for_canvas(&self.canvas_hash, &groups);
        self.group_store.save(&groups);
        self.last_saved_groups = groups;
    }

    // ------------------------------------------------------------------
    // UI chrome
    // ------------------------------------------------------------------

    fn menu_bar(&mut self, ctx: &egui::Context, now: Instant) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("New").clicked() {
                        self.new_document(now);
                        ui.close_menu();
                    }
                    if ui.button("Open…").clicked() {
                        self.open_document(now);
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Save").clicked() {
                        self.save_document(false);
                        ui.close_menu();
                    }
                    if ui.button("Save As…").clicked() {
                        self.save_document(true);
                        ui.close_menu();
                    }
                });
                ui.menu_button("Edit", |ui| {
                    let undo_label = match self.history.undo_description() {
                        Some(desc) => format!("Undo {}", desc),
                        None => "Undo".to_string(),
                    };
                    if ui
                        .add_enabled(self.history.can_undo(), egui::Button::new(undo_label))
                        .clicked()
                    {
                        self.undo();
                        ui.close_menu();
                    }
                    let redo_label = match self.history.redo_description() {
                        Some(desc) => format!("Redo {}", desc),
                        None => "Redo".to_string(),
                    };
                    if ui
                        .add_enabled(self.history.can_redo(), egui::Button::new(redo_label))
                        .clicked()
                    {
                        self.redo();
                        ui.close_menu();
                    }
                });
                ui.menu_button("Insert", |ui| {
                    for kind in [ObjectKind::Rect, ObjectKind::Ellipse, ObjectKind::Text] {
                        if ui.button(kind.label()).clicked() {
                            self.insert_object(kind, now);
                            ui.close_menu();
                        }
                    }
                });
                ui.menu_button("View", |ui| {
                    ui.checkbox(&mut self.show_layers_window, "Layers");
                    ui.checkbox(&mut self.show_history_window, "History");
                });
            });
        });
    }

    fn keyboard_shortcuts(&mut self, ctx: &egui::Context) {
        let (undo, redo) = ctx.input(|i| {
            let z = i.key_pressed(egui::Key::Z);
            let y = i.key_pressed(egui::Key::Y);
            (
                i.modifiers.command && !i.modifiers.shift && z,
                i.modifiers.command && (i.modifiers.shift && z || y),
            )
        });
        if undo {
            self.undo();
        }
        if redo {
            self.redo();
        }
    }
}

impl Drop for RetouchrApp {
    fn drop(&mut self) {
        // Symmetric teardown: release every watcher and listener the
        // synchronizer registered over its lifetime.
        self.synchronizer.detach(&mut self.engine);
    }
}

impl eframe::App for RetouchrApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();

        if self.first_frame {
            self.first_frame = false;
            self.synchronizer.attach(&mut self.engine);
            self.initialize_layers(Vec::new(), now);
        }

        self.keyboard_shortcuts(ctx);
        self.menu_bar(ctx, now);

        egui::CentralPanel::default().show(ctx, |ui| {
            self.canvas_view.show(ui, &mut self.engine);
        });

        let mut requests = Vec::new();
        if self.show_layers_window {
            let mut open = true;
            egui::Window::new("Layers")
                .id(egui::Id::new("layers_window"))
                .default_width(260.0)
                .open(&mut open)
                .show(ctx, |ui| {
                    requests = self.layers_panel.show(ui, &self.layers);
                });
            self.show_layers_window = open;
        }
        if self.show_history_window {
            let mut open = true;
            egui::Window::new("History")
                .id(egui::Id::new("history_window"))
                .default_width(220.0)
                .open(&mut open)
                .show(ctx, |ui| {
                    self.history_panel.show(ui, &self.history);
                });
            self.show_history_window = open;
        }
        for request in requests {
            self.handle_request(request);
        }

        // Reconciliation tick: drain canvas events, then rebuild once the
        // quiet window has passed.  An unchanged rebuild dispatches and
        // persists nothing.
        if self.synchronizer.pump(&mut self.engine, now) > 0 {
            self.document.mark_dirty();
        }
        if let Some(rebuilt) = self
            .synchronizer
            .poll_recompute(&mut self.engine, &self.layers, now)
            && rebuilt != self.layers
        {
            self.layers = reduce(
                std::mem::take(&mut self.layers),
                LayerEvent::SetLayers { layers: rebuilt },
            );
            self.persist_groups();
        }
        if let Some(deadline) = self.synchronizer.pending_deadline() {
            ctx.request_repaint_after(deadline.saturating_duration_since(now));
        }

        let title = format!("{} — Retouchr", self.document.display_title());
        if title != self.window_title {
            self.window_title = title.clone();
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title));
        }
    }
}

/// A new document is not empty: a backdrop and a headline give the layer
/// panel something to show and the first grouping something to hold.
fn starter_objects(width: f32, height: f32) -> Vec<CanvasObject> {
    let mut backdrop = CanvasObject::new(ObjectKind::Rect, "Backdrop");
    backdrop.left = 0.0;
    backdrop.top = 0.0;
    backdrop.width = width;
    backdrop.height = height;
    backdrop.fill = [244, 242, 236, 255];

    let mut headline = CanvasObject::new(ObjectKind::Text, "Headline");
    headline.left = 64.0;
    headline.top = 56.0;
    headline.width = 320.0;
    headline.height = 40.0;
    headline.fill = [30, 30, 30, 255];
    headline.text = Some("Design something".to_string());

    vec![backdrop, headline]
}
