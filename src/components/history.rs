use std::collections::VecDeque;

use eframe::egui;

use crate::canvas::{CanvasEngine, CanvasObject};
use crate::layers::LayerNode;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.  Commands restore both sides of
/// the editor state: the canvas object graph and the layer tree.
pub trait Command {
    fn undo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>);
    fn redo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

fn tree_memory(nodes: &[LayerNode]) -> usize {
    nodes
        .iter()
        .map(|node| {
            std::mem::size_of::<LayerNode>()
                + node.id().len()
                + node.name().len()
                + match node {
                    LayerNode::Group(g) => tree_memory(&g.children),
                    LayerNode::Object(o) => o.object_ref.len() + o.kind.len(),
                }
        })
        .sum()
}

// ============================================================================
// TREE COMMAND — before/after snapshot of the layer tree
// ============================================================================

/// Structural layer edits (group, ungroup, rename, visibility, reorder)
/// leave the canvas objects alone, so capturing the tree on both sides of
/// the edit is a complete undo record.  Create BEFORE the edit, then call
/// `set_after()`.
pub struct TreeCommand {
    description: String,
    before: Vec<LayerNode>,
    after: Vec<LayerNode>,
}

impl TreeCommand {
    pub fn new(description: impl Into<String>, before: Vec<LayerNode>) -> Self {
        Self {
            description: description.into(),
            before,
            after: Vec::new(),
        }
    }

    pub fn set_after(&mut self, after: Vec<LayerNode>) {
        self.after = after;
    }
}

impl Command for TreeCommand {
    fn undo(&self, _canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        *layers = self.before.clone();
    }

    fn redo(&self, _canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        *layers = self.after.clone();
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        tree_memory(&self.before) + tree_memory(&self.after)
    }
}

// ============================================================================
// DELETE COMMAND — removes canvas objects, restores them on undo
// ============================================================================

/// Deleting a layer removes its underlying canvas objects, so the undo
/// record carries the removed objects with their paint indices.  Indices
/// are re-applied lowest-first so each insert lands where the object
/// originally sat.
pub struct DeleteCommand {
    description: String,
    removed: Vec<(usize, CanvasObject)>,
    before: Vec<LayerNode>,
    after: Vec<LayerNode>,
}

impl DeleteCommand {
    pub fn new(
        description: impl Into<String>,
        mut removed: Vec<(usize, CanvasObject)>,
        before: Vec<LayerNode>,
    ) -> Self {
        removed.sort_by_key(|(index, _)| *index);
        Self {
            description: description.into(),
            removed,
            before,
            after: Vec::new(),
        }
    }

    pub fn set_after(&mut self, after: Vec<LayerNode>) {
        self.after = after;
    }
}

impl Command for DeleteCommand {
    fn undo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        for (index, obj) in &self.removed {
            canvas.insert_object_at(*index, obj.clone());
        }
        *layers = self.before.clone();
    }

    fn redo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        for (_, obj) in &self.removed {
            canvas.remove_object(&obj.id);
        }
        *layers = self.after.clone();
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.removed
            .iter()
            .map(|(_, obj)| {
                std::mem::size_of::<CanvasObject>()
                    + obj.id.len()
                    + obj.name.len()
                    + obj.text.as_ref().map_or(0, |t| t.len())
            })
            .sum::<usize>()
            + tree_memory(&self.before)
            + tree_memory(&self.after)
    }
}

// ============================================================================
// INSERT COMMAND — adds a canvas object, removes it on undo
// ============================================================================

pub struct InsertCommand {
    description: String,
    index: usize,
    object: CanvasObject,
    before: Vec<LayerNode>,
    after: Vec<LayerNode>,
}

impl InsertCommand {
    pub fn new(
        description: impl Into<String>,
        index: usize,
        object: CanvasObject,
        before: Vec<LayerNode>,
    ) -> Self {
        Self {
            description: description.into(),
            index,
            object,
            before,
            after: Vec::new(),
        }
    }

    pub fn set_after(&mut self, after: Vec<LayerNode>) {
        self.after = after;
    }
}

impl Command for InsertCommand {
    fn undo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        canvas.remove_object(&self.object.id);
        *layers = self.before.clone();
    }

    fn redo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        canvas.insert_object_at(self.index, self.object.clone());
        *layers = self.after.clone();
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<CanvasObject>()
            + self.object.name.len()
            + tree_memory(&self.before)
            + tree_memory(&self.after)
    }
}

// ============================================================================
// REORDER COMMAND — tree move plus the matching canvas stacking swap
// ============================================================================

/// Moving an object layer swaps its canvas stacking position, so undoing
/// the move has to swap the object back as well as restoring the tree.
/// `object_ref` is `None` for group moves, which exist only in the tree.
pub struct ReorderCommand {
    description: String,
    object_ref: Option<String>,
    up: bool,
    before: Vec<LayerNode>,
    after: Vec<LayerNode>,
}

impl ReorderCommand {
    pub fn new(
        description: impl Into<String>,
        object_ref: Option<String>,
        up: bool,
        before: Vec<LayerNode>,
    ) -> Self {
        Self {
            description: description.into(),
            object_ref,
            up,
            before,
            after: Vec::new(),
        }
    }

    pub fn set_after(&mut self, after: Vec<LayerNode>) {
        self.after = after;
    }

    fn swap(&self, canvas: &mut CanvasEngine, up: bool) {
        if let Some(object_ref) = &self.object_ref {
            if up {
                canvas.bring_forward(object_ref);
            } else {
                canvas.send_backward(object_ref);
            }
        }
    }
}

impl Command for ReorderCommand {
    fn undo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        self.swap(canvas, !self.up);
        *layers = self.before.clone();
    }

    fn redo(&self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) {
        self.swap(canvas, self.up);
        *layers = self.after.clone();
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        tree_memory(&self.before) + tree_memory(&self.after)
    }
}

// ============================================================================
// HISTORY MANAGER — undo/redo stacks with count and memory limits
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(8 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        // A new edit invalidates everything that was undone.
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);
        self.prune();
    }

    pub fn undo(&mut self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(canvas, layers);
        self.redo_stack.push_back(command);
        Some(description)
    }

    pub fn redo(&mut self, canvas: &mut CanvasEngine, layers: &mut Vec<LayerNode>) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(canvas, layers);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// All undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }
}

// ============================================================================
// HISTORY PANEL
// ============================================================================

#[derive(Default)]
pub struct HistoryPanel;

impl HistoryPanel {
    pub fn show(&mut self, ui: &mut egui::Ui, history: &HistoryManager) {
        ui.horizontal(|ui| {
            ui.label(format!(
                "Undo: {} | Redo: {}",
                history.undo_count(),
                history.redo_count()
            ));
        });
        egui::ScrollArea::vertical()
            .id_source("history_scroll")
            .max_height(180.0)
            .show(ui, |ui| {
                let items = history.undo_history();
                if items.is_empty() {
                    ui.weak("No history yet");
                } else {
                    for (i, desc) in items.iter().enumerate() {
                        let text = if i == 0 {
                            egui::RichText::new(format!("▶ {}", desc)).strong().size(11.0)
                        } else {
                            egui::RichText::new(format!("  {}", desc)).weak().size(11.0)
                        };
                        ui.label(text);
                    }
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ObjectKind;
    use crate::layers::reducer::{LayerEvent, reduce};
    use crate::layers::sync::rebuild_layers;

    #[test]
    fn tree_command_round_trips_the_tree() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        engine.load_objects(vec![
            CanvasObject::new(ObjectKind::Rect, "a"),
            CanvasObject::new(ObjectKind::Rect, "b"),
        ]);
        let before = rebuild_layers(&engine, &[]);
        let ids: Vec<String> = before.iter().map(|n| n.id().to_string()).collect();
        let after = reduce(
            before.clone(),
            LayerEvent::Group { ids, name: None },
        );

        let mut cmd = TreeCommand::new("Group layers", before.clone());
        cmd.set_after(after.clone());

        let mut history = HistoryManager::new(10);
        history.push(Box::new(cmd));
        let mut layers = after.clone();
        history.undo(&mut engine, &mut layers);
        assert_eq!(layers, before);
        history.redo(&mut engine, &mut layers);
        assert_eq!(layers, after);
    }

    #[test]
    fn delete_command_restores_canvas_objects_in_place() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        engine.load_objects(vec![
            CanvasObject::new(ObjectKind::Rect, "a"),
            CanvasObject::new(ObjectKind::Rect, "b"),
            CanvasObject::new(ObjectKind::Rect, "c"),
        ]);
        let before = rebuild_layers(&engine, &[]);
        let victim = engine.objects()[1].id.clone();
        let removed = vec![engine.remove_object(&victim).unwrap()];
        let after = rebuild_layers(&engine, &before);

        let mut cmd = DeleteCommand::new("Delete layer", removed, before.clone());
        cmd.set_after(after.clone());
        let mut history = HistoryManager::new(10);
        history.push(Box::new(cmd));

        let mut layers = after;
        history.undo(&mut engine, &mut layers);
        assert_eq!(engine.objects().len(), 3);
        assert_eq!(engine.objects()[1].id, victim);
        assert_eq!(layers, before);

        history.redo(&mut engine, &mut layers);
        assert_eq!(engine.objects().len(), 2);
        assert!(engine.get(&victim).is_none());
    }

    #[test]
    fn new_edit_clears_the_redo_stack() {
        let mut engine = CanvasEngine::new(800.0, 600.0);
        engine.load_objects(Vec::new());
        let mut history = HistoryManager::new(10);
        let mut layers: Vec<LayerNode> = Vec::new();

        let mut cmd = TreeCommand::new("first", Vec::new());
        cmd.set_after(Vec::new());
        history.push(Box::new(cmd));
        history.undo(&mut engine, &mut layers);
        assert!(history.can_redo());

        let mut cmd = TreeCommand::new("second", Vec::new());
        cmd.set_after(Vec::new());
        history.push(Box::new(cmd));
        assert!(!history.can_redo());
    }

    #[test]
    fn history_is_pruned_by_count() {
        let mut history = HistoryManager::new(2);
        for i in 0..5 {
            let mut cmd = TreeCommand::new(format!("edit {}", i), Vec::new());
            cmd.set_after(Vec::new());
            history.push(Box::new(cmd));
        }
        assert_eq!(history.undo_count(), 2);
        assert_eq!(history.undo_description().as_deref(), Some("edit 4"));
    }
}
