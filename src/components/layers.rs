use std::collections::HashSet;

use eframe::egui;
use egui::{Align, Layout, RichText};

use crate::layers::{LayerNode, collect_ids};

/// Actions that need app-level handling (reducer dispatch, canvas pushes,
/// history records).  The panel only reads the tree; every edit is
/// deferred through one of these.
#[derive(Debug, Clone)]
pub enum PanelRequest {
    Select { id: String, additive: bool },
    ToggleVisibility(String),
    ToggleExpand(String),
    Rename { id: String, name: String },
    /// Group the current multi-selection.
    GroupSelection,
    Ungroup(String),
    Move { id: String, up: bool },
    Delete(String),
}

/// Ephemeral selection state.  Lives with the panel, never persisted,
/// and never part of the tree itself.
#[derive(Default)]
pub struct SelectionState {
    pub primary: Option<String>,
    pub multi: HashSet<String>,
}

impl SelectionState {
    pub fn clear(&mut self) {
        self.primary = None;
        self.multi.clear();
    }

    /// Plain click: this layer becomes the whole selection.
    pub fn set(&mut self, id: &str) {
        self.primary = Some(id.to_string());
        self.multi.clear();
        self.multi.insert(id.to_string());
    }

    /// Shift-click: toggle membership, keeping `primary` on the most
    /// recent addition.
    pub fn toggle(&mut self, id: &str) {
        if self.multi.contains(id) {
            self.multi.remove(id);
            if self.primary.as_deref() == Some(id) {
                self.primary = self.multi.iter().next().cloned();
            }
        } else {
            self.multi.insert(id.to_string());
            self.primary = Some(id.to_string());
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.multi.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.multi.iter().cloned().collect()
    }

    /// Drop ids that no longer exist in the tree (after deletes or a
    /// resynchronization pass).
    pub fn retain_existing(&mut self, layers: &[LayerNode]) {
        let live: HashSet<String> = collect_ids(layers).into_iter().collect();
        self.multi.retain(|id| live.contains(id));
        if let Some(primary) = &self.primary
            && !live.contains(primary)
        {
            self.primary = self.multi.iter().next().cloned();
        }
    }
}

/// State for inline rename.
#[derive(Default)]
struct RenameState {
    renaming: Option<String>,
    text: String,
    focus_requested: bool,
}

#[derive(Default)]
pub struct LayersPanel {
    pub selection: SelectionState,
    rename: RenameState,
}

impl LayersPanel {
    /// Render the panel and return the edits the user asked for this
    /// frame.  Rows follow tree order: the top row is the top of the
    /// stack, groups indent their children.
    pub fn show(&mut self, ui: &mut egui::Ui, layers: &[LayerNode]) -> Vec<PanelRequest> {
        let mut out = Vec::new();
        self.selection.retain_existing(layers);

        ui.horizontal(|ui| {
            let can_group = self.selection.multi.len() >= 2;
            if ui
                .add_enabled(can_group, egui::Button::new("Group"))
                .on_hover_text("Group the selected layers")
                .clicked()
            {
                out.push(PanelRequest::GroupSelection);
            }
            let ungroup_target = self
                .selection
                .primary
                .as_ref()
                .and_then(|id| crate::layers::find_by_id(layers, id))
                .filter(|n| n.is_group())
                .map(|n| n.id().to_string());
            if ui
                .add_enabled(ungroup_target.is_some(), egui::Button::new("Ungroup"))
                .clicked()
                && let Some(id) = ungroup_target
            {
                out.push(PanelRequest::Ungroup(id));
            }
        });
        ui.add_space(2.0);

        if layers.is_empty() {
            ui.vertical_centered(|ui| {
                ui.add_space(20.0);
                ui.label(RichText::new("No layers yet").weak());
            });
        } else {
            let scroll_h = (ui.available_height() - 40.0).max(80.0);
            egui::ScrollArea::vertical()
                .id_source("layer_scroll")
                .max_height(scroll_h)
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    self.show_level(ui, layers, 0, &mut out);
                });
        }

        ui.add_space(4.0);
        ui.separator();
        ui.horizontal(|ui| {
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                let count = collect_ids(layers).len();
                ui.label(RichText::new(format!("{}", count)).size(11.0).weak());
            });
        });

        out
    }

    fn show_level(
        &mut self,
        ui: &mut egui::Ui,
        nodes: &[LayerNode],
        depth: usize,
        out: &mut Vec<PanelRequest>,
    ) {
        let last = nodes.len().saturating_sub(1);
        for (pos, node) in nodes.iter().enumerate() {
            // Tree order is display order: index 0 is the top of the stack
            // and the top row, so "up" swaps toward the start of the level.
            self.show_row(ui, node, depth, pos > 0, pos < last, out);
            if let LayerNode::Group(group) = node
                && group.expanded
            {
                self.show_level(ui, &group.children, depth + 1, out);
            }
        }
    }

    fn show_row(
        &mut self,
        ui: &mut egui::Ui,
        node: &LayerNode,
        depth: usize,
        can_move_up: bool,
        can_move_down: bool,
        out: &mut Vec<PanelRequest>,
    ) {
        let id = node.id().to_string();
        let is_selected = self.selection.is_selected(&id);
        let is_renaming = self.rename.renaming.as_deref() == Some(id.as_str());

        ui.horizontal(|ui| {
            ui.add_space(6.0 + depth as f32 * 14.0);

            if let LayerNode::Group(group) = node {
                let arrow = if group.expanded { "⏷" } else { "⏵" };
                if ui.small_button(arrow).clicked() {
                    out.push(PanelRequest::ToggleExpand(id.clone()));
                }
            } else {
                ui.add_space(18.0);
            }

            let eye = if node.is_visible() {
                RichText::new("👁")
            } else {
                RichText::new("👁").weak()
            };
            let eye_response = ui.small_button(eye).on_hover_text(if node.is_visible() {
                "Hide layer"
            } else {
                "Show layer"
            });
            if eye_response.clicked() {
                out.push(PanelRequest::ToggleVisibility(id.clone()));
            }

            if is_renaming {
                let edit = egui::TextEdit::singleline(&mut self.rename.text)
                    .font(egui::TextStyle::Body)
                    .desired_width(ui.available_width() - 48.0);
                let response = ui.add(edit);
                if self.rename.focus_requested {
                    response.request_focus();
                    self.rename.focus_requested = false;
                }
                if response.lost_focus() {
                    let cancelled = ui.input(|i| i.key_pressed(egui::Key::Escape));
                    if !cancelled && !self.rename.text.is_empty() && self.rename.text != node.name()
                    {
                        out.push(PanelRequest::Rename {
                            id: id.clone(),
                            name: self.rename.text.clone(),
                        });
                    }
                    self.rename.renaming = None;
                }
            } else {
                let label = if node.is_group() {
                    format!("{} ({})", node.name(), group_size(node))
                } else {
                    node.name().to_string()
                };
                let text = if node.is_visible() {
                    RichText::new(label).size(13.0)
                } else {
                    RichText::new(label).size(13.0).weak()
                };
                let response = ui.selectable_label(is_selected, text);
                if response.clicked() {
                    let additive = ui.input(|i| i.modifiers.shift);
                    if additive {
                        self.selection.toggle(&id);
                    } else {
                        self.selection.set(&id);
                    }
                    out.push(PanelRequest::Select {
                        id: id.clone(),
                        additive,
                    });
                }
                if response.double_clicked() {
                    self.start_rename(node);
                }
                self.row_context_menu(response, node, out);
            }

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if ui
                    .add_enabled(can_move_down, egui::Button::new("▼").small())
                    .on_hover_text("Move layer down")
                    .clicked()
                {
                    out.push(PanelRequest::Move {
                        id: id.clone(),
                        up: false,
                    });
                }
                if ui
                    .add_enabled(can_move_up, egui::Button::new("▲").small())
                    .on_hover_text("Move layer up")
                    .clicked()
                {
                    out.push(PanelRequest::Move {
                        id: id.clone(),
                        up: true,
                    });
                }
            });
        });
    }

    fn row_context_menu(
        &mut self,
        response: egui::Response,
        node: &LayerNode,
        out: &mut Vec<PanelRequest>,
    ) {
        let id = node.id().to_string();
        response.context_menu(|ui| {
            if ui.button("Rename").clicked() {
                self.start_rename(node);
                ui.close_menu();
            }
            if ui
                .add_enabled(
                    self.selection.multi.len() >= 2,
                    egui::Button::new("Group selected"),
                )
                .clicked()
            {
                out.push(PanelRequest::GroupSelection);
                ui.close_menu();
            }
            if node.is_group() && ui.button("Ungroup").clicked() {
                out.push(PanelRequest::Ungroup(id.clone()));
                ui.close_menu();
            }
            ui.separator();
            if ui.button("Move up").clicked() {
                out.push(PanelRequest::Move {
                    id: id.clone(),
                    up: true,
                });
                ui.close_menu();
            }
            if ui.button("Move down").clicked() {
                out.push(PanelRequest::Move {
                    id: id.clone(),
                    up: false,
                });
                ui.close_menu();
            }
            ui.separator();
            if ui.button("Delete").clicked() {
                out.push(PanelRequest::Delete(id.clone()));
                ui.close_menu();
            }
        });
    }

    fn start_rename(&mut self, node: &LayerNode) {
        self.rename.renaming = Some(node.id().to_string());
        self.rename.text = node.name().to_string();
        self.rename.focus_requested = true;
    }
}

fn group_size(node: &LayerNode) -> usize {
    match node {
        LayerNode::Group(g) => g.children.len(),
        LayerNode::Object(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{GroupLayer, ObjectLayer};

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

    #[test]
    fn toggle_tracks_primary_on_latest_addition() {
        let mut sel = SelectionState::default();
        sel.toggle("a");
        sel.toggle("b");
        assert_eq!(sel.primary.as_deref(), Some("b"));
        assert!(sel.is_selected("a") && sel.is_selected("b"));
        sel.toggle("b");
        assert_eq!(sel.primary.as_deref(), Some("a"));
    }

    #[test]
    fn plain_set_replaces_the_whole_selection() {
        let mut sel = SelectionState::default();
        sel.toggle("a");
        sel.toggle("b");
        sel.set("c");
        assert_eq!(sel.ids(), vec!["c".to_string()]);
        assert_eq!(sel.primary.as_deref(), Some("c"));
    }

    #[test]
    fn retain_existing_prunes_stale_ids() {
        let mut sel = SelectionState::default();
        sel.toggle("a");
        sel.toggle("gone");
        let tree = vec![
            obj("a"),
            LayerNode::Group(GroupLayer {
                id: "g".to_string(),
                name: "g".to_string(),
                visible: true,
                editable: true,
                expanded: true,
                children: vec![obj("b")],
            }),
        ];
        sel.retain_existing(&tree);
        assert!(sel.is_selected("a"));
        assert!(!sel.is_selected("gone"));
        assert_eq!(sel.primary.as_deref(), Some("a"));
    }
}
