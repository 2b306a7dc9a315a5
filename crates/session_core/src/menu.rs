use shared::{
    domain::SheetKind,
    protocol::{MenuEntry, SessionState},
};

use crate::MenuPolicy;

/// Edit and window menus for the three sheet kinds.
pub struct StandardMenuPolicy;

fn undo_redo(state: &SessionState) -> Vec<MenuEntry> {
    vec![
        MenuEntry::new("Undo", "undo", state.can_undo()).with_accelerator("CommandOrControl+Z"),
        MenuEntry::new("Redo", "redo", state.can_redo()).with_accelerator("CommandOrControl+Y"),
    ]
}

fn drd_entries(state: &SessionState) -> Vec<MenuEntry> {
    let Some(flags) = state
        .commands
        .as_ref()
        .and_then(|commands| commands.diagram)
    else {
        return Vec::new();
    };

    vec![
        MenuEntry::new("Edit Label", "directEditing", flags.edit_label).with_accelerator("E"),
        MenuEntry::new("Lasso Tool", "lassoTool", flags.lasso_tool).with_accelerator("L"),
        MenuEntry::new("Hand Tool", "handTool", flags.move_canvas).with_accelerator("H"),
        MenuEntry::new("Move Selection", "moveSelection", flags.move_selection),
        MenuEntry::new("Remove Selected", "removeSelection", flags.remove_selected)
            .with_accelerator("Delete"),
        MenuEntry::new("Zoom In", "stepZoom", flags.zoom).with_accelerator("CommandOrControl+="),
        MenuEntry::new("Zoom Out", "stepZoom", flags.zoom).with_accelerator("CommandOrControl+-"),
    ]
}

fn decision_table_entries(state: &SessionState) -> Vec<MenuEntry> {
    let selected = state.has_selection.unwrap_or(false);
    vec![
        MenuEntry::new("Add Rule", "addRule", true),
        MenuEntry::new("Remove Rule", "removeRule", selected),
        MenuEntry::new("Add Input", "addInput", true),
        MenuEntry::new("Remove Input", "removeInput", selected),
        MenuEntry::new("Add Output", "addOutput", true),
        MenuEntry::new("Remove Output", "removeOutput", selected),
    ]
}

impl MenuPolicy for StandardMenuPolicy {
    fn edit_menu(&self, kind: SheetKind, state: &SessionState) -> Vec<MenuEntry> {
        let mut entries = undo_redo(state);
        match kind {
            SheetKind::Drd => entries.extend(drd_entries(state)),
            SheetKind::DecisionTable => entries.extend(decision_table_entries(state)),
            SheetKind::LiteralExpression => {}
        }
        entries.push(
            MenuEntry::new("Select All", "selectAll", !state.importing)
                .with_accelerator("CommandOrControl+A"),
        );
        entries
    }

    fn window_menu(&self, state: &SessionState) -> Vec<MenuEntry> {
        let panel = state
            .commands
            .as_ref()
            .is_some_and(|commands| commands.properties_panel);
        vec![
            MenuEntry::new("Toggle Properties Panel", "toggleProperties", panel)
                .with_accelerator("CommandOrControl+P"),
            MenuEntry::new("Reset Properties Panel", "resetProperties", panel)
                .with_accelerator("CommandOrControl+Shift+P"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{CommandFlags, DiagramFlags};

    fn state(diagram: Option<DiagramFlags>, has_selection: Option<bool>) -> SessionState {
        SessionState {
            importing: false,
            commands: Some(CommandFlags {
                close: true,
                save: true,
                undo: true,
                redo: false,
                properties_panel: true,
                export_as: Vec::new(),
                diagram,
            }),
            has_selection,
        }
    }

    fn enabled(entries: &[MenuEntry], action: &str) -> bool {
        entries
            .iter()
            .find(|entry| entry.action == action)
            .map(|entry| entry.enabled)
            .unwrap_or_else(|| panic!("missing menu entry {action}"))
    }

    #[test]
    fn decision_table_removals_follow_selection() {
        let policy = StandardMenuPolicy;

        let without = policy.edit_menu(SheetKind::DecisionTable, &state(None, Some(false)));
        assert!(!enabled(&without, "removeRule"));
        assert!(enabled(&without, "addRule"));
        assert!(enabled(&without, "undo"));
        assert!(!enabled(&without, "redo"));

        let with = policy.edit_menu(SheetKind::DecisionTable, &state(None, Some(true)));
        assert!(enabled(&with, "removeRule"));
    }

    #[test]
    fn literal_expression_menu_has_no_tool_entries() {
        let entries = StandardMenuPolicy.edit_menu(SheetKind::LiteralExpression, &state(None, None));
        let actions = entries
            .iter()
            .map(|entry| entry.action.as_str())
            .collect::<Vec<_>>();
        assert_eq!(actions, vec!["undo", "redo", "selectAll"]);
    }

    #[test]
    fn drd_menu_mirrors_diagram_flags() {
        let flags = DiagramFlags {
            edit_label: false,
            lasso_tool: true,
            move_canvas: true,
            move_selection: false,
            remove_selected: false,
            zoom: true,
        };
        let entries = StandardMenuPolicy.edit_menu(SheetKind::Drd, &state(Some(flags), None));

        assert!(!enabled(&entries, "directEditing"));
        assert!(enabled(&entries, "lassoTool"));
        assert!(!enabled(&entries, "removeSelection"));
    }

    #[test]
    fn window_menu_requires_commands() {
        let empty = StandardMenuPolicy.window_menu(&SessionState::default());
        assert!(empty.iter().all(|entry| !entry.enabled));

        let ready = StandardMenuPolicy.window_menu(&state(None, None));
        assert!(ready.iter().all(|entry| entry.enabled));
    }
}
