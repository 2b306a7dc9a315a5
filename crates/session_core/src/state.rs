use modeling_engine::{ModelingEngine, Sheet, Viewer};
use shared::{
    domain::{ExportFormat, SheetKind},
    protocol::{CommandFlags, DiagramFlags, SheetSummary},
};

/// Display name of a sheet. Diagrams are always "Diagram"; other kinds use
/// the element name, falling back to a label for the kind.
pub fn sheet_name(sheet: &Sheet) -> String {
    if sheet.kind.is_diagram() {
        return SheetKind::Drd.fallback_name().to_string();
    }

    sheet
        .element
        .name()
        .filter(|name| !name.is_empty())
        .unwrap_or(sheet.kind.fallback_name())
        .to_string()
}

pub fn summarize(sheet: &Sheet) -> SheetSummary {
    SheetSummary {
        element: Some(sheet.element.clone()),
        id: sheet.element.id().to_string(),
        name: sheet_name(sheet),
        order: None,
    }
}

pub(crate) fn summarize_views(
    views: &[Sheet],
    active_view: Option<&Sheet>,
) -> (Vec<SheetSummary>, Option<SheetSummary>) {
    let mut active_sheet = None;
    let sheets = views
        .iter()
        .map(|view| {
            let summary = summarize(view);
            if active_view.is_some_and(|active| active.is_same(view)) {
                active_sheet = Some(summary.clone());
            }
            summary
        })
        .collect();
    (sheets, active_sheet)
}

pub(crate) fn export_formats(kind: SheetKind, raster: ExportFormat) -> Vec<ExportFormat> {
    if !kind.supports_vector_export() {
        return Vec::new();
    }
    if raster.is_vector() {
        return vec![ExportFormat::Svg];
    }
    vec![ExportFormat::Svg, raster]
}

/// Command availability for the active viewer. The second value is the
/// decision-table selection state handed to the menu policy.
pub(crate) fn command_flags(
    kind: SheetKind,
    viewer: &dyn Viewer,
    input_active: bool,
    raster: ExportFormat,
) -> (CommandFlags, Option<bool>) {
    let stack = viewer.command_stack();
    let has_selection = viewer
        .selection()
        .is_some_and(|selection| selection.has_selection());

    let diagram = kind.is_diagram().then_some(DiagramFlags {
        edit_label: !input_active && has_selection,
        lasso_tool: !input_active,
        move_canvas: !input_active,
        move_selection: !input_active && has_selection,
        remove_selected: false,
        zoom: true,
    });

    let flags = CommandFlags {
        close: true,
        save: true,
        undo: stack.as_ref().is_some_and(|stack| stack.can_undo()),
        redo: stack.as_ref().is_some_and(|stack| stack.can_redo()),
        properties_panel: true,
        export_as: export_formats(kind, raster),
        diagram,
    };

    let table_selection = (kind == SheetKind::DecisionTable).then_some(has_selection);
    (flags, table_selection)
}

/// True when any sheet, active or not, has something to undo.
pub(crate) fn is_dirty(engine: &dyn ModelingEngine) -> bool {
    engine
        .views()
        .iter()
        .filter_map(|view| engine.viewer_for(view))
        .filter_map(|viewer| viewer.command_stack())
        .any(|stack| stack.can_undo())
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
