use serde::{Deserialize, Serialize};

use crate::{
    domain::{ElementRef, ExportFormat, ModalKind},
    error::HostError,
};

/// Host-facing description of one sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementRef>,
    pub id: String,
    pub name: String,
    /// Display position; `None` until the host orders its tabs.
    #[serde(default)]
    pub order: Option<u32>,
}

/// Source text pushed by the host together with the sheet it wants shown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    #[serde(default)]
    pub active_sheet: Option<SheetSummary>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active_sheet: None,
        }
    }

    pub fn with_active_sheet(mut self, sheet: SheetSummary) -> Self {
        self.active_sheet = Some(sheet);
        self
    }

    /// The desired element, if the host supplied one.
    pub fn desired_element(&self) -> Option<&ElementRef> {
        self.active_sheet
            .as_ref()
            .and_then(|sheet| sheet.element.as_ref())
    }
}

/// Selection-dependent flags, only present while a diagram sheet is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramFlags {
    pub edit_label: bool,
    pub lasso_tool: bool,
    pub move_canvas: bool,
    pub move_selection: bool,
    pub remove_selected: bool,
    pub zoom: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFlags {
    pub close: bool,
    pub save: bool,
    pub undo: bool,
    pub redo: bool,
    pub properties_panel: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_as: Vec<ExportFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<DiagramFlags>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub importing: bool,
    /// `None` until an active viewer exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandFlags>,
    /// Decision-table selection, fed to the menu policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_selection: Option<bool>,
}

impl SessionState {
    pub fn can_undo(&self) -> bool {
        self.commands.as_ref().is_some_and(|commands| commands.undo)
    }

    pub fn can_redo(&self) -> bool {
        self.commands.as_ref().is_some_and(|commands| commands.redo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub label: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator: Option<String>,
    pub enabled: bool,
}

impl MenuEntry {
    pub fn new(label: impl Into<String>, action: impl Into<String>, enabled: bool) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
            accelerator: None,
            enabled,
        }
    }

    pub fn with_accelerator(mut self, accelerator: impl Into<String>) -> Self {
        self.accelerator = Some(accelerator.into());
        self
    }
}

/// Session state merged with the menus derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub state: SessionState,
    pub edit_menu: Vec<MenuEntry>,
    pub window_menu: Vec<MenuEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HostEvent {
    /// Outcome of one import. A failure is also sent as [`HostEvent::Error`];
    /// hosts render import results from this event and show `Error` events
    /// as notifications.
    Imported {
        error: Option<HostError>,
        warnings: Vec<String>,
    },
    SheetsChanged {
        sheets: Vec<SheetSummary>,
        active_sheet: Option<SheetSummary>,
    },
    StateChanged(SessionSnapshot),
    Changed {
        dirty: bool,
    },
    /// Every surfaced failure, including failed imports.
    Error(HostError),
    ModalRequested(ModalKind),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn snapshot_omits_diagram_flags_for_other_kinds() {
        let snapshot = SessionSnapshot {
            state: SessionState {
                importing: false,
                commands: Some(CommandFlags {
                    close: true,
                    save: true,
                    undo: false,
                    redo: false,
                    properties_panel: true,
                    export_as: Vec::new(),
                    diagram: None,
                }),
                has_selection: Some(true),
            },
            edit_menu: Vec::new(),
            window_menu: Vec::new(),
        };

        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["importing"], false);
        assert_eq!(json["has_selection"], true);
        assert!(json["commands"].get("diagram").is_none());
        assert!(json["commands"].get("export_as").is_none());
    }

    #[test]
    fn host_events_are_tagged() {
        let event = HostEvent::Error(HostError::new(ErrorCode::SaveFailed, "disk full"));
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "save_failed");
    }

    #[test]
    fn deserialized_summary_carries_a_fresh_element() {
        let element = ElementRef::new("Decision_1", Some("Age Check".into()));
        let summary = SheetSummary {
            element: Some(element.clone()),
            id: "Decision_1".into(),
            name: "Age Check".into(),
            order: None,
        };

        let raw = serde_json::to_string(&summary).expect("serialize");
        let restored: SheetSummary = serde_json::from_str(&raw).expect("deserialize");
        let restored_element = restored.element.expect("element");

        assert_eq!(restored_element.id(), "Decision_1");
        assert!(!restored_element.is(&element));
    }
}
