//! Interface of the multi-sheet modeling engine hosted by an editor session.
//!
//! The engine owns parsing, rendering and the per-sheet command stacks. A
//! session only selects among the sheets it reports and reads capabilities
//! off the active viewer.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{CanvasTarget, ElementRef, PanelTarget, SheetKind};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod scripted;

pub use scripted::ScriptedEngine;

/// One editable facet of a document.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub element: ElementRef,
    pub kind: SheetKind,
}

impl Sheet {
    pub fn new(element: ElementRef, kind: SheetKind) -> Self {
        Self { element, kind }
    }

    pub fn is_same(&self, other: &Sheet) -> bool {
        self.element.is(&other.element)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Open the initial view as part of the import.
    pub open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    pub format: bool,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to import document: {message}")]
    Import {
        message: String,
        warnings: Vec<String>,
    },
    #[error("failed to serialize document: {0}")]
    Serialize(String),
    #[error("failed to export sheet: {0}")]
    Export(String),
    #[error("rendering fault: {0}")]
    Rendering(String),
    #[error("viewer capability `{0}` is unavailable")]
    MissingCapability(&'static str),
    #[error("unknown editor action `{0}`")]
    UnknownAction(String),
    #[error("sheet `{0}` is not part of the current document")]
    UnknownSheet(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    SaveCompleted,
    Attached,
    SelectionChanged,
    DirectEditingChanged,
    ContentChanged,
    ViewsChanged,
    Error,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    SaveCompleted,
    Attached,
    SelectionChanged,
    DirectEditingChanged,
    ContentChanged,
    ViewsChanged {
        views: Vec<Sheet>,
        active_view: Option<Sheet>,
    },
    Error(EngineError),
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::SaveCompleted => EngineEventKind::SaveCompleted,
            EngineEvent::Attached => EngineEventKind::Attached,
            EngineEvent::SelectionChanged => EngineEventKind::SelectionChanged,
            EngineEvent::DirectEditingChanged => EngineEventKind::DirectEditingChanged,
            EngineEvent::ContentChanged => EngineEventKind::ContentChanged,
            EngineEvent::ViewsChanged { .. } => EngineEventKind::ViewsChanged,
            EngineEvent::Error(_) => EngineEventKind::Error,
        }
    }
}

pub trait CommandStack: Send + Sync {
    fn can_undo(&self) -> bool;
    fn can_redo(&self) -> bool;
    fn undo(&self);
    fn redo(&self);
}

pub trait Selection: Send + Sync {
    fn selected(&self) -> Vec<ElementRef>;

    fn has_selection(&self) -> bool {
        !self.selected().is_empty()
    }
}

pub trait EditorActions: Send + Sync {
    fn trigger(&self, action: &str) -> Result<(), EngineError>;
}

pub trait PropertiesPanel: Send + Sync {
    fn attach_to(&self, target: PanelTarget);
    fn detach(&self);
}

#[async_trait]
pub trait VectorExport: Send + Sync {
    async fn save_svg(&self) -> Result<String, EngineError>;
}

/// Viewer rendering one sheet. Capabilities are optional: a query for one the
/// viewer lacks yields `None`.
pub trait Viewer: Send + Sync {
    fn kind(&self) -> SheetKind;
    fn command_stack(&self) -> Option<Arc<dyn CommandStack>>;
    fn selection(&self) -> Option<Arc<dyn Selection>>;
    fn editor_actions(&self) -> Option<Arc<dyn EditorActions>>;
    fn properties_panel(&self) -> Option<Arc<dyn PropertiesPanel>>;

    fn vector_export(&self) -> Option<Arc<dyn VectorExport>> {
        None
    }
}

#[async_trait]
pub trait ModelingEngine: Send + Sync {
    async fn import(&self, text: &str, options: ImportOptions)
        -> Result<ImportReport, EngineError>;
    async fn serialize(&self, options: SerializeOptions) -> Result<String, EngineError>;

    fn views(&self) -> Vec<Sheet>;
    /// Identity lookup.
    fn view(&self, element: &ElementRef) -> Option<Sheet>;
    fn active_view(&self) -> Option<Sheet>;
    fn active_viewer(&self) -> Option<Arc<dyn Viewer>>;
    fn viewer_for(&self, sheet: &Sheet) -> Option<Arc<dyn Viewer>>;
    /// The view the engine would show first after an import.
    fn initial_view(&self) -> Option<Sheet>;
    fn open(&self, sheet: &Sheet) -> Result<(), EngineError>;

    fn attach_to(&self, target: CanvasTarget);
    fn detach(&self);
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent>;
    fn destroy(&self);
}
