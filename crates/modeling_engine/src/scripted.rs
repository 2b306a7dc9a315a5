//! In-memory engine driven by a JSON sheet manifest.
//!
//! It does not render anything. Tests and the probe binary use it to stand in
//! for a real engine: it keeps per-sheet command stacks, selections and
//! properties-panel attachments, and emits the same events a real engine
//! would.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{CanvasTarget, ElementRef, PanelTarget, SheetKind};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::{
    CommandStack, EditorActions, EngineError, EngineEvent, ImportOptions, ImportReport,
    ModelingEngine, PropertiesPanel, SerializeOptions, Selection, Sheet, VectorExport, Viewer,
};

const EVENT_CAPACITY: usize = 256;

const DRD_ACTIONS: &[&str] = &[
    "selectAll",
    "lassoTool",
    "handTool",
    "directEditing",
    "moveCanvas",
    "moveSelection",
    "stepZoom",
    "zoom",
];
const TABLE_ACTIONS: &[&str] = &[
    "selectAll",
    "addRule",
    "removeRule",
    "addInput",
    "removeInput",
    "addOutput",
    "removeOutput",
];
const LITERAL_ACTIONS: &[&str] = &["selectAll"];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One sheet entry in a scripted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSpec {
    pub id: String,
    pub kind: SheetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SheetSpec {
    pub fn new(id: impl Into<String>, kind: SheetKind, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    sheets: Vec<SheetSpec>,
}

/// Renders a document the scripted engine can import.
pub fn manifest(sheets: &[SheetSpec]) -> String {
    let manifest = Manifest {
        sheets: sheets.to_vec(),
    };
    serde_json::to_string(&manifest).unwrap_or_default()
}

pub struct ScriptedCommandStack {
    undo_depth: AtomicUsize,
    redo_depth: AtomicUsize,
    events: broadcast::Sender<EngineEvent>,
}

impl ScriptedCommandStack {
    fn with_events(events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            undo_depth: AtomicUsize::new(0),
            redo_depth: AtomicUsize::new(0),
            events,
        }
    }

    /// Records an edit, discarding the redo history.
    pub fn execute(&self) {
        self.undo_depth.fetch_add(1, Ordering::SeqCst);
        self.redo_depth.store(0, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        let _ = self.events.send(EngineEvent::ContentChanged);
    }
}

impl CommandStack for ScriptedCommandStack {
    fn can_undo(&self) -> bool {
        self.undo_depth.load(Ordering::SeqCst) > 0
    }

    fn can_redo(&self) -> bool {
        self.redo_depth.load(Ordering::SeqCst) > 0
    }

    fn undo(&self) {
        let undone = self
            .undo_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1))
            .is_ok();
        if undone {
            self.redo_depth.fetch_add(1, Ordering::SeqCst);
            self.notify();
        }
    }

    fn redo(&self) {
        let redone = self
            .redo_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1))
            .is_ok();
        if redone {
            self.undo_depth.fetch_add(1, Ordering::SeqCst);
            self.notify();
        }
    }
}

#[derive(Default)]
pub struct ScriptedSelection {
    selected: Mutex<Vec<ElementRef>>,
}

impl ScriptedSelection {
    pub fn set(&self, elements: Vec<ElementRef>) {
        *lock(&self.selected) = elements;
    }
}

impl Selection for ScriptedSelection {
    fn selected(&self) -> Vec<ElementRef> {
        lock(&self.selected).clone()
    }
}

pub struct ScriptedActions {
    known: &'static [&'static str],
    triggered: Mutex<Vec<String>>,
}

impl ScriptedActions {
    fn for_kind(kind: SheetKind) -> Self {
        let known = match kind {
            SheetKind::Drd => DRD_ACTIONS,
            SheetKind::DecisionTable => TABLE_ACTIONS,
            SheetKind::LiteralExpression => LITERAL_ACTIONS,
        };
        Self {
            known,
            triggered: Mutex::new(Vec::new()),
        }
    }

    pub fn triggered(&self) -> Vec<String> {
        lock(&self.triggered).clone()
    }
}

impl EditorActions for ScriptedActions {
    fn trigger(&self, action: &str) -> Result<(), EngineError> {
        if !self.known.contains(&action) {
            return Err(EngineError::UnknownAction(action.to_string()));
        }
        lock(&self.triggered).push(action.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedPanel {
    target: Mutex<Option<PanelTarget>>,
    attach_count: AtomicUsize,
}

impl ScriptedPanel {
    pub fn target(&self) -> Option<PanelTarget> {
        *lock(&self.target)
    }

    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::SeqCst)
    }
}

impl PropertiesPanel for ScriptedPanel {
    fn attach_to(&self, target: PanelTarget) {
        *lock(&self.target) = Some(target);
        self.attach_count.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self) {
        *lock(&self.target) = None;
    }
}

pub struct ScriptedSvgExport {
    sheet_id: String,
    fail_next: Mutex<Option<String>>,
}

#[async_trait]
impl VectorExport for ScriptedSvgExport {
    async fn save_svg(&self) -> Result<String, EngineError> {
        if let Some(message) = lock(&self.fail_next).take() {
            return Err(EngineError::Export(message));
        }
        Ok(format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" data-sheet="{}"/>"#,
            self.sheet_id
        ))
    }
}

pub struct ScriptedViewer {
    kind: SheetKind,
    stack: Arc<ScriptedCommandStack>,
    selection: Arc<ScriptedSelection>,
    actions: Arc<ScriptedActions>,
    panel: Arc<ScriptedPanel>,
    svg: Option<Arc<ScriptedSvgExport>>,
}

impl ScriptedViewer {
    fn new(spec: &SheetSpec, events: broadcast::Sender<EngineEvent>) -> Self {
        let svg = spec.kind.supports_vector_export().then(|| {
            Arc::new(ScriptedSvgExport {
                sheet_id: spec.id.clone(),
                fail_next: Mutex::new(None),
            })
        });
        Self {
            kind: spec.kind,
            stack: Arc::new(ScriptedCommandStack::with_events(events)),
            selection: Arc::new(ScriptedSelection::default()),
            actions: Arc::new(ScriptedActions::for_kind(spec.kind)),
            panel: Arc::new(ScriptedPanel::default()),
            svg,
        }
    }

    pub fn stack(&self) -> &ScriptedCommandStack {
        &self.stack
    }

    pub fn panel(&self) -> &ScriptedPanel {
        &self.panel
    }

    pub fn triggered_actions(&self) -> Vec<String> {
        self.actions.triggered()
    }
}

impl Viewer for ScriptedViewer {
    fn kind(&self) -> SheetKind {
        self.kind
    }

    fn command_stack(&self) -> Option<Arc<dyn CommandStack>> {
        Some(self.stack.clone())
    }

    fn selection(&self) -> Option<Arc<dyn Selection>> {
        Some(self.selection.clone())
    }

    fn editor_actions(&self) -> Option<Arc<dyn EditorActions>> {
        Some(self.actions.clone())
    }

    fn properties_panel(&self) -> Option<Arc<dyn PropertiesPanel>> {
        Some(self.panel.clone())
    }

    fn vector_export(&self) -> Option<Arc<dyn VectorExport>> {
        self.svg
            .as_ref()
            .map(|svg| svg.clone() as Arc<dyn VectorExport>)
    }
}

struct LoadedSheet {
    sheet: Sheet,
    viewer: Arc<ScriptedViewer>,
}

#[derive(Default)]
struct EngineState {
    sheets: Vec<LoadedSheet>,
    active: Option<usize>,
    attached_to: Option<CanvasTarget>,
    fail_next_import: Option<String>,
    fail_next_serialize: Option<String>,
    import_gate: Option<oneshot::Receiver<()>>,
}

impl EngineState {
    fn views(&self) -> Vec<Sheet> {
        self.sheets.iter().map(|loaded| loaded.sheet.clone()).collect()
    }

    fn active_view(&self) -> Option<Sheet> {
        self.active
            .and_then(|index| self.sheets.get(index))
            .map(|loaded| loaded.sheet.clone())
    }

    fn position(&self, element: &ElementRef) -> Option<usize> {
        self.sheets
            .iter()
            .position(|loaded| loaded.sheet.element.is(element))
    }

    fn views_changed(&self) -> EngineEvent {
        EngineEvent::ViewsChanged {
            views: self.views(),
            active_view: self.active_view(),
        }
    }
}

pub struct ScriptedEngine {
    inner: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    import_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(EngineState::default()),
            events,
            import_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn attached_target(&self) -> Option<CanvasTarget> {
        lock(&self.inner).attached_to
    }

    pub fn fail_next_import(&self, message: impl Into<String>) {
        lock(&self.inner).fail_next_import = Some(message.into());
    }

    pub fn fail_next_serialize(&self, message: impl Into<String>) {
        lock(&self.inner).fail_next_serialize = Some(message.into());
    }

    /// Makes the next export of `sheet_id` fail. Returns `false` when the
    /// sheet has no vector export.
    pub fn fail_next_export(&self, sheet_id: &str, message: impl Into<String>) -> bool {
        let Some(viewer) = self.viewer(sheet_id) else {
            return false;
        };
        let Some(svg) = &viewer.svg else {
            return false;
        };
        *lock(&svg.fail_next) = Some(message.into());
        true
    }

    /// Holds the next import until the returned sender fires or is dropped.
    pub fn hold_next_import(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        lock(&self.inner).import_gate = Some(gate);
        release
    }

    pub fn viewer(&self, sheet_id: &str) -> Option<Arc<ScriptedViewer>> {
        lock(&self.inner)
            .sheets
            .iter()
            .find(|loaded| loaded.sheet.element.id() == sheet_id)
            .map(|loaded| loaded.viewer.clone())
    }

    /// Applies one edit to the given sheet's command stack.
    pub fn edit(&self, sheet_id: &str) -> Result<(), EngineError> {
        let viewer = self
            .viewer(sheet_id)
            .ok_or_else(|| EngineError::UnknownSheet(sheet_id.to_string()))?;
        viewer.stack.execute();
        Ok(())
    }

    /// Replaces the selection on the given sheet with the named elements.
    pub fn select(&self, sheet_id: &str, element_ids: &[&str]) -> Result<(), EngineError> {
        let viewer = self
            .viewer(sheet_id)
            .ok_or_else(|| EngineError::UnknownSheet(sheet_id.to_string()))?;
        let elements = element_ids
            .iter()
            .map(|id| ElementRef::new(*id, None))
            .collect();
        viewer.selection.set(elements);
        self.emit(EngineEvent::SelectionChanged);
        Ok(())
    }

    pub fn emit(&self, event: EngineEvent) {
        debug!(event = ?event.kind(), "scripted engine: emit");
        let _ = self.events.send(event);
    }

    fn load(&self, text: &str, options: ImportOptions) -> Result<ImportReport, EngineError> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|err| EngineError::Import {
                message: err.to_string(),
                warnings: Vec::new(),
            })?;

        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        let mut sheets = Vec::with_capacity(manifest.sheets.len());
        for spec in &manifest.sheets {
            if !seen.insert(spec.id.clone()) {
                warnings.push(format!("duplicate sheet id `{}` ignored", spec.id));
                continue;
            }
            sheets.push(LoadedSheet {
                sheet: Sheet::new(ElementRef::new(&spec.id, spec.name.clone()), spec.kind),
                viewer: Arc::new(ScriptedViewer::new(spec, self.events.clone())),
            });
        }
        if sheets.is_empty() {
            warnings.push("document contains no sheets".to_string());
        }

        let event = {
            let mut state = lock(&self.inner);
            state.sheets = sheets;
            state.active = None;
            if options.open {
                state.active = initial_index(&state.sheets);
            }
            state.views_changed()
        };
        self.emit(event);

        Ok(ImportReport { warnings })
    }
}

fn initial_index(sheets: &[LoadedSheet]) -> Option<usize> {
    sheets
        .iter()
        .enumerate()
        .min_by_key(|(_, loaded)| loaded.sheet.kind.initial_view_priority())
        .map(|(index, _)| index)
}

#[async_trait]
impl ModelingEngine for ScriptedEngine {
    async fn import(
        &self,
        text: &str,
        options: ImportOptions,
    ) -> Result<ImportReport, EngineError> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.inner).import_gate.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let failure = lock(&self.inner).fail_next_import.take();
        if let Some(message) = failure {
            warn!(%message, "scripted engine: import failure injected");
            return Err(EngineError::Import {
                message,
                warnings: Vec::new(),
            });
        }

        self.load(text, options)
    }

    async fn serialize(&self, options: SerializeOptions) -> Result<String, EngineError> {
        let (failure, sheets) = {
            let mut state = lock(&self.inner);
            let sheets = state
                .sheets
                .iter()
                .map(|loaded| SheetSpec {
                    id: loaded.sheet.element.id().to_string(),
                    kind: loaded.sheet.kind,
                    name: loaded.sheet.element.name().map(str::to_string),
                })
                .collect::<Vec<_>>();
            (state.fail_next_serialize.take(), sheets)
        };

        if let Some(message) = failure {
            return Err(EngineError::Serialize(message));
        }

        let manifest = Manifest { sheets };
        let text = if options.format {
            serde_json::to_string_pretty(&manifest)
        } else {
            serde_json::to_string(&manifest)
        }
        .map_err(|err| EngineError::Serialize(err.to_string()))?;

        self.emit(EngineEvent::SaveCompleted);
        Ok(text)
    }

    fn views(&self) -> Vec<Sheet> {
        lock(&self.inner).views()
    }

    fn view(&self, element: &ElementRef) -> Option<Sheet> {
        let state = lock(&self.inner);
        state
            .position(element)
            .map(|index| state.sheets[index].sheet.clone())
    }

    fn active_view(&self) -> Option<Sheet> {
        lock(&self.inner).active_view()
    }

    fn active_viewer(&self) -> Option<Arc<dyn Viewer>> {
        let state = lock(&self.inner);
        state
            .active
            .and_then(|index| state.sheets.get(index))
            .map(|loaded| loaded.viewer.clone() as Arc<dyn Viewer>)
    }

    fn viewer_for(&self, sheet: &Sheet) -> Option<Arc<dyn Viewer>> {
        let state = lock(&self.inner);
        state
            .position(&sheet.element)
            .map(|index| state.sheets[index].viewer.clone() as Arc<dyn Viewer>)
    }

    fn initial_view(&self) -> Option<Sheet> {
        let state = lock(&self.inner);
        initial_index(&state.sheets).map(|index| state.sheets[index].sheet.clone())
    }

    fn open(&self, sheet: &Sheet) -> Result<(), EngineError> {
        let event = {
            let mut state = lock(&self.inner);
            let index = state
                .position(&sheet.element)
                .ok_or_else(|| EngineError::UnknownSheet(sheet.element.id().to_string()))?;
            state.active = Some(index);
            state.views_changed()
        };
        self.emit(event);
        Ok(())
    }

    fn attach_to(&self, target: CanvasTarget) {
        lock(&self.inner).attached_to = Some(target);
        self.emit(EngineEvent::Attached);
    }

    fn detach(&self) {
        lock(&self.inner).attached_to = None;
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.inner);
        state.sheets.clear();
        state.active = None;
        state.attached_to = None;
    }
}

#[cfg(test)]
#[path = "tests/scripted_tests.rs"]
mod tests;
