use std::sync::{Arc, Weak};

use modeling_engine::{
    CommandStack, EngineError, EngineEvent, ImportOptions, ImportReport, SerializeOptions, Sheet,
};
use shared::{
    domain::{CanvasTarget, ElementRef, ExportFormat, ModalKind, PanelTarget, TabId},
    protocol::{Document, HostEvent, SessionSnapshot, SessionState},
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        Mutex,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheEntry, CachedView},
    config::SessionSettings,
    error::SessionError,
    menu::StandardMenuPolicy,
    state, ImageTranscoder, InputFocus, MenuPolicy, MissingImageTranscoder, NoInputFocus,
};

/// Host surfaces the engine and its properties panel render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountTargets {
    pub canvas: CanvasTarget,
    pub properties_panel: PanelTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedImage {
    pub format: ExportFormat,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportPhase {
    Idle,
    Importing,
    /// The import of `text` failed. The session stays in the importing state
    /// until the host supplies different text, returns to the last imported
    /// text, or asks for a retry.
    Failed { text: String },
}

struct Mount {
    targets: MountTargets,
    generation: u64,
    event_task: JoinHandle<()>,
}

struct ControllerState {
    mount: Option<Mount>,
    document: Option<Document>,
    import: ImportPhase,
    state: SessionState,
}

impl ControllerState {
    /// An import cut off by an unmount can no longer complete.
    fn settle_interrupted_import(&mut self) {
        if self.import == ImportPhase::Importing {
            self.import = ImportPhase::Idle;
            self.state.importing = false;
        }
    }
}

/// Binds one tab's engine to the host: decides when to import, which sheet is
/// active, and what the host's commands and menus look like.
pub struct SessionController {
    entry: Arc<CacheEntry>,
    settings: SessionSettings,
    menu_policy: Arc<dyn MenuPolicy>,
    input_focus: Arc<dyn InputFocus>,
    transcoder: Arc<dyn ImageTranscoder>,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<HostEvent>,
}

impl SessionController {
    pub fn new(entry: Arc<CacheEntry>, settings: SessionSettings) -> Arc<Self> {
        Self::new_with_dependencies(
            entry,
            settings,
            Arc::new(StandardMenuPolicy),
            Arc::new(NoInputFocus),
            Arc::new(MissingImageTranscoder),
        )
    }

    pub fn new_with_dependencies(
        entry: Arc<CacheEntry>,
        settings: SessionSettings,
        menu_policy: Arc<dyn MenuPolicy>,
        input_focus: Arc<dyn InputFocus>,
        transcoder: Arc<dyn ImageTranscoder>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Arc::new(Self {
            entry,
            settings,
            menu_policy,
            input_focus,
            transcoder,
            inner: Mutex::new(ControllerState {
                mount: None,
                document: None,
                import: ImportPhase::Idle,
                state: SessionState::default(),
            }),
            events,
        })
    }

    pub fn tab(&self) -> TabId {
        self.entry.tab()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub async fn is_mounted(&self) -> bool {
        self.inner.lock().await.mount.is_some()
    }

    pub async fn is_importing(&self) -> bool {
        self.inner.lock().await.state.importing
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn active_sheet(&self) -> Option<Sheet> {
        self.entry.active_view().await
    }

    /// True when any sheet has undoable changes.
    pub fn has_unsaved_changes(&self) -> bool {
        state::is_dirty(self.entry.engine().as_ref())
    }

    /// Subscribes to engine events, attaches the engine to the host surface
    /// and imports the current document if needed.
    pub async fn mount(self: &Arc<Self>, targets: MountTargets) -> Result<(), SessionError> {
        if self.entry.is_destroyed() {
            return Err(SessionError::Closed(self.tab()));
        }
        let engine = self.entry.engine();

        {
            let mut inner = self.inner.lock().await;
            if let Some(previous) = inner.mount.take() {
                previous.event_task.abort();
                self.entry.advance_generation();
                inner.settle_interrupted_import();
            }

            let event_task = self.spawn_engine_event_task(engine.subscribe_events());
            let generation = self.entry.generation();

            engine.attach_to(targets.canvas);
            if let Some(panel) = engine
                .active_viewer()
                .and_then(|viewer| viewer.properties_panel())
            {
                panel.attach_to(targets.properties_panel);
            }

            inner.mount = Some(Mount {
                targets,
                generation,
                event_task,
            });
            info!(tab = self.tab().0, generation, "session: mounted");
        }

        self.check_import().await
    }

    /// Unsubscribes from the engine and detaches it. Completions of work
    /// started before this call are discarded.
    pub async fn unmount(&self) {
        let mut inner = self.inner.lock().await;
        let Some(mount) = inner.mount.take() else {
            return;
        };

        mount.event_task.abort();
        let generation = self.entry.advance_generation();
        inner.settle_interrupted_import();
        if !self.entry.is_destroyed() {
            let engine = self.entry.engine();
            if let Some(panel) = engine
                .active_viewer()
                .and_then(|viewer| viewer.properties_panel())
            {
                panel.detach();
            }
            engine.detach();
        }
        info!(tab = self.tab().0, generation, "session: unmounted");
    }

    fn spawn_engine_event_task(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<EngineEvent>,
    ) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.handle_engine_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        warn!(
                            tab = controller.tab().0,
                            skipped, "session: engine events lagged; resyncing"
                        );
                        controller.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Records the host's document and imports it unless it matches the last
    /// imported text. While an import is running the document is only
    /// recorded.
    pub async fn set_document(&self, document: Document) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().await;
            inner.document = Some(document);
            if inner.import == ImportPhase::Importing {
                debug!(tab = self.tab().0, "session: import running; document deferred");
                return Ok(());
            }
        }
        self.check_import().await
    }

    /// Re-runs an import that previously failed.
    pub async fn retry_import(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.import, ImportPhase::Failed { .. }) {
                return Ok(());
            }
            inner.import = ImportPhase::Idle;
        }
        self.check_import().await
    }

    async fn check_import(&self) -> Result<(), SessionError> {
        let engine = self.entry.engine();

        loop {
            let (text, generation) = {
                let mut inner = self.inner.lock().await;
                let Some(generation) = inner.mount.as_ref().map(|mount| mount.generation) else {
                    return Ok(());
                };
                let Some(document) = inner.document.clone() else {
                    return Ok(());
                };
                if inner.import == ImportPhase::Importing {
                    return Ok(());
                }

                let mut slot = self.entry.lock_slot().await;
                if slot.last_imported.as_deref() == Some(document.text.as_str()) {
                    if inner.import != ImportPhase::Idle || inner.state.importing {
                        debug!(tab = self.tab().0, "session: document back at import baseline");
                        inner.import = ImportPhase::Idle;
                        inner.state.importing = false;
                        let snapshot = self.snapshot(&inner.state);
                        self.publish(HostEvent::StateChanged(snapshot));
                    }
                    if let Some(element) = document.desired_element() {
                        self.open_in(&mut slot, element)?;
                    }
                    return Ok(());
                }
                drop(slot);

                if let ImportPhase::Failed { text } = &inner.import {
                    if *text == document.text {
                        debug!(tab = self.tab().0, "session: document unchanged since failed import");
                        return Ok(());
                    }
                }

                inner.import = ImportPhase::Importing;
                inner.state.importing = true;
                let snapshot = self.snapshot(&inner.state);
                self.publish(HostEvent::StateChanged(snapshot));
                debug!(tab = self.tab().0, generation, bytes = document.text.len(), "session: importing");
                (document.text, generation)
            };

            let result = engine.import(&text, ImportOptions { open: false }).await;

            match self.finish_import(text, generation, result).await {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(err) => {
                    if !self.document_superseded_failure().await {
                        return Err(err);
                    }
                    debug!(tab = self.tab().0, "session: newer document pushed during failed import");
                }
            }
        }
    }

    /// True when the host pushed different text while the failed import ran.
    async fn document_superseded_failure(&self) -> bool {
        let inner = self.inner.lock().await;
        let ImportPhase::Failed { text } = &inner.import else {
            return false;
        };
        self.settings.recheck_pending_document
            && inner
                .document
                .as_ref()
                .is_some_and(|document| document.text != *text)
    }

    /// Applies an import result. Returns whether the host's document changed
    /// while the import ran and needs another check.
    async fn finish_import(
        &self,
        text: String,
        generation: u64,
        result: Result<ImportReport, EngineError>,
    ) -> Result<bool, SessionError> {
        let mut inner = self.inner.lock().await;
        let live = inner.mount.as_ref().map(|mount| mount.generation) == Some(generation)
            && self.entry.generation() == generation;
        if !live {
            warn!(tab = self.tab().0, generation, "session: dropping stale import completion");
            return Ok(false);
        }

        let report = match result {
            Ok(report) => report,
            Err(err) => {
                let warnings = match &err {
                    EngineError::Import { warnings, .. } => warnings.clone(),
                    _ => Vec::new(),
                };
                inner.import = ImportPhase::Failed { text };
                let err = SessionError::Import(err);
                self.publish(HostEvent::Imported {
                    error: Some(err.to_host_error()),
                    warnings,
                });
                return Err(self.fail(err));
            }
        };

        info!(
            tab = self.tab().0,
            warnings = report.warnings.len(),
            "session: import complete"
        );
        self.publish(HostEvent::Imported {
            error: None,
            warnings: report.warnings,
        });

        let mut slot = self.entry.lock_slot().await;
        slot.last_imported = Some(text.clone());
        inner.import = ImportPhase::Idle;
        inner.state.importing = false;
        let snapshot = self.snapshot(&inner.state);
        self.publish(HostEvent::StateChanged(snapshot));

        let target = inner
            .document
            .as_ref()
            .and_then(|document| document.desired_element().cloned())
            .or_else(|| self.entry.engine().initial_view().map(|view| view.element));
        if let Some(element) = target {
            self.open_in(&mut slot, &element)?;
        }

        Ok(self.settings.recheck_pending_document
            && inner
                .document
                .as_ref()
                .is_some_and(|document| document.text != text))
    }

    /// Makes the sheet for `element` active. Returns `false` when the element
    /// no longer exists or its sheet is already active.
    pub async fn open(&self, element: &ElementRef) -> Result<bool, SessionError> {
        let mut slot = self.entry.lock_slot().await;
        self.open_in(&mut slot, element)
    }

    fn open_in(&self, slot: &mut CachedView, element: &ElementRef) -> Result<bool, SessionError> {
        let engine = self.entry.engine();
        let sheet = engine.view(element).or_else(|| {
            engine
                .views()
                .into_iter()
                .find(|view| view.element.id() == element.id())
        });

        let Some(sheet) = sheet else {
            debug!(tab = self.tab().0, element = element.id(), "session: element not in document");
            return Ok(false);
        };

        if slot
            .active_view
            .as_ref()
            .is_some_and(|active| active.is_same(&sheet))
        {
            return Ok(false);
        }

        debug!(tab = self.tab().0, sheet = sheet.element.id(), "session: opening sheet");
        engine
            .open(&sheet)
            .map_err(|err| self.fail(SessionError::Engine(err)))?;
        slot.active_view = Some(sheet);
        Ok(true)
    }

    /// Dispatches one engine event. Each arm finishes its recomputation before
    /// returning.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        debug!(tab = self.tab().0, event = ?event.kind(), "session: engine event");
        match event {
            EngineEvent::SaveCompleted
            | EngineEvent::Attached
            | EngineEvent::SelectionChanged
            | EngineEvent::DirectEditingChanged => self.handle_changed().await,
            EngineEvent::ContentChanged => self.content_changed().await,
            EngineEvent::ViewsChanged { views, active_view } => {
                self.views_changed(views, active_view).await
            }
            EngineEvent::Error(err) => {
                self.fail(SessionError::Engine(err));
                self.handle_changed().await;
            }
        }
    }

    /// Rebuilds everything derived from engine events after some were lost.
    async fn resync(&self) {
        let engine = self.entry.engine();
        self.views_changed(engine.views(), engine.active_view()).await;
        let dirty = state::is_dirty(engine.as_ref());
        self.publish(HostEvent::Changed { dirty });
    }

    async fn handle_changed(&self) {
        let mut inner = self.inner.lock().await;
        self.recompute(&mut inner);
    }

    async fn content_changed(&self) {
        let mut inner = self.inner.lock().await;
        self.recompute(&mut inner);
        let dirty = state::is_dirty(self.entry.engine().as_ref());
        self.publish(HostEvent::Changed { dirty });
    }

    async fn views_changed(&self, views: Vec<Sheet>, active_view: Option<Sheet>) {
        let mut inner = self.inner.lock().await;
        let mut slot = self.entry.lock_slot().await;

        let (sheets, active_sheet) = state::summarize_views(&views, active_view.as_ref());
        self.publish(HostEvent::SheetsChanged {
            sheets,
            active_sheet,
        });

        if let Some(mount) = &inner.mount {
            if let Some(panel) = self
                .entry
                .engine()
                .active_viewer()
                .and_then(|viewer| viewer.properties_panel())
            {
                panel.attach_to(mount.targets.properties_panel);
            }
        }

        // the panel must follow the new viewer before the view is committed
        slot.active_view = active_view;
        slot.views = views;
        drop(slot);

        self.recompute(&mut inner);
    }

    /// Rebuilds the command state from the active viewer. Nothing is emitted
    /// before an import has produced one.
    fn recompute(&self, inner: &mut ControllerState) {
        let engine = self.entry.engine();
        let (Some(viewer), Some(view)) = (engine.active_viewer(), engine.active_view()) else {
            return;
        };

        let (commands, has_selection) = state::command_flags(
            view.kind,
            viewer.as_ref(),
            self.input_focus.is_input_active(),
            self.settings.raster_format,
        );
        inner.state.commands = Some(commands);
        inner.state.has_selection = has_selection;

        let snapshot = SessionSnapshot {
            state: inner.state.clone(),
            edit_menu: self.menu_policy.edit_menu(view.kind, &inner.state),
            window_menu: self.menu_policy.window_menu(&inner.state),
        };
        self.publish(HostEvent::StateChanged(snapshot));
    }

    fn snapshot(&self, state: &SessionState) -> SessionSnapshot {
        let edit_menu = self
            .entry
            .engine()
            .active_view()
            .map(|view| self.menu_policy.edit_menu(view.kind, state))
            .unwrap_or_default();
        SessionSnapshot {
            state: state.clone(),
            edit_menu,
            window_menu: self.menu_policy.window_menu(state),
        }
    }

    pub fn undo(&self) -> Result<(), SessionError> {
        self.active_command_stack()?.undo();
        Ok(())
    }

    pub fn redo(&self) -> Result<(), SessionError> {
        self.active_command_stack()?.redo();
        Ok(())
    }

    fn active_command_stack(&self) -> Result<Arc<dyn CommandStack>, SessionError> {
        let viewer = self
            .entry
            .engine()
            .active_viewer()
            .ok_or_else(|| self.fail(SessionError::NoActiveViewer))?;
        viewer.command_stack().ok_or_else(|| {
            self.fail(SessionError::Engine(EngineError::MissingCapability(
                "commandStack",
            )))
        })
    }

    /// Forwards a named editor action to the active viewer.
    pub fn trigger_action(&self, action: &str) -> Result<(), SessionError> {
        let viewer = self
            .entry
            .engine()
            .active_viewer()
            .ok_or_else(|| self.fail(SessionError::NoActiveViewer))?;
        let actions = viewer.editor_actions().ok_or_else(|| {
            self.fail(SessionError::Engine(EngineError::MissingCapability(
                "editorActions",
            )))
        })?;
        actions
            .trigger(action)
            .map_err(|err| self.fail(SessionError::Engine(err)))
    }

    /// Serializes the document and makes the result the new import baseline.
    pub async fn save(&self) -> Result<String, SessionError> {
        let options = SerializeOptions {
            format: self.settings.format_on_save,
        };
        let text = self
            .entry
            .engine()
            .serialize(options)
            .await
            .map_err(|err| self.fail(SessionError::Save(err)))?;

        if self.entry.is_destroyed() {
            return Err(SessionError::Closed(self.tab()));
        }
        self.entry.lock_slot().await.last_imported = Some(text.clone());
        info!(tab = self.tab().0, bytes = text.len(), "session: saved");
        Ok(text)
    }

    /// Exports the active sheet. Raster formats are transcoded from the SVG.
    pub async fn export_as(&self, format: ExportFormat) -> Result<ExportedImage, SessionError> {
        let viewer = self
            .entry
            .engine()
            .active_viewer()
            .ok_or_else(|| self.fail(SessionError::NoActiveViewer))?;
        let kind = viewer.kind();
        if !kind.supports_vector_export() {
            return Err(self.fail(SessionError::ExportUnsupported(kind)));
        }
        let exporter = viewer.vector_export().ok_or_else(|| {
            self.fail(SessionError::Export(EngineError::MissingCapability(
                "saveSVG",
            )))
        })?;

        let svg = exporter
            .save_svg()
            .await
            .map_err(|err| self.fail(SessionError::Export(err)))?;

        if format.is_vector() {
            return Ok(ExportedImage {
                format,
                contents: svg.into_bytes(),
            });
        }

        let contents = self
            .transcoder
            .transcode(format, &svg)
            .map_err(|source| self.fail(SessionError::Transcode { format, source }))?;
        Ok(ExportedImage { format, contents })
    }

    /// Asks the host to open its deployment dialog.
    pub fn request_deploy(&self) {
        self.publish(HostEvent::ModalRequested(ModalKind::DeployDiagram));
    }

    fn fail(&self, err: SessionError) -> SessionError {
        error!(tab = self.tab().0, error = %err, "session: operation failed");
        self.publish(HostEvent::Error(err.to_host_error()));
        err
    }

    fn publish(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
