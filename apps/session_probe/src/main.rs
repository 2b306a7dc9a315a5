use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use modeling_engine::{
    scripted::{manifest, SheetSpec},
    ModelingEngine, ScriptedEngine,
};
use serde::Deserialize;
use serde_json::{json, Value};
use session_core::{load_settings, EngineCache, MountTargets, SessionController, SessionError};
use shared::{
    domain::{CanvasTarget, ElementRef, ExportFormat, PanelTarget, TabId},
    protocol::{Document, HostEvent, SheetSummary},
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::timeout,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Replays a session script against the scripted engine and prints every
/// step result and host event as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    script: PathBuf,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log: String,
    /// Milliseconds without host events before the next step runs.
    #[arg(long, default_value_t = 50)]
    quiet_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default = "default_tab")]
    tab: i64,
    steps: Vec<Step>,
}

fn default_tab() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Load {
        sheets: Vec<SheetSpec>,
        #[serde(default)]
        active: Option<String>,
    },
    Raw {
        text: String,
    },
    Open {
        sheet: String,
    },
    Edit {
        sheet: String,
    },
    Select {
        sheet: String,
        #[serde(default)]
        elements: Vec<String>,
    },
    Undo,
    Redo,
    Save,
    Export {
        format: ExportFormat,
    },
    Action {
        name: String,
    },
    Deploy,
    Retry,
    Mount,
    Unmount,
    Close,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Load { .. } => "load",
            Step::Raw { .. } => "raw",
            Step::Open { .. } => "open",
            Step::Edit { .. } => "edit",
            Step::Select { .. } => "select",
            Step::Undo => "undo",
            Step::Redo => "redo",
            Step::Save => "save",
            Step::Export { .. } => "export",
            Step::Action { .. } => "action",
            Step::Deploy => "deploy",
            Step::Retry => "retry",
            Step::Mount => "mount",
            Step::Unmount => "unmount",
            Step::Close => "close",
        }
    }
}

const TARGETS: MountTargets = MountTargets {
    canvas: CanvasTarget(1),
    properties_panel: PanelTarget(1),
};

struct Probe {
    tab: TabId,
    cache: EngineCache,
    engine: Arc<ScriptedEngine>,
    controller: Arc<SessionController>,
}

impl Probe {
    async fn run(&self, step: Step) -> Result<Value, SessionError> {
        match step {
            Step::Load { sheets, active } => {
                let mut document = Document::new(manifest(&sheets));
                if let Some(id) = active {
                    document = document.with_active_sheet(SheetSummary {
                        element: Some(ElementRef::new(id.clone(), None)),
                        name: id.clone(),
                        id,
                        order: None,
                    });
                }
                self.controller.set_document(document).await?;
                Ok(self.active_sheet().await)
            }
            Step::Raw { text } => {
                self.controller.set_document(Document::new(text)).await?;
                Ok(self.active_sheet().await)
            }
            Step::Open { sheet } => {
                let opened = self
                    .controller
                    .open(&ElementRef::new(sheet, None))
                    .await?;
                Ok(json!({ "opened": opened }))
            }
            Step::Edit { sheet } => {
                self.engine.edit(&sheet)?;
                Ok(json!({ "dirty": self.controller.has_unsaved_changes() }))
            }
            Step::Select { sheet, elements } => {
                let ids = elements.iter().map(String::as_str).collect::<Vec<_>>();
                self.engine.select(&sheet, &ids)?;
                Ok(Value::Null)
            }
            Step::Undo => {
                self.controller.undo()?;
                Ok(json!({ "dirty": self.controller.has_unsaved_changes() }))
            }
            Step::Redo => {
                self.controller.redo()?;
                Ok(json!({ "dirty": self.controller.has_unsaved_changes() }))
            }
            Step::Save => {
                let text = self.controller.save().await?;
                Ok(json!({ "document": text }))
            }
            Step::Export { format } => {
                let image = self.controller.export_as(format).await?;
                let mut result = json!({
                    "format": image.format,
                    "bytes": image.contents.len(),
                });
                if image.format.is_vector() {
                    result["svg"] = Value::String(String::from_utf8_lossy(&image.contents).into());
                }
                Ok(result)
            }
            Step::Action { name } => {
                self.controller.trigger_action(&name)?;
                Ok(Value::Null)
            }
            Step::Deploy => {
                self.controller.request_deploy();
                Ok(Value::Null)
            }
            Step::Retry => {
                self.controller.retry_import().await?;
                Ok(self.active_sheet().await)
            }
            Step::Mount => {
                self.controller.mount(TARGETS).await?;
                Ok(Value::Null)
            }
            Step::Unmount => {
                self.controller.unmount().await;
                Ok(Value::Null)
            }
            Step::Close => {
                self.controller.unmount().await;
                let closed = self.cache.close_tab(self.tab).await;
                Ok(json!({ "closed": closed }))
            }
        }
    }

    async fn active_sheet(&self) -> Value {
        match self.controller.active_sheet().await {
            Some(sheet) => json!({ "active_sheet": session_core::summarize(&sheet) }),
            None => json!({ "active_sheet": null }),
        }
    }
}

/// Prints host events until none arrive for `quiet`.
async fn drain_events(events: &mut broadcast::Receiver<HostEvent>, quiet: Duration) -> Result<()> {
    loop {
        match timeout(quiet, events.recv()).await {
            Ok(Ok(event)) => println!("{}", serde_json::to_string(&json!({ "event": event }))?),
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "probe: host events lagged");
            }
            Ok(Err(RecvError::Closed)) | Err(_) => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let raw = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("reading script {}", args.script.display()))?;
    let script: Script = serde_json::from_str(&raw).context("parsing script")?;
    let settings = load_settings(args.settings.as_deref());
    let quiet = Duration::from_millis(args.quiet_ms.max(1));

    let engine = Arc::new(ScriptedEngine::new());
    let factory_engine = engine.clone();
    let cache = EngineCache::new(move |_tab| factory_engine.clone() as Arc<dyn ModelingEngine>);

    let tab = TabId(script.tab);
    let entry = cache.entry(tab).await;
    let controller = SessionController::new(entry, settings);
    let mut events = controller.subscribe_events();
    controller
        .mount(TARGETS)
        .await
        .context("mounting session")?;

    let probe = Probe {
        tab,
        cache,
        engine,
        controller,
    };
    info!(tab = tab.0, steps = script.steps.len(), "probe: replaying script");

    drain_events(&mut events, quiet).await?;
    for (index, step) in script.steps.into_iter().enumerate() {
        let op = step.name();
        let closing = matches!(step, Step::Close);
        let line = match probe.run(step).await {
            Ok(result) => json!({ "step": index, "op": op, "ok": true, "result": result }),
            Err(err) => json!({ "step": index, "op": op, "ok": false, "error": err.to_host_error() }),
        };
        println!("{}", serde_json::to_string(&line)?);
        drain_events(&mut events, quiet).await?;
        if closing {
            break;
        }
    }

    Ok(())
}
