//! Session controller for a multi-sheet modeling surface hosted in an editor
//! tab: import gating, active-sheet tracking, dirty aggregation and
//! translation of engine events into host-facing command state.

use anyhow::{anyhow, Result};
use shared::{
    domain::{ExportFormat, SheetKind},
    protocol::{MenuEntry, SessionState},
};

pub mod cache;
pub mod config;
mod controller;
pub mod error;
pub mod menu;
mod state;

pub use cache::{CacheEntry, EngineCache};
pub use config::{load_settings, SessionSettings};
pub use controller::{ExportedImage, MountTargets, SessionController};
pub use error::SessionError;
pub use menu::StandardMenuPolicy;
pub use state::{sheet_name, summarize};

/// Derives menus from the session state of the active sheet kind.
pub trait MenuPolicy: Send + Sync {
    fn edit_menu(&self, kind: SheetKind, state: &SessionState) -> Vec<MenuEntry>;
    fn window_menu(&self, state: &SessionState) -> Vec<MenuEntry>;
}

/// Reports whether a text input currently owns keyboard focus in the host.
pub trait InputFocus: Send + Sync {
    fn is_input_active(&self) -> bool;
}

pub struct NoInputFocus;

impl InputFocus for NoInputFocus {
    fn is_input_active(&self) -> bool {
        false
    }
}

/// Converts an exported SVG into a raster format.
pub trait ImageTranscoder: Send + Sync {
    fn transcode(&self, format: ExportFormat, svg: &str) -> Result<Vec<u8>>;
}

pub struct MissingImageTranscoder;

impl ImageTranscoder for MissingImageTranscoder {
    fn transcode(&self, format: ExportFormat, _svg: &str) -> Result<Vec<u8>> {
        Err(anyhow!("no image transcoder available for {format}"))
    }
}
