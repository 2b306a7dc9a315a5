use std::{fs, path::Path};

use serde::Deserialize;
use shared::domain::ExportFormat;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Capacity of the host notification channel.
    pub event_capacity: usize,
    pub format_on_save: bool,
    /// Raster format offered next to SVG for exportable sheets.
    pub raster_format: ExportFormat,
    /// Re-check the host's latest document once an import completes.
    pub recheck_pending_document: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            format_on_save: true,
            raster_format: ExportFormat::Png,
            recheck_pending_document: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    event_capacity: Option<usize>,
    format_on_save: Option<bool>,
    raster_format: Option<String>,
    recheck_pending_document: Option<bool>,
}

impl SessionSettings {
    /// Applies values from a TOML document. Unknown or malformed values are
    /// skipped.
    pub fn apply_toml(&mut self, raw: &str) {
        let file = match toml::from_str::<SettingsFile>(raw) {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, "settings: ignoring unreadable session settings");
                return;
            }
        };

        if let Some(v) = file.event_capacity.filter(|v| *v > 0) {
            self.event_capacity = v;
        }
        if let Some(v) = file.format_on_save {
            self.format_on_save = v;
        }
        if let Some(v) = file.raster_format.and_then(|v| v.parse().ok()) {
            self.raster_format = v;
        }
        if let Some(v) = file.recheck_pending_document {
            self.recheck_pending_document = v;
        }
    }

    /// Applies `APP__*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("APP__EVENT_CAPACITY") {
            if let Ok(parsed) = v.parse::<usize>() {
                if parsed > 0 {
                    self.event_capacity = parsed;
                }
            }
        }
        if let Some(v) = lookup("APP__FORMAT_ON_SAVE") {
            if let Ok(parsed) = v.parse::<bool>() {
                self.format_on_save = parsed;
            }
        }
        if let Some(v) = lookup("APP__RASTER_FORMAT") {
            if let Ok(parsed) = v.parse::<ExportFormat>() {
                self.raster_format = parsed;
            }
        }
        if let Some(v) = lookup("APP__RECHECK_PENDING_DOCUMENT") {
            if let Ok(parsed) = v.parse::<bool>() {
                self.recheck_pending_document = parsed;
            }
        }
    }
}

/// Defaults, then the optional settings file, then the process environment.
pub fn load_settings(path: Option<&Path>) -> SessionSettings {
    let mut settings = SessionSettings::default();

    if let Some(path) = path {
        match fs::read_to_string(path) {
            Ok(raw) => settings.apply_toml(&raw),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "settings: file not readable");
            }
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
