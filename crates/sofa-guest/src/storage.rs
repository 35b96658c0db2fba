//! Persisted guest settings and the capped diagnostic log.
//!
//! Both fail soft: a missing or unreadable file yields defaults, a failed
//! write is a warning. Losing settings must never take the session down.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed identifier of the settings record.
pub const SETTINGS_FILE: &str = "guest_settings.json";
/// Fixed identifier of the diagnostic log blob.
pub const LOG_FILE: &str = "guest_log.txt";
/// Log cap in bytes; oldest content is trimmed first.
pub const DEFAULT_LOG_CAP_BYTES: usize = 100_000;

/// The persisted settings record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub relay_url: Option<String>,
    pub guest_name: Option<String>,
    pub gamepad_index: Option<usize>,
    pub video_queue_frames: Option<u32>,
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SETTINGS_FILE),
        }
    }

    pub fn load(&self) -> Settings {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("no saved settings at {}: {err}", self.path.display());
                return Settings::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("failed to read saved settings: {err}");
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("failed to create settings directory: {err}");
                return;
            }
        }
        let raw = match serde_json::to_string_pretty(settings) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize settings: {err}");
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, raw) {
            warn!("failed to save settings: {err}");
        }
    }
}

/// Append-only diagnostic log, capped to a bounded size.
///
/// The whole blob is rewritten per append, which keeps the trim semantics
/// trivial and is cheap at the 100 kB cap.
#[derive(Clone)]
pub struct DiagnosticLog {
    path: PathBuf,
    cap: usize,
}

impl DiagnosticLog {
    pub fn new(dir: &Path) -> Self {
        Self::with_cap(dir, DEFAULT_LOG_CAP_BYTES)
    }

    pub fn with_cap(dir: &Path, cap: usize) -> Self {
        Self {
            path: dir.join(LOG_FILE),
            cap,
        }
    }

    /// Append one line, trimming the oldest content past the cap.
    pub fn append(&self, line: &str) {
        let mut blob = fs::read_to_string(&self.path).unwrap_or_default();
        blob.push_str(line);
        blob.push('\n');
        if blob.len() > self.cap {
            let mut start = blob.len() - self.cap;
            while start < blob.len() && !blob.is_char_boundary(start) {
                start += 1;
            }
            blob.drain(..start);
        }
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&self.path, &blob) {
            warn!("failed to persist diagnostic log: {err}");
        }
    }

    /// The surviving blob from previous runs, if any.
    pub fn restore(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }
}
