//! Optional record of every prompt sent to and response received from the model.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

/// Sink the analyst reports each interaction to.
pub trait Transcript: Send + Sync {
    /// Record one event. Must not fail the caller.
    fn record(&self, message: &str, data: &Value);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTranscript;

impl Transcript for NoTranscript {
    fn record(&self, _message: &str, _data: &Value) {}
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct NdjsonTranscript {
    path: PathBuf,
    // Serializes appends when alerts are analyzed concurrently
    lock: Mutex<()>,
}

impl NdjsonTranscript {
    /// Create a transcript that appends to `path`, creating parent directories lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// File this transcript writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl Transcript for NdjsonTranscript {
    fn record(&self, message: &str, data: &Value) {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "message": message,
            "data": data,
        });
        if let Err(e) = self.append(&entry.to_string()) {
            warn!(path = %self.path.display(), error = %e, "Failed to write transcript entry");
        }
    }
}
