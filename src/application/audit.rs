//! # Audit Log
//!
//! Append-only record of subscription changes, bans and evictions.
//! Writes are best-effort: a failure is logged and otherwise ignored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// An audit log that only traces.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(target: "audit", "{}", message);

        let Some(path) = &self.path else {
            return;
        };
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{} - {}\n", timestamp, message);

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            tracing::warn!("Failed to write audit log {}: {}", path.display(), e);
        }
    }
}
