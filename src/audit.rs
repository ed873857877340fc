//! Append-only audit trail.
//!
//! One JSON line per job transition, written to a monthly file kept apart
//! from the diagnostic log. Records carry file base names only, never full
//! paths, and the options summary never includes the password.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::job::{JobKind, OptionsSummary};

/// Job transition being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    /// Job admitted.
    Start,
    /// Job finished with output.
    Success,
    /// Job failed.
    Error,
    /// Job cancelled by the operator.
    Cancelled,
}

impl AuditEvent {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Event label such as `merge_start`.
    pub fn label(&self, kind: JobKind) -> String {
        format!("{}_{}", kind.as_str(), self.as_str())
    }
}

/// One audit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event label.
    pub event: String,
    /// Number of input files.
    pub file_count: usize,
    /// Input base names.
    pub files: Vec<String>,
    /// Options in effect.
    pub options: OptionsSummary,
    /// Operating system account.
    pub user: String,
    /// Identifier shared by every record of one process.
    pub session: String,
    /// Program version.
    pub version: String,
}

/// Writer for the audit trail.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
    session: String,
    user: String,
}

impl AuditLog {
    /// Audit log in `dir` for the session `{pid}_{started}`.
    pub fn new(dir: impl Into<PathBuf>, pid: u32, started: DateTime<Utc>) -> Self {
        Self {
            dir: dir.into(),
            session: format!("{pid}_{}", started.timestamp()),
            user: current_user(),
        }
    }

    /// Session identifier.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Audit file for the month containing `now`.
    pub fn file_for(&self, now: DateTime<Local>) -> PathBuf {
        self.dir.join(format!("audit_{}.log", now.format("%Y%m")))
    }

    /// Append one record. Failures are logged and otherwise ignored.
    pub fn record(
        &self,
        kind: JobKind,
        event: AuditEvent,
        files: &[PathBuf],
        options: &OptionsSummary,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            event: event.label(kind),
            file_count: files.len(),
            files: files.iter().map(|f| basename(f)).collect(),
            options: options.clone(),
            user: self.user.clone(),
            session: self.session.clone(),
            version: crate::VERSION.to_string(),
        };

        let path = self.file_for(Local::now());
        if let Err(e) = append_line(&path, &record) {
            warn!(path = %path.display(), error = %e, "could not write audit record");
        } else {
            debug!(event = %record.event, "audit record written");
        }
    }
}

fn append_line(path: &Path, record: &AuditRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn current_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}
