//! Durable progress snapshots.
//!
//! Each process writes at most one checkpoint file, keyed by its process id.
//! The file is replaced atomically after every meaningful step and removed
//! when the job ends. A process that dies mid-job leaves its checkpoint
//! behind, and the next start reports it. Recovery is informational only.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::job::JobKind;

const FILE_PREFIX: &str = "pdfsmith_checkpoint_";

/// Snapshot of one job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Operation in progress.
    pub kind: JobKind,
    /// Input files fully handled so far.
    pub files_processed: Vec<PathBuf>,
    /// Label of the current pipeline stage.
    pub stage: String,
    /// Temp artifacts alive when the snapshot was taken.
    pub temp_files: Vec<PathBuf>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot taken now.
    pub fn new(kind: JobKind, stage: impl Into<String>) -> Self {
        Self {
            kind,
            files_processed: Vec::new(),
            stage: stage.into(),
            temp_files: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A checkpoint left behind by an earlier process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredJob {
    /// File the checkpoint was read from.
    pub file: PathBuf,
    /// Its content.
    pub checkpoint: Checkpoint,
    /// Age in whole minutes at scan time.
    pub age_minutes: i64,
}

/// Reads and writes checkpoint files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    path: PathBuf,
    max_age: Duration,
}

impl CheckpointStore {
    /// Store for process `pid` inside `dir`.
    pub fn new(dir: impl Into<PathBuf>, pid: u32, max_age: Duration) -> Self {
        let dir = dir.into();
        let path = dir.join(format!("{FILE_PREFIX}{pid}.json"));
        Self { dir, path, max_age }
    }

    /// This process's checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory scanned for checkpoints.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace this process's checkpoint with `checkpoint`.
    ///
    /// The write goes to a sibling file first and is then renamed over the
    /// target, so a reader never sees a partial snapshot.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_vec_pretty(checkpoint)?;
        let temp_path = self.path.with_extension("json.tmp");

        {
            let mut file = open_private(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        debug!(stage = %checkpoint.stage, path = %self.path.display(), "checkpoint saved");
        Ok(())
    }

    /// Remove this process's checkpoint. A missing file is not an error.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "checkpoint cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove checkpoint"),
        }
    }

    /// Find checkpoints left by earlier processes.
    ///
    /// Entries younger than the freshness window are returned, newest first.
    /// Stale or unreadable entries are deleted. This process's own file is
    /// skipped.
    pub fn scan(&self, now: DateTime<Utc>) -> Vec<RecoveredJob> {
        let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        let pattern = Path::new(&dir).join(format!("{FILE_PREFIX}*.json"));
        let entries = match glob::glob(&pattern.to_string_lossy()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "invalid checkpoint search pattern");
                return Vec::new();
            }
        };

        let mut recovered = Vec::new();
        for file in entries.filter_map(|entry| entry.ok()) {
            if file == self.path {
                continue;
            }

            let checkpoint = match read_checkpoint(&file) {
                Some(checkpoint) => checkpoint,
                None => {
                    purge(&file, "unreadable");
                    continue;
                }
            };

            let age = now.signed_duration_since(checkpoint.timestamp);
            let fresh = age.to_std().is_ok_and(|age| age < self.max_age)
                || age < chrono::TimeDelta::zero();
            if !fresh {
                purge(&file, "stale");
                continue;
            }

            recovered.push(RecoveredJob {
                file,
                age_minutes: age.num_minutes().max(0),
                checkpoint,
            });
        }

        recovered.sort_by(|a, b| b.checkpoint.timestamp.cmp(&a.checkpoint.timestamp));
        if !recovered.is_empty() {
            info!(count = recovered.len(), "found interrupted jobs from earlier sessions");
        }
        recovered
    }

    /// Delete a recovered checkpoint once the operator has seen it.
    pub fn discard(&self, job: &RecoveredJob) -> Result<()> {
        match fs::remove_file(&job.file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_checkpoint(file: &Path) -> Option<Checkpoint> {
    let content = fs::read(file)
        .map_err(|e| debug!(path = %file.display(), error = %e, "cannot read checkpoint"))
        .ok()?;
    serde_json::from_slice(&content)
        .map_err(|e| debug!(path = %file.display(), error = %e, "cannot parse checkpoint"))
        .ok()
}

fn purge(file: &Path, reason: &str) {
    match fs::remove_file(file) {
        Ok(()) => info!(path = %file.display(), reason, "removed old checkpoint"),
        Err(e) => warn!(path = %file.display(), error = %e, "could not remove old checkpoint"),
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}
