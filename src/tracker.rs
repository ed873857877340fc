//! Registry of live intermediate files.
//!
//! Every artifact a stage creates is registered here the moment it exists on
//! disk, so a shutdown sweep can reclaim it no matter which code path
//! created it or how that path ended. The registry is shared between the
//! pipeline worker and chunking helpers, so all access goes through a single
//! mutex.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{PdfSmithError, Result};

/// Outcome of a cleanup sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Artifacts deleted (or already gone).
    pub removed: usize,
    /// Artifacts that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Shared handle to the temp artifact registry.
#[derive(Debug, Clone)]
pub struct TempTracker {
    live: Arc<Mutex<HashSet<PathBuf>>>,
    dir: PathBuf,
}

impl TempTracker {
    /// Tracker that creates artifacts inside `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            live: Arc::new(Mutex::new(HashSet::new())),
            dir: dir.into(),
        }
    }

    /// Directory new artifacts are created in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // A panic elsewhere must not stop cleanup from seeing the set.
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `path`. Registering an already-tracked path is a no-op.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "tracking temp artifact");
        self.lock().insert(path);
    }

    /// Stop tracking `path` without touching the file.
    pub fn unregister(&self, path: &Path) -> bool {
        self.lock().remove(path)
    }

    /// Snapshot of every tracked path.
    pub fn list_all(&self) -> HashSet<PathBuf> {
        self.lock().clone()
    }

    /// Whether `path` is tracked.
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Number of tracked paths.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Create an empty artifact file and register it in the same critical
    /// section.
    pub fn create(&self, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let mut live = self.lock();
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| PdfSmithError::from(e.error))?;
        live.insert(path.clone());
        debug!(path = %path.display(), "created temp artifact");
        Ok(path)
    }

    /// Delete `path` and stop tracking it. Failures are logged, not raised.
    pub fn discard(&self, path: &Path) -> bool {
        let removed = match remove(path) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete temp artifact");
                false
            }
        };
        self.unregister(path);
        removed
    }

    /// Delete every tracked artifact, continuing past individual failures.
    ///
    /// Paths that could not be deleted are dropped from the registry as well,
    /// so a repeated sweep does not report them twice.
    pub fn sweep(&self) -> SweepReport {
        let paths: Vec<PathBuf> = self.lock().drain().collect();
        let mut report = SweepReport::default();

        for path in paths {
            match remove(&path) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cleanup could not delete temp artifact");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        if report.removed > 0 || !report.failed.is_empty() {
            debug!(
                removed = report.removed,
                failed = report.failed.len(),
                "temp artifact sweep finished"
            );
        }
        report
    }
}

fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
