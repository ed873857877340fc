//! The linear chain of intermediate artifacts for one output.
//!
//! A chain owns up to three tracked files at once:
//! - `pending`, a stage output that has not been accepted yet
//! - `current`, the artifact the next stage reads
//! - `retained`, the core transform output kept as the fallback for final
//!   validation
//!
//! Superseded artifacts are deleted the moment they are replaced. Whatever
//! is still owned when the chain is dropped is deleted as well, so every
//! exit path of a job cleans up after itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PdfSmithError, Result};
use crate::tracker::TempTracker;

const PREFIX: &str = "pdfsmith_";
const SUFFIX: &str = ".pdf";

/// Artifacts produced on the way to one output file.
#[derive(Debug)]
pub struct ArtifactChain {
    tracker: TempTracker,
    pending: Option<PathBuf>,
    current: Option<PathBuf>,
    retained: Option<PathBuf>,
}

impl ArtifactChain {
    /// Empty chain registering its files with `tracker`.
    pub fn new(tracker: TempTracker) -> Self {
        Self {
            tracker,
            pending: None,
            current: None,
            retained: None,
        }
    }

    /// Create a tracked file for the next stage to write into.
    ///
    /// Any earlier pending output that was never accepted is discarded.
    pub fn stage_output(&mut self, label: &str) -> Result<PathBuf> {
        self.reject();
        let path = self.tracker.create(&format!("{PREFIX}{label}_"), SUFFIX)?;
        self.pending = Some(path.clone());
        Ok(path)
    }

    /// Accept the pending output as the new current artifact.
    ///
    /// The first artifact replaced is kept as the fallback; later ones are
    /// deleted.
    pub fn promote(&mut self) -> Result<&Path> {
        let next = self
            .pending
            .take()
            .ok_or_else(|| PdfSmithError::other("no pending artifact to promote"))?;

        match self.current.take() {
            Some(previous) if self.retained.is_none() => self.retained = Some(previous),
            Some(previous) => {
                self.tracker.discard(&previous);
            }
            None => {}
        }

        let current: &Path = self.current.insert(next);
        Ok(current)
    }

    /// Discard the pending output after a failed stage.
    pub fn reject(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.tracker.discard(&pending);
        }
    }

    /// The artifact the next stage reads.
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Whether a fallback artifact is still available.
    pub fn has_fallback(&self) -> bool {
        self.retained.is_some()
    }

    /// Throw away the current artifact and return to the fallback.
    pub fn revert(&mut self) -> Option<&Path> {
        let retained = self.retained.take()?;
        if let Some(current) = self.current.take() {
            self.tracker.discard(&current);
        }
        let current: &Path = self.current.insert(retained);
        Some(current)
    }

    /// Move the current artifact to `destination` and release everything
    /// else the chain owns.
    pub fn commit(mut self, destination: &Path) -> Result<PathBuf> {
        self.reject();
        let current = self
            .current
            .take()
            .ok_or_else(|| PdfSmithError::processing("Committing", "nothing to commit"))?;

        if let Err(e) = move_into_place(&current, destination) {
            self.current = Some(current);
            return Err(PdfSmithError::processing(
                "Committing",
                format!("cannot write {}: {e}", destination.display()),
            ));
        }

        self.tracker.unregister(&current);
        if let Some(retained) = self.retained.take() {
            self.tracker.discard(&retained);
        }
        debug!(path = %destination.display(), "artifact committed");
        Ok(destination.to_path_buf())
    }
}

impl Drop for ArtifactChain {
    fn drop(&mut self) {
        for path in [self.pending.take(), self.current.take(), self.retained.take()]
            .into_iter()
            .flatten()
        {
            self.tracker.discard(&path);
        }
    }
}

/// Rename `source` to `destination`, copying through a sibling file when
/// the two live on different filesystems.
fn move_into_place(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            debug!(error = %rename_error, "rename failed, copying across filesystems");
            let staging = destination.with_extension("pdf.partial");
            if let Err(e) = fs::copy(source, &staging).and_then(|_| fs::rename(&staging, destination))
            {
                let _ = fs::remove_file(&staging);
                return Err(e);
            }
            if let Err(e) = fs::remove_file(source) {
                warn!(path = %source.display(), error = %e, "could not remove moved artifact");
            }
            Ok(())
        }
    }
}
