//! Front-end command dispatch.
//!
//! A front end, whether the command line or a windowing toolkit, turns its
//! user actions into [`UiCommand`]s and hands them to the [`Dispatcher`].
//! The dispatcher keeps one [`WorkingSet`] per operation tab and maps each
//! command onto the context, the worker or the checkpoint store.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::checkpoint::RecoveredJob;
use crate::context::AppContext;
use crate::error::{PdfSmithError, Result};
use crate::job::{ConflictResolver, JobKind, JobOptions, JobRequest, SplitMode};
use crate::tracker::SweepReport;
use crate::validation::{Verdict, check_file_count};
use crate::worker::{JobHandle, JobWorker};

/// One admitted input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingFile {
    /// Path as given by the operator.
    pub path: PathBuf,
    /// Page count at admission.
    pub pages: usize,
    /// Size in bytes at admission.
    pub size: u64,
}

impl From<Verdict> for WorkingFile {
    fn from(verdict: Verdict) -> Self {
        Self {
            path: verdict.path,
            pages: verdict.page_count,
            size: verdict.file_size,
        }
    }
}

/// Ordered, duplicate-free list of validated inputs.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    files: Vec<WorkingFile>,
    max_files: usize,
}

impl WorkingSet {
    /// Empty set holding at most `max_files` files.
    pub fn new(max_files: usize) -> Self {
        Self {
            files: Vec::new(),
            max_files,
        }
    }

    /// Add `file` at the end.
    ///
    /// Returns `false` without changing anything when the path is already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns `Overload` when the set is full.
    pub fn add(&mut self, file: WorkingFile) -> Result<bool> {
        if self.contains(&file.path) {
            return Ok(false);
        }
        check_file_count(self.files.len() + 1, self.max_files)?;
        self.files.push(file);
        Ok(true)
    }

    /// Whether `path` is in the set.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|file| file.path == path)
    }

    /// Remove the file at `index`.
    pub fn remove(&mut self, index: usize) -> Option<WorkingFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    /// Remove every file.
    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Move the file at `from` so that it ends up at `to`.
    pub fn move_file(&mut self, from: usize, to: usize) -> bool {
        if from >= self.files.len() || to >= self.files.len() {
            return false;
        }
        let file = self.files.remove(from);
        self.files.insert(to, file);
        true
    }

    /// Sort by file name, case-insensitively.
    pub fn sort_by_name(&mut self) {
        self.files.sort_by(|a, b| compare_names(&a.path, &b.path));
    }

    /// Files in order.
    pub fn files(&self) -> &[WorkingFile] {
        &self.files
    }

    /// Paths in order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|file| file.path.clone()).collect()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of page counts.
    pub fn total_pages(&self) -> usize {
        self.files.iter().map(|file| file.pages).sum()
    }

    /// Sum of file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }
}

fn compare_names(a: &Path, b: &Path) -> Ordering {
    let key = |path: &Path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    key(a).cmp(&key(b))
}

/// Everything needed to submit a job except its inputs.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    /// Operation, which also selects the working set.
    pub kind: JobKind,
    /// Split strategy for split jobs.
    pub split_mode: Option<SplitMode>,
    /// Enhancement options as chosen by the operator.
    pub options: JobOptions,
    /// Destination folder.
    pub output_folder: PathBuf,
    /// Explicit output name.
    pub output_name: Option<String>,
}

/// Actions a front end can request.
#[derive(Debug, Clone)]
pub enum UiCommand {
    /// Validate and append files to a tab's working set.
    AddFiles { tab: JobKind, paths: Vec<PathBuf> },
    /// Remove one file from a tab.
    RemoveFile { tab: JobKind, index: usize },
    /// Empty a tab.
    ClearFiles { tab: JobKind },
    /// Reorder a tab.
    MoveFile { tab: JobKind, from: usize, to: usize },
    /// Sort a tab by file name.
    SortByName { tab: JobKind },
    /// Start a job on a tab's working set.
    Submit(JobSubmission),
    /// Ask the running job to stop.
    Cancel,
    /// Look for checkpoints of interrupted sessions.
    ScanRecovery,
    /// Delete the checkpoints found by the last scan.
    DiscardRecovery,
    /// Stop and clean up.
    Shutdown,
}

/// Result of one command.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Files were offered to a working set.
    FilesAdded {
        added: Vec<PathBuf>,
        duplicates: usize,
        rejected: Vec<(PathBuf, PdfSmithError)>,
    },
    /// A working set changed.
    WorkingSetChanged,
    /// The command referred to a file that does not exist.
    Unchanged,
    /// A job was queued.
    Submitted(JobHandle),
    /// Cancellation was requested.
    CancelRequested,
    /// Checkpoints from earlier sessions.
    Recovery(Vec<RecoveredJob>),
    /// Number of checkpoints deleted.
    RecoveryDiscarded(usize),
    /// Final cleanup ran.
    ShutDown(SweepReport),
}

/// Maps [`UiCommand`]s to operations.
pub struct Dispatcher {
    context: Arc<AppContext>,
    worker: JobWorker,
    resolver: Box<dyn ConflictResolver>,
    merge_set: WorkingSet,
    split_set: WorkingSet,
    recovered: Vec<RecoveredJob>,
}

impl Dispatcher {
    /// Dispatcher driving `worker`, asking `resolver` about option conflicts.
    pub fn new(
        context: Arc<AppContext>,
        worker: JobWorker,
        resolver: Box<dyn ConflictResolver>,
    ) -> Self {
        let max_files = context.settings().limits.max_files;
        Self {
            context,
            worker,
            resolver,
            merge_set: WorkingSet::new(max_files),
            split_set: WorkingSet::new(max_files),
            recovered: Vec::new(),
        }
    }

    /// Working set of `tab`.
    pub fn working_set(&self, tab: JobKind) -> &WorkingSet {
        match tab {
            JobKind::Merge => &self.merge_set,
            JobKind::Split => &self.split_set,
        }
    }

    fn working_set_mut(&mut self, tab: JobKind) -> &mut WorkingSet {
        match tab {
            JobKind::Merge => &mut self.merge_set,
            JobKind::Split => &mut self.split_set,
        }
    }

    /// Whether a job is queued or running.
    pub fn is_busy(&self) -> bool {
        self.worker.is_busy()
    }

    /// Execute one command.
    pub fn dispatch(&mut self, command: UiCommand) -> Result<CommandOutcome> {
        debug!(?command, "dispatching command");
        match command {
            UiCommand::AddFiles { tab, paths } => Ok(self.add_files(tab, paths)),
            UiCommand::RemoveFile { tab, index } => {
                let removed = self.working_set_mut(tab).remove(index);
                Ok(match removed {
                    Some(file) => {
                        self.context.forget(&file.path);
                        CommandOutcome::WorkingSetChanged
                    }
                    None => CommandOutcome::Unchanged,
                })
            }
            UiCommand::ClearFiles { tab } => {
                for file in self.working_set(tab).files() {
                    self.context.forget(&file.path);
                }
                self.working_set_mut(tab).clear();
                Ok(CommandOutcome::WorkingSetChanged)
            }
            UiCommand::MoveFile { tab, from, to } => Ok(
                if self.working_set_mut(tab).move_file(from, to) {
                    CommandOutcome::WorkingSetChanged
                } else {
                    CommandOutcome::Unchanged
                },
            ),
            UiCommand::SortByName { tab } => {
                self.working_set_mut(tab).sort_by_name();
                Ok(CommandOutcome::WorkingSetChanged)
            }
            UiCommand::Submit(submission) => self.submit(submission).map(CommandOutcome::Submitted),
            UiCommand::Cancel => {
                if self.worker.is_busy() {
                    info!("cancellation requested");
                    self.context.cancel().cancel();
                }
                Ok(CommandOutcome::CancelRequested)
            }
            UiCommand::ScanRecovery => {
                self.recovered = self.context.scan_recovery();
                Ok(CommandOutcome::Recovery(self.recovered.clone()))
            }
            UiCommand::DiscardRecovery => {
                let mut discarded = 0;
                for job in std::mem::take(&mut self.recovered) {
                    self.context.checkpoints().discard(&job)?;
                    discarded += 1;
                }
                Ok(CommandOutcome::RecoveryDiscarded(discarded))
            }
            UiCommand::Shutdown => {
                self.context.cancel().cancel();
                Ok(CommandOutcome::ShutDown(self.context.shutdown()))
            }
        }
    }

    fn add_files(&mut self, tab: JobKind, paths: Vec<PathBuf>) -> CommandOutcome {
        let mut added = Vec::new();
        let mut duplicates = 0;
        let mut rejected = Vec::new();

        for path in paths {
            if self.working_set(tab).contains(&path) {
                duplicates += 1;
                continue;
            }
            let outcome = self
                .context
                .admit(&path)
                .and_then(|verdict| self.working_set_mut(tab).add(verdict.into()));
            match outcome {
                Ok(true) => added.push(path),
                Ok(false) => duplicates += 1,
                Err(e) => rejected.push((path, e)),
            }
        }

        CommandOutcome::FilesAdded {
            added,
            duplicates,
            rejected,
        }
    }

    fn submit(&mut self, submission: JobSubmission) -> Result<JobHandle> {
        let set = self.working_set(submission.kind);
        if set.is_empty() {
            return Err(PdfSmithError::invalid_config("No files selected"));
        }

        let options = submission.options.resolve_conflicts(self.resolver.as_ref());
        let request = JobRequest {
            kind: submission.kind,
            inputs: set.paths(),
            split_mode: submission.split_mode,
            options,
            output_folder: submission.output_folder,
            output_name: submission.output_name,
        };
        self.worker.submit(request)
    }
}
