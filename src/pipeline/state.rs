//! Pipeline states, events and the final report.

use std::fmt;
use std::path::PathBuf;

use crate::job::JobKind;

/// Stage a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Admitted,
    Validating,
    Merging,
    Splitting,
    ConvertingPdfA,
    Protecting,
    Compressing,
    FinalValidating,
    Committing,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    /// Label stored in checkpoints.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Admitted => "Admitted",
            Self::Validating => "Validating",
            Self::Merging => "Merging",
            Self::Splitting => "Splitting",
            Self::ConvertingPdfA => "ConvertingPdfA",
            Self::Protecting => "Protecting",
            Self::Compressing => "Compressing",
            Self::FinalValidating => "FinalValidating",
            Self::Committing => "Committing",
            Self::Done => "Done",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observable progress of a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The job entered a new state.
    StateChanged(JobState),
    /// One unit of work finished.
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    /// A non-fatal problem the operator should know about.
    Warning(String),
    /// The job reached a terminal state.
    Finished(JobState),
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Operation performed.
    pub kind: JobKind,
    /// Output files written, in order.
    pub outputs: Vec<PathBuf>,
    /// Non-fatal problems encountered.
    pub warnings: Vec<String>,
    /// Inputs skipped by a split job, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
    /// Terminal state, `Done` or `Cancelled`.
    pub state: JobState,
}

impl JobReport {
    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Cancelled
    }
}
