//! Console rendering for the command-line front end.
//!
//! # Examples
//!
//! ```
//! use pdfsmith::output::formatter::OutputFormatter;
//!
//! let formatter = OutputFormatter::new(false, false);
//! formatter.info("Merging 3 files...");
//! formatter.success("Created report.pdf");
//! ```

use std::io::{self, IsTerminal, Write};

use crate::checkpoint::RecoveredJob;
use crate::pipeline::{JobReport, JobState, PipelineEvent};

/// Level of output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

/// Console printer honouring quiet and verbose modes.
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    quiet: bool,
    verbose: bool,
    colored: bool,
}

impl OutputFormatter {
    /// Create a formatter.
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self {
            quiet,
            verbose,
            colored: io::stdout().is_terminal() && std::env::var_os("TERM").is_some(),
        }
    }

    /// Formatter that only prints warnings and errors.
    pub fn quiet() -> Self {
        Self::new(true, false)
    }

    /// Whether quiet mode is on.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Whether verbose mode is on.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Informational line, suppressed when quiet.
    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.print(MessageLevel::Info, message);
        }
    }

    /// Success line, suppressed when quiet.
    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print(MessageLevel::Success, message);
        }
    }

    /// Warning line, always shown.
    pub fn warning(&self, message: &str) {
        self.print(MessageLevel::Warning, message);
    }

    /// Error line, always shown.
    pub fn error(&self, message: &str) {
        self.print(MessageLevel::Error, message);
    }

    /// Detail line, shown only when verbose.
    pub fn debug(&self, message: &str) {
        if self.verbose {
            self.print(MessageLevel::Debug, message);
        }
    }

    /// Render one pipeline event.
    pub fn event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StateChanged(state) => {
                if let Some(label) = state_label(*state) {
                    self.debug(label);
                }
            }
            PipelineEvent::Progress {
                current,
                total,
                message,
            } => self.info(&format!("  [{current}/{total}] {message}")),
            PipelineEvent::Warning(message) => self.warning(message),
            PipelineEvent::Finished(_) => {}
        }
    }

    /// Summarize a finished job.
    pub fn report(&self, report: &JobReport) {
        for output in &report.outputs {
            self.success(&format!("Created {}", output.display()));
        }
        if report.is_cancelled() {
            self.warning(&format!(
                "Cancelled; {} file(s) were written before stopping",
                report.outputs.len()
            ));
        } else if !report.skipped.is_empty() {
            self.warning(&format!("{} input file(s) were skipped", report.skipped.len()));
        }
    }

    /// List checkpoints left by interrupted sessions.
    pub fn recovery(&self, jobs: &[RecoveredJob]) {
        if jobs.is_empty() {
            return;
        }
        self.warning(&format!("{} interrupted job(s) found:", jobs.len()));
        for job in jobs {
            self.warning(&recovery_line(job));
        }
        self.info("Run `pdfsmith recover --discard` to dismiss them.");
    }

    fn print(&self, level: MessageLevel, message: &str) {
        let (prefix, color) = match level {
            MessageLevel::Info => ("", ""),
            MessageLevel::Success => ("✓ ", "\x1b[32m"),
            MessageLevel::Warning => ("⚠ ", "\x1b[33m"),
            MessageLevel::Error => ("✗ ", "\x1b[31m"),
            MessageLevel::Debug => ("→ ", "\x1b[36m"),
        };

        let mut stdout = io::stdout().lock();
        let _ = if self.colored && !color.is_empty() {
            writeln!(stdout, "{color}{prefix}{message}\x1b[0m")
        } else {
            writeln!(stdout, "{prefix}{message}")
        };
    }
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new(false, false)
    }
}

/// Human label of the states worth announcing.
pub fn state_label(state: JobState) -> Option<&'static str> {
    match state {
        JobState::Validating => Some("Validating input files..."),
        JobState::Merging => Some("Merging documents..."),
        JobState::Splitting => Some("Splitting document..."),
        JobState::ConvertingPdfA => Some("Converting to PDF/A..."),
        JobState::Protecting => Some("Applying password protection..."),
        JobState::Compressing => Some("Compressing..."),
        JobState::FinalValidating => Some("Checking output..."),
        _ => None,
    }
}

/// One line describing a recovered checkpoint.
pub fn recovery_line(job: &RecoveredJob) -> String {
    let checkpoint = &job.checkpoint;
    format!(
        "  {} job interrupted {} min ago during {} ({} file(s) done, {} temp file(s))",
        checkpoint.kind,
        job.age_minutes,
        checkpoint.stage,
        checkpoint.files_processed.len(),
        checkpoint.temp_files.len()
    )
}
