//! Command-line front end.
//!
//! The CLI is one more front end for the [`Dispatcher`]: it turns arguments
//! into [`UiCommand`]s, prints pipeline events as they arrive and maps the
//! outcome to an exit code.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use pdfsmith::cli::Cli;
//!
//! let cli = Cli::parse();
//! println!("verbosity {}", cli.verbosity());
//! ```

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::debug;

use crate::commands::{CommandOutcome, Dispatcher, JobSubmission, UiCommand};
use crate::config::{CompressionLevel, Settings};
use crate::context::AppContext;
use crate::error::{PdfSmithError, Result};
use crate::gateway::ProcessGateway;
use crate::job::{ConflictChoice, ConflictResolver, JobKind, JobOptions, Password, SplitMode};
use crate::output::OutputFormatter;
use crate::pipeline::PipelineEvent;
use crate::rasterizer::Ghostscript;
use crate::report::EnvironmentReport;
use crate::utils::collect_paths_for_patterns;
use crate::worker::JobWorker;

/// Merge and split PDF documents.
///
/// Inputs are validated before any work starts. Intermediate files are
/// tracked and removed however a job ends, and results are never written
/// over existing files.
#[derive(Parser, Debug)]
#[command(name = "pdfsmith")]
#[command(version)]
#[command(about = "Merge and split PDF documents", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// More diagnostic output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge files into one document, in the order given
    ///
    /// Examples:
    ///   pdfsmith merge a.pdf b.pdf -o out/
    ///   pdfsmith merge "chapters/*.pdf" --compress balanced
    Merge(MergeArgs),

    /// Split files into several documents
    ///
    /// Examples:
    ///   pdfsmith split book.pdf --pages "1-5, 10"
    ///   pdfsmith split book.pdf --parts 4
    Split(SplitArgs),

    /// Show or dismiss jobs interrupted in earlier sessions
    Recover {
        /// Delete the checkpoints of interrupted jobs
        #[arg(long)]
        discard: bool,
    },

    /// Report the external tools and limits in effect
    Doctor,
}

/// Arguments of `merge`.
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Input PDF files or glob patterns
    #[arg(required = true, value_name = "FILE")]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments of `split`.
#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Input PDF files or glob patterns
    #[arg(required = true, value_name = "FILE")]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub mode: SplitModeArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Exactly one split strategy.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct SplitModeArgs {
    /// Extract these pages into one file (e.g. "1-5, 10, 20-30")
    #[arg(long, value_name = "RANGES")]
    pub pages: Option<String>,

    /// Write every page to its own file
    #[arg(long)]
    pub all: bool,

    /// Write consecutive groups of N pages
    #[arg(long, value_name = "N")]
    pub every: Option<usize>,

    /// Divide into K parts of near-equal size
    #[arg(long, value_name = "K")]
    pub parts: Option<usize>,
}

impl SplitModeArgs {
    /// The selected split mode.
    pub fn to_mode(&self) -> Result<SplitMode> {
        match (&self.pages, self.all, self.every, self.parts) {
            (Some(pages), false, None, None) => Ok(SplitMode::ExtractPages(pages.clone())),
            (None, true, None, None) => Ok(SplitMode::AllPages),
            (None, false, Some(n), None) => Ok(SplitMode::FixedInterval(n)),
            (None, false, None, Some(k)) => Ok(SplitMode::FixedPartCount(k)),
            _ => Err(PdfSmithError::invalid_config(
                "Choose exactly one of --pages, --all, --every or --parts",
            )),
        }
    }
}

/// Destination and enhancement options shared by `merge` and `split`.
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Destination folder
    #[arg(short, long = "output-dir", value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Output file name instead of a generated one
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Convert the result to PDF/A-2B (needs Ghostscript)
    #[arg(long)]
    pub pdfa: bool,

    /// Protect the result with a password
    #[arg(long, value_name = "PASSWORD", env = "PDFSMITH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Recompress with Ghostscript: max, balanced or min
    ///
    /// Without a value the level from the settings file is used.
    #[arg(long, value_name = "LEVEL", num_args = 0..=1)]
    pub compress: Option<Option<String>>,

    /// Remove document information and XMP metadata
    #[arg(long)]
    pub strip_metadata: bool,

    /// Keep PDF/A when it conflicts with --password
    #[arg(long, conflicts_with = "yes_protect")]
    pub yes_pdfa: bool,

    /// Keep password protection when it conflicts with --pdfa
    #[arg(long)]
    pub yes_protect: bool,
}

impl OutputArgs {
    /// Options as typed, before conflict resolution.
    pub fn to_options(&self, default_level: CompressionLevel) -> Result<JobOptions> {
        let compress = match &self.compress {
            None => None,
            Some(None) => Some(default_level),
            Some(Some(level)) => Some(level.parse()?),
        };
        let protect = self.password.as_deref().map(Password::new).transpose()?;

        Ok(JobOptions {
            apply_pdfa: self.pdfa,
            protect,
            compress,
            strip_metadata: self.strip_metadata,
        })
    }

    /// Answer given on the command line to the PDF/A versus protection
    /// question.
    pub fn conflict_choice(&self) -> Option<ConflictChoice> {
        match (self.yes_pdfa, self.yes_protect) {
            (true, _) => Some(ConflictChoice::KeepPdfA),
            (_, true) => Some(ConflictChoice::KeepProtection),
            _ => None,
        }
    }
}

impl Cli {
    /// Verbosity level: -1 quiet, 0 normal, higher is more verbose.
    pub fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            i8::try_from(self.verbose).unwrap_or(i8::MAX)
        }
    }
}

/// Resolves the PDF/A versus protection conflict from a flag or a prompt.
pub struct PromptResolver {
    preset: Option<ConflictChoice>,
}

impl PromptResolver {
    /// Resolver answering `preset` when given, otherwise asking on stdin.
    pub fn new(preset: Option<ConflictChoice>) -> Self {
        Self { preset }
    }
}

impl ConflictResolver for PromptResolver {
    fn choose(&self) -> Option<ConflictChoice> {
        if self.preset.is_some() {
            return self.preset;
        }
        if !io::stdin().is_terminal() {
            return None;
        }

        print!(
            "PDF/A and password protection cannot be combined. Keep [a] PDF/A or [p] protection? [p]: "
        );
        io::stdout().flush().ok();

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer).ok()?;
        parse_conflict_answer(&answer)
    }
}

/// Interpret an answer to the conflict prompt.
pub fn parse_conflict_answer(answer: &str) -> Option<ConflictChoice> {
    match answer.trim().to_lowercase().as_str() {
        "a" | "pdfa" | "pdf/a" => Some(ConflictChoice::KeepPdfA),
        "p" | "protect" | "protection" | "password" => Some(ConflictChoice::KeepProtection),
        _ => None,
    }
}

/// Run the parsed command line and return the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let formatter = OutputFormatter::new(cli.quiet, cli.verbose > 0);
    let settings = Settings::load();

    match cli.command {
        Command::Doctor => {
            let ghostscript = Ghostscript::discover(
                settings.ghostscript_override(),
                ProcessGateway::new(settings.limits.kill_timeout()),
                settings.limits.tool_timeout(),
            );
            let report = EnvironmentReport::gather(&settings, &ghostscript).await;
            println!("{report}");
            Ok(0)
        }
        Command::Recover { discard } => recover(settings, discard, &formatter),
        Command::Merge(args) => {
            run_job(settings, JobKind::Merge, &args.inputs, None, &args.output, &formatter).await
        }
        Command::Split(args) => {
            let mode = args.mode.to_mode()?;
            run_job(
                settings,
                JobKind::Split,
                &args.inputs,
                Some(mode),
                &args.output,
                &formatter,
            )
            .await
        }
    }
}

fn recover(settings: Settings, discard: bool, formatter: &OutputFormatter) -> Result<i32> {
    let context = Arc::new(AppContext::new(settings)?);
    let worker = JobWorker::spawn(Arc::clone(&context), None)?;
    let mut dispatcher = Dispatcher::new(context, worker, Box::new(PromptResolver::new(None)));

    let CommandOutcome::Recovery(jobs) = dispatcher.dispatch(UiCommand::ScanRecovery)? else {
        return Ok(0);
    };
    if jobs.is_empty() {
        formatter.success("No interrupted jobs found");
        return Ok(0);
    }

    if discard {
        if let CommandOutcome::RecoveryDiscarded(count) =
            dispatcher.dispatch(UiCommand::DiscardRecovery)?
        {
            formatter.success(&format!("Discarded {count} checkpoint(s)"));
        }
    } else {
        formatter.recovery(&jobs);
    }
    Ok(0)
}

async fn run_job(
    settings: Settings,
    kind: JobKind,
    patterns: &[String],
    split_mode: Option<SplitMode>,
    output: &OutputArgs,
    formatter: &OutputFormatter,
) -> Result<i32> {
    let options = output.to_options(settings.compression)?;
    let context = Arc::new(AppContext::new(settings)?);
    formatter.recovery(&context.scan_recovery());

    let (events, receiver) = unbounded_channel();
    let printer = tokio::spawn(print_events(receiver, formatter.clone()));
    let worker = JobWorker::spawn(Arc::clone(&context), Some(events))?;
    let resolver = Box::new(PromptResolver::new(output.conflict_choice()));
    let mut dispatcher = Dispatcher::new(Arc::clone(&context), worker, resolver);

    let inputs = collect_paths_for_patterns(patterns)?;
    formatter.info(&format!("Validating {} file(s)...", inputs.len()));
    if let CommandOutcome::FilesAdded {
        duplicates,
        rejected,
        ..
    } = dispatcher.dispatch(UiCommand::AddFiles {
        tab: kind,
        paths: inputs,
    })? {
        if duplicates > 0 {
            formatter.debug(&format!("{duplicates} duplicate file(s) ignored"));
        }
        for (path, e) in &rejected {
            formatter.warning(&format!("Rejected {}: {e}", path.display()));
        }
        // A merge is all or nothing; a split works on whatever was admitted.
        if kind == JobKind::Merge
            && let Some((_, e)) = rejected.into_iter().next()
        {
            dispatcher.dispatch(UiCommand::Shutdown)?;
            return Err(e);
        }
    }

    let submission = JobSubmission {
        kind,
        split_mode,
        options,
        output_folder: output.output_dir.clone(),
        output_name: output.name.clone(),
    };
    let outcome = dispatcher.dispatch(UiCommand::Submit(submission));
    let handle = match outcome {
        Ok(CommandOutcome::Submitted(handle)) => handle,
        Ok(_) => return Err(PdfSmithError::other("job was not submitted")),
        Err(e) => {
            dispatcher.dispatch(UiCommand::Shutdown)?;
            return Err(e);
        }
    };

    let wait = handle.wait();
    tokio::pin!(wait);
    let result = tokio::select! {
        result = &mut wait => result,
        _ = tokio::signal::ctrl_c() => {
            formatter.warning("Cancelling...");
            dispatcher.dispatch(UiCommand::Cancel)?;
            wait.await
        }
    };

    dispatcher.dispatch(UiCommand::Shutdown)?;
    // Dropping the dispatcher stops the worker and closes the event stream.
    drop(dispatcher);
    if let Err(e) = printer.await {
        debug!(error = %e, "event printer stopped abnormally");
    }

    let report = result?;
    formatter.report(&report);
    Ok(if report.is_cancelled() {
        PdfSmithError::Cancelled.exit_code()
    } else {
        0
    })
}

async fn print_events(mut receiver: UnboundedReceiver<PipelineEvent>, formatter: OutputFormatter) {
    while let Some(event) = receiver.recv().await {
        formatter.event(&event);
    }
}
