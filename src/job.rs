//! Job requests and the option policy applied at admission.
//!
//! A [`JobRequest`] is built by the front end and handed to the pipeline.
//! Before it gets there, [`JobOptions::resolve_conflicts`] settles the one
//! policy conflict the pipeline refuses to handle: PDF/A conversion and
//! password protection are mutually exclusive.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CompressionLevel, Limits};
use crate::error::{PdfSmithError, Result};
use crate::validation::check_file_count;

/// Passwords shorter than this produce a warning.
pub const WEAK_PASSWORD_LEN: usize = 4;

/// Operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Combine inputs into one document.
    Merge,
    /// Produce documents from pages of the inputs.
    Split,
}

impl JobKind {
    /// Lowercase label used in checkpoints and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Split => "split",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a split job divides its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitMode {
    /// Write the pages matched by a page-range expression to one file.
    ExtractPages(String),
    /// One output file per page.
    AllPages,
    /// Consecutive groups of N pages.
    FixedInterval(usize),
    /// Exactly K parts of near-equal size.
    FixedPartCount(usize),
}

/// A document password. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Wrap a password, rejecting blank input.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(PdfSmithError::invalid_config("Password cannot be empty"));
        }
        Ok(Self(value))
    }

    /// The secret itself.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the password is short enough to warrant a warning.
    pub fn is_weak(&self) -> bool {
        self.0.chars().count() < WEAK_PASSWORD_LEN
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Operator's answer to the PDF/A versus protection conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep PDF/A and drop protection.
    KeepPdfA,
    /// Keep protection and drop PDF/A.
    KeepProtection,
}

/// Asks the operator to settle the PDF/A versus protection conflict.
///
/// Returning `None` means no answer was given.
pub trait ConflictResolver {
    /// Ask which of the two options to keep.
    fn choose(&self) -> Option<ConflictChoice>;
}

/// Resolver that never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnswer;

impl ConflictResolver for NoAnswer {
    fn choose(&self) -> Option<ConflictChoice> {
        None
    }
}

/// Resolver with a fixed answer.
impl ConflictResolver for ConflictChoice {
    fn choose(&self) -> Option<ConflictChoice> {
        Some(*self)
    }
}

/// Enhancement stages requested for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Convert the result to PDF/A-2B.
    pub apply_pdfa: bool,
    /// Encrypt the result with this password.
    pub protect: Option<Password>,
    /// Recompress the result with the external rasterizer.
    pub compress: Option<CompressionLevel>,
    /// Remove document information and XMP metadata.
    pub strip_metadata: bool,
}

impl JobOptions {
    /// Whether the two mutually exclusive options are both set.
    pub fn has_conflict(&self) -> bool {
        self.apply_pdfa && self.protect.is_some()
    }

    /// Settle the PDF/A versus protection conflict.
    ///
    /// The operator is always asked when both are set. Without an answer
    /// PDF/A is disabled and protection kept.
    pub fn resolve_conflicts(mut self, resolver: &dyn ConflictResolver) -> Self {
        if !self.has_conflict() {
            return self;
        }

        match resolver.choose() {
            Some(ConflictChoice::KeepPdfA) => {
                info!("PDF/A kept, password protection disabled");
                self.protect = None;
            }
            Some(ConflictChoice::KeepProtection) => {
                info!("password protection kept, PDF/A disabled");
                self.apply_pdfa = false;
            }
            None => {
                warn!("PDF/A and password protection both requested, disabling PDF/A");
                self.apply_pdfa = false;
            }
        }
        self
    }

    /// Non-fatal remarks about the chosen options.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.protect.as_ref().is_some_and(Password::is_weak) {
            warnings.push(format!(
                "Password is shorter than {WEAK_PASSWORD_LEN} characters and offers little protection"
            ));
        }
        warnings
    }

    /// Loggable view of the options with the password removed.
    pub fn summary(&self) -> OptionsSummary {
        OptionsSummary {
            pdfa: self.apply_pdfa,
            protected: self.protect.is_some(),
            compression: self.compress.map(|level| level.as_str().to_string()),
            strip_metadata: self.strip_metadata,
        }
    }
}

/// Coarse options summary safe for logs and audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsSummary {
    /// PDF/A requested.
    pub pdfa: bool,
    /// Protection requested.
    pub protected: bool,
    /// Compression level, if any.
    pub compression: Option<String>,
    /// Metadata removal requested.
    pub strip_metadata: bool,
}

/// One operator-initiated operation.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Merge or split.
    pub kind: JobKind,
    /// Ordered input files.
    pub inputs: Vec<PathBuf>,
    /// Split strategy; ignored for merges.
    pub split_mode: Option<SplitMode>,
    /// Enhancement stages.
    pub options: JobOptions,
    /// Destination folder.
    pub output_folder: PathBuf,
    /// Explicit output file name.
    pub output_name: Option<String>,
}

impl JobRequest {
    /// A merge of `inputs` into `output_folder`.
    pub fn merge(inputs: Vec<PathBuf>, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            kind: JobKind::Merge,
            inputs,
            split_mode: None,
            options: JobOptions::default(),
            output_folder: output_folder.into(),
            output_name: None,
        }
    }

    /// A split of `inputs` into `output_folder`.
    pub fn split(inputs: Vec<PathBuf>, mode: SplitMode, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            kind: JobKind::Split,
            inputs,
            split_mode: Some(mode),
            options: JobOptions::default(),
            output_folder: output_folder.into(),
            output_name: None,
        }
    }

    /// Set the enhancement options.
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Set an explicit output name.
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    /// Check the request's shape before any file is touched.
    ///
    /// Normalizes the output name override to a bare `.pdf` file name.
    pub fn validate(&mut self, limits: &Limits) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(PdfSmithError::invalid_config("No input files specified"));
        }

        check_file_count(self.inputs.len(), limits.max_files)?;

        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input) {
                return Err(PdfSmithError::invalid_config(format!(
                    "Duplicate input file: {}",
                    input.display()
                )));
            }
        }

        match (&self.kind, &self.split_mode) {
            (JobKind::Split, None) => {
                return Err(PdfSmithError::invalid_config("Split job has no split mode"));
            }
            (JobKind::Split, Some(SplitMode::FixedInterval(0))) => {
                return Err(PdfSmithError::invalid_config(
                    "Pages per part must be greater than zero",
                ));
            }
            (JobKind::Split, Some(SplitMode::FixedPartCount(0))) => {
                return Err(PdfSmithError::invalid_config(
                    "Number of parts must be greater than zero",
                ));
            }
            (JobKind::Split, Some(SplitMode::ExtractPages(ranges))) if ranges.trim().is_empty() => {
                return Err(PdfSmithError::invalid_range(ranges.as_str(), "no pages given"));
            }
            _ => {}
        }

        if let Some(name) = self.output_name.take() {
            self.output_name = Some(sanitize_output_name(&name)?);
        }

        Ok(())
    }
}

/// Reduce an operator-supplied name to a bare `.pdf` file name.
pub fn sanitize_output_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let bare = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .trim();

    if bare.is_empty() || bare == "." || bare == ".." {
        return Err(PdfSmithError::invalid_config(format!(
            "Invalid output name: '{name}'"
        )));
    }

    if bare.to_lowercase().ends_with(".pdf") {
        Ok(bare.to_string())
    } else {
        Ok(format!("{bare}.pdf"))
    }
}
