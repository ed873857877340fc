//! Admission checks for input files and batches.
//!
//! [`SecurityValidator::validate`] runs the per-file rules in a fixed order
//! and stops at the first failure:
//! 1. the path exists
//! 2. the file is within the size ceiling (checked before any content read)
//! 3. the path contains no traversal sequence or command metacharacter
//! 4. the resolved location passes the same rules and is a regular file
//! 5. the content starts with the PDF signature and parses with pages
//! 6. a bounded prefix carries no embedded script marker
//!
//! Batch ceilings (file count, cumulative pages) are enforced by callers
//! through [`check_file_count`] and [`PageBudget`].
//!
//! # Examples
//!
//! ```no_run
//! use pdfsmith::config::Limits;
//! use pdfsmith::engine::LopdfEngine;
//! use pdfsmith::validation::SecurityValidator;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let validator = SecurityValidator::new(Limits::default(), Arc::new(LopdfEngine::new()));
//! let verdict = validator.validate(Path::new("report.pdf"))?;
//! println!("{} pages", verdict.page_count);
//! # Ok::<(), pdfsmith::PdfSmithError>(())
//! ```

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Limits;
use crate::engine::DocumentEngine;
use crate::error::{PdfSmithError, Result};
use crate::utils::format_file_size;

/// Magic bytes every accepted file must start with.
pub const PDF_SIGNATURE: &[u8; 4] = b"%PDF";

/// Marker of embedded active content.
pub const SCRIPT_MARKER: &[u8] = b"/JavaScript";

/// Sequences rejected anywhere in a path.
const DANGEROUS_PATTERNS: [&str; 8] = ["..", "|", "&", ";", "`", "\0", "\r", "\n"];

/// Outcome of admitting one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Path as supplied.
    pub path: PathBuf,
    /// Size in bytes.
    pub file_size: u64,
    /// Number of pages.
    pub page_count: usize,
}

/// Per-file admission validator.
#[derive(Clone)]
pub struct SecurityValidator {
    limits: Limits,
    engine: Arc<dyn DocumentEngine>,
}

impl SecurityValidator {
    /// Create a validator enforcing `limits`.
    pub fn new(limits: Limits, engine: Arc<dyn DocumentEngine>) -> Self {
        Self { limits, engine }
    }

    /// Validate a single input file.
    ///
    /// # Errors
    ///
    /// Returns a Security error for existence, size, path and content rule
    /// failures, and a Corruption error when the file cannot be parsed.
    pub fn validate(&self, path: &Path) -> Result<Verdict> {
        let verdict = self.run_rules(path);
        if let Err(e) = &verdict {
            warn!(path = %path.display(), error = %e, "file rejected");
        }
        verdict
    }

    fn run_rules(&self, path: &Path) -> Result<Verdict> {
        // 1. Existence.
        let metadata = fs::metadata(path)
            .map_err(|_| PdfSmithError::security(path, "File does not exist"))?;

        // 2. Size, before reading any content.
        let file_size = metadata.len();
        if file_size > self.limits.max_file_size {
            return Err(PdfSmithError::security(
                path,
                format!(
                    "File is too large ({} > {})",
                    format_file_size(file_size),
                    format_file_size(self.limits.max_file_size)
                ),
            ));
        }

        // 3. Path characters.
        check_path_text(path)?;

        // 4. Resolved location.
        check_resolved_location(path)?;

        // 5. Signature, then structure.
        let mut prefix = vec![0u8; self.limits.scan_prefix_bytes.max(PDF_SIGNATURE.len())];
        let filled = read_prefix(path, &mut prefix)?;
        prefix.truncate(filled);
        if !prefix.starts_with(PDF_SIGNATURE) {
            return Err(PdfSmithError::security(
                path,
                "File is not a valid PDF (signature mismatch)",
            ));
        }

        let doc = self.engine.load(path)?;
        let page_count = self.engine.page_count(&doc);
        if page_count == 0 {
            return Err(PdfSmithError::corruption(path, "Document has no pages"));
        }

        // 6. Embedded script marker within the scanned prefix.
        let scanned = &prefix[..prefix.len().min(self.limits.scan_prefix_bytes)];
        if contains(scanned, SCRIPT_MARKER) {
            return Err(PdfSmithError::security(
                path,
                "PDF contains embedded JavaScript",
            ));
        }

        debug!(path = %path.display(), page_count, "file admitted");
        Ok(Verdict {
            path: path.to_path_buf(),
            file_size,
            page_count,
        })
    }
}

/// Reject traversal sequences and command metacharacters anywhere in `path`.
pub fn check_path_text(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| text.contains(*p)) {
        return Err(PdfSmithError::security(
            path,
            format!("Path contains a forbidden sequence ({})", pattern.escape_debug()),
        ));
    }
    Ok(())
}

/// The fully resolved location must be a regular file whose path passes the
/// same character rules and holds no parent-directory component.
fn check_resolved_location(path: &Path) -> Result<()> {
    let resolved = fs::canonicalize(path)
        .map_err(|e| PdfSmithError::security(path, format!("Cannot resolve path: {e}")))?;

    if resolved
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PdfSmithError::security(path, "Path traversal detected"));
    }

    check_path_text(&resolved).map_err(|_| {
        PdfSmithError::security(path, "Path resolves to a location with forbidden characters")
    })?;

    if !resolved.is_file() {
        return Err(PdfSmithError::security(path, "Path does not resolve to a regular file"));
    }
    Ok(())
}

fn read_prefix(path: &Path, buffer: &mut [u8]) -> Result<usize> {
    let mut file = File::open(path)
        .map_err(|e| PdfSmithError::security(path, format!("Cannot read file: {e}")))?;
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                return Err(PdfSmithError::security(path, format!("Cannot read file: {e}")));
            }
        }
    }
    Ok(filled)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Enforce the per-job file ceiling.
pub fn check_file_count(count: usize, max_files: usize) -> Result<()> {
    if count > max_files {
        return Err(PdfSmithError::overload(format!(
            "{count} files selected, at most {max_files} are allowed"
        )));
    }
    Ok(())
}

/// Running total of pages admitted into one job.
#[derive(Debug, Clone)]
pub struct PageBudget {
    used: usize,
    max: usize,
}

impl PageBudget {
    /// Budget of `max` pages.
    pub fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    /// Count `pages` against the budget.
    pub fn charge(&mut self, pages: usize) -> Result<()> {
        let total = self.used.saturating_add(pages);
        if total > self.max {
            return Err(PdfSmithError::overload(format!(
                "{total} pages in total, at most {} are allowed",
                self.max
            )));
        }
        self.used = total;
        Ok(())
    }

    /// Pages charged so far.
    pub fn used(&self) -> usize {
        self.used
    }
}
