//! Small helpers shared across modules.

use std::path::PathBuf;

use anyhow::Context;

use crate::error::{PdfSmithError, Result};

/// Expand shell-style patterns into concrete paths, preserving order.
///
/// A pattern that matches nothing is an error so that typos surface before
/// a job starts.
pub fn collect_paths_for_patterns<T>(patterns: T) -> Result<Vec<PathBuf>>
where
    T: IntoIterator,
    T::Item: AsRef<str>,
{
    let mut resolved_paths = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        let matches = collect_paths_for_pattern(pattern)?;
        if matches.is_empty() {
            return Err(PdfSmithError::invalid_config(format!(
                "No files match '{pattern}'"
            )));
        }
        resolved_paths.extend(matches);
    }

    Ok(resolved_paths)
}

fn collect_paths_for_pattern(pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|err| {
        PdfSmithError::invalid_config(format!("Invalid pattern '{pattern}': {err}"))
    })?;

    let mut resolved_paths = Vec::new();
    for entry in paths {
        let path = entry.with_context(|| format!("Cannot read a match of '{pattern}'"))?;
        resolved_paths.push(path);
    }
    resolved_paths.sort();
    Ok(resolved_paths)
}

/// Format a byte count as a human-readable string.
pub fn format_file_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}
