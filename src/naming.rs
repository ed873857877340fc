//! Output file naming.
//!
//! Generated names combine the first input's base name, the operation and a
//! timestamp. Every name is disambiguated against the destination folder
//! with [`unique_path`] before anything is written there.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

/// Longest source base name carried into a generated name, in characters.
pub const MAX_BASE_LEN: usize = 20;

/// Fallback name when there is no input to derive one from.
pub const FALLBACK_NAME: &str = "document.pdf";

/// Base name of `path` without extension, truncated to [`MAX_BASE_LEN`].
pub fn base_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    stem.chars().take(MAX_BASE_LEN).collect()
}

/// Timestamp fragment used in generated names.
pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H%M").to_string()
}

/// Default name for a merge of `inputs`.
pub fn merge_name(inputs: &[PathBuf], stamp: &str) -> String {
    let Some(first) = inputs.first() else {
        return FALLBACK_NAME.to_string();
    };
    let base = base_name(first);
    match inputs.len() {
        1 => format!("{base}_full_{stamp}.pdf"),
        count => format!("{base}_merged_{count}files_{stamp}.pdf"),
    }
}

/// Default name for a page extraction from `input`.
pub fn extract_name(input: &Path, stamp: &str) -> String {
    format!("{}_extract_{stamp}.pdf", base_name(input))
}

/// Name of one fixed-interval part.
pub fn interval_part_name(base: &str, part: usize, pages: &RangeInclusive<u32>) -> String {
    format!(
        "{base}_part_{part:02}_pages_{}-{}.pdf",
        pages.start(),
        pages.end()
    )
}

/// Name of one of `total` fixed-count parts.
pub fn counted_part_name(
    base: &str,
    part: usize,
    total: usize,
    pages: &RangeInclusive<u32>,
) -> String {
    format!(
        "{base}_part_{part:02}_of_{total:02}_pages_{}-{}.pdf",
        pages.start(),
        pages.end()
    )
}

/// Name of a single-page output.
pub fn page_name(base: &str, page: u32, total: u32) -> String {
    format!("{base}_page_{page:03}_of_{total:03}.pdf")
}

/// First free path for `name` inside `folder`.
///
/// Tries `name`, then `name(1)`, `name(2)` and so on. After
/// `max_collisions` attempts a Unix-timestamp suffix is used instead.
pub fn unique_path(folder: &Path, name: &str, max_collisions: u32) -> PathBuf {
    let candidate = folder.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = split_extension(name);
    for counter in 1..=max_collisions {
        let candidate = folder.join(format!("{stem}({counter}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    folder.join(format!("{stem}_{}{ext}", Utc::now().timestamp()))
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}
