//! Page-range parsing and split planning.
//!
//! Page-range syntax:
//! - `"7"`: a single page
//! - `"1-5"`: an inclusive range
//! - `"5-1"`: a reversed range, normalized to `1-5`
//! - `"1-3, 5, 10-12"`: any comma-separated combination
//!
//! Whitespace is ignored and empty tokens are skipped. The resolved page list
//! is sorted ascending with duplicates removed.

use std::ops::RangeInclusive;

use crate::error::{PdfSmithError, Result};

/// A parsed but not yet bounds-checked page-range expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRange {
    source: String,
    items: Vec<PageRangeItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageRangeItem {
    Single(u32),
    Range(u32, u32),
}

impl PageRange {
    /// Parse a page-range expression.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPageRange` for empty input, non-numeric tokens and
    /// page zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use pdfsmith::ranges::PageRange;
    ///
    /// let range = PageRange::parse("10-8, 2").unwrap();
    /// assert_eq!(range.resolve(20, 10_000).unwrap(), vec![2, 8, 9, 10]);
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let mut items = Vec::new();

        for part in compact.split(',').filter(|part| !part.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let start = parse_page(s, start)?;
                let end = parse_page(s, end)?;
                items.push(PageRangeItem::Range(start.min(end), start.max(end)));
            } else {
                items.push(PageRangeItem::Single(parse_page(s, part)?));
            }
        }

        if items.is_empty() {
            return Err(PdfSmithError::invalid_range(s, "no pages given"));
        }

        Ok(Self {
            source: s.to_string(),
            items,
        })
    }

    /// Resolve against a document of `page_count` pages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPageRange` when a page lies outside `[1, page_count]`
    /// and `Overload` when more than `max_pages` pages are selected.
    pub fn resolve(&self, page_count: u32, max_pages: usize) -> Result<Vec<u32>> {
        let mut pages = Vec::new();

        for item in &self.items {
            let (start, end) = match *item {
                PageRangeItem::Single(page) => (page, page),
                PageRangeItem::Range(start, end) => (start, end),
            };
            if end > page_count {
                return Err(PdfSmithError::invalid_range(
                    self.source.as_str(),
                    format!("page {end} is beyond the last page ({page_count})"),
                ));
            }
            pages.extend(start..=end);
        }

        pages.sort_unstable();
        pages.dedup();

        if pages.len() > max_pages {
            return Err(PdfSmithError::overload(format!(
                "{} pages selected, at most {max_pages} are allowed",
                pages.len()
            )));
        }

        Ok(pages)
    }
}

fn parse_page(source: &str, token: &str) -> Result<u32> {
    let page: u32 = token.parse().map_err(|_| {
        PdfSmithError::invalid_range(source, format!("'{token}' is not a page number"))
    })?;
    if page == 0 {
        return Err(PdfSmithError::invalid_range(
            source,
            "page numbers start at 1",
        ));
    }
    Ok(page)
}

/// Parse and resolve a page-range expression in one step.
pub fn parse_page_ranges(s: &str, page_count: u32, max_pages: usize) -> Result<Vec<u32>> {
    PageRange::parse(s)?.resolve(page_count, max_pages)
}

/// Consecutive groups of `interval` pages; the last group may be shorter.
pub fn interval_chunks(page_count: u32, interval: usize) -> Vec<RangeInclusive<u32>> {
    if interval == 0 || page_count == 0 {
        return Vec::new();
    }
    let step = u32::try_from(interval).unwrap_or(u32::MAX);
    (1..=page_count)
        .step_by(interval)
        .map(|start| start..=start.saturating_add(step - 1).min(page_count))
        .collect()
}

/// Divide `page_count` pages into `parts` runs whose sizes differ by at most one.
///
/// Leftover pages go one each to the leading parts. Parts that would be
/// empty are not produced.
pub fn part_chunks(page_count: u32, parts: usize) -> Vec<RangeInclusive<u32>> {
    if parts == 0 || page_count == 0 {
        return Vec::new();
    }
    let parts = u32::try_from(parts).unwrap_or(u32::MAX).min(page_count);
    let base = page_count / parts;
    let remainder = page_count % parts;

    let mut chunks = Vec::with_capacity(parts as usize);
    let mut start = 1;
    for index in 0..parts {
        let size = base + u32::from(index < remainder);
        chunks.push(start..=start + size - 1);
        start += size;
    }
    chunks
}
