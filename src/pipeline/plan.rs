//! Turning a split mode into a list of output parts.

use std::path::Path;

use crate::error::Result;
use crate::job::SplitMode;
use crate::naming;
use crate::ranges::{interval_chunks, parse_page_ranges, part_chunks};

/// One output file of a split job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPart {
    /// 1-based pages of the source, ascending.
    pub pages: Vec<u32>,
    /// Output file name before disambiguation.
    pub name: String,
}

/// Plan the parts produced from `input`, a document of `page_count` pages.
///
/// `output_name` is used verbatim for extraction. Multi-part modes use its
/// stem as the base of every part name.
pub fn plan_parts(
    mode: &SplitMode,
    input: &Path,
    page_count: u32,
    output_name: Option<&str>,
    stamp: &str,
    max_pages: usize,
) -> Result<Vec<PlannedPart>> {
    let base = match output_name {
        Some(name) => naming::base_name(Path::new(name)),
        None => naming::base_name(input),
    };

    let parts = match mode {
        SplitMode::ExtractPages(ranges) => {
            let pages = parse_page_ranges(ranges, page_count, max_pages)?;
            let name = output_name
                .map(str::to_string)
                .unwrap_or_else(|| naming::extract_name(input, stamp));
            vec![PlannedPart { pages, name }]
        }
        SplitMode::AllPages => (1..=page_count)
            .map(|page| PlannedPart {
                pages: vec![page],
                name: naming::page_name(&base, page, page_count),
            })
            .collect(),
        SplitMode::FixedInterval(interval) => interval_chunks(page_count, *interval)
            .into_iter()
            .enumerate()
            .map(|(index, run)| PlannedPart {
                name: naming::interval_part_name(&base, index + 1, &run),
                pages: run.collect(),
            })
            .collect(),
        SplitMode::FixedPartCount(parts) => {
            let runs = part_chunks(page_count, *parts);
            let total = runs.len();
            runs.into_iter()
                .enumerate()
                .map(|(index, run)| PlannedPart {
                    name: naming::counted_part_name(&base, index + 1, total, &run),
                    pages: run.collect(),
                })
                .collect()
        }
    };

    Ok(parts)
}
