//! pdfsmith - merge and split PDF documents through a guarded job pipeline.
//!
//! Every input passes a security check before it is touched. A job runs on a
//! single background worker, moves through explicit states, writes every
//! intermediate file through a tracker and commits its result atomically
//! under a name that never overwrites an existing file. It supports:
//!
//! - Merging files in a chosen order
//! - Splitting by page ranges, every page, fixed intervals or part counts
//! - PDF/A-2B conversion, recompression and password protection
//! - Cooperative cancellation and crash-recovery checkpoints
//! - An append-only audit log
//!
//! # Examples
//!
//! ## Running a job
//!
//! ```no_run
//! use std::sync::Arc;
//! use pdfsmith::config::Settings;
//! use pdfsmith::context::AppContext;
//! use pdfsmith::job::JobRequest;
//! use pdfsmith::worker::JobWorker;
//!
//! # fn example() -> pdfsmith::Result<()> {
//! let context = Arc::new(AppContext::new(Settings::load())?);
//! let worker = JobWorker::spawn(Arc::clone(&context), None)?;
//!
//! let request = JobRequest::merge(vec!["a.pdf".into(), "b.pdf".into()], "out");
//! let report = worker.submit(request)?.wait_blocking()?;
//! println!("wrote {:?}", report.outputs);
//! # Ok(())
//! # }
//! ```
//!
//! ## Page ranges
//!
//! ```
//! use pdfsmith::ranges::parse_page_ranges;
//!
//! let pages = parse_page_ranges("1-3, 5", 10, 10_000).unwrap();
//! assert_eq!(pages, vec![1, 2, 3, 5]);
//! ```

#![warn(clippy::all)]

pub mod audit;
pub mod cancel;
pub mod checkpoint;
pub mod chunked;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod job;
pub mod logging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod ranges;
pub mod rasterizer;
pub mod report;
pub mod resilience;
pub mod tracker;
pub mod utils;
pub mod validation;
pub mod worker;

// Re-export commonly used types
pub use context::AppContext;
pub use error::{ErrorKind, PdfSmithError, Result};
pub use job::{JobKind, JobOptions, JobRequest, SplitMode};
pub use pipeline::{JobPipeline, JobReport, JobState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
