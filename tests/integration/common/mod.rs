//! Shared helpers for the integration tests.
//!
//! Documents are generated on the fly with `lopdf` so the suite needs no
//! fixture files. External tools are replaced by in-process fakes.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use futures::future::BoxFuture;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, StringFormat};
use tempfile::TempDir;

use pdfsmith::audit::AuditLog;
use pdfsmith::checkpoint::CheckpointStore;
use pdfsmith::config::{CompressionLevel, Limits, Settings};
use pdfsmith::engine::{DocumentEngine, LopdfEngine};
use pdfsmith::pipeline::JobPipeline;
use pdfsmith::rasterizer::Rasterizer;
use pdfsmith::resilience::RetryPolicy;
use pdfsmith::tracker::TempTracker;
use pdfsmith::{PdfSmithError, Result};

/// Build an in-memory document with `pages` pages of text.
pub fn sample_document(pages: u32, label: &str) -> Document {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for i in 0..pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        format!("{label} page {}", i + 1).into_bytes(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
        ]));
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(pages as i64)),
            ("Kids", Object::Array(kids)),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            ),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc
}

/// Write a `pages`-page PDF to `path`.
pub fn write_pdf(path: &Path, pages: u32) -> PathBuf {
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut doc = sample_document(pages, &label);
    doc.save(path).expect("Failed to write sample PDF");
    path.to_path_buf()
}

/// Number of pages in the PDF at `path`.
pub fn page_count(path: &Path) -> usize {
    Document::load(path)
        .expect("Failed to load output")
        .get_pages()
        .len()
}

/// Whether the file at `path` carries an encryption dictionary.
pub fn is_encrypted(path: &Path) -> bool {
    let bytes = fs::read(path).expect("Failed to read output");
    bytes.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt")
}

/// Sorted listing of the regular files in `dir`.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

/// Concatenated contents of every audit log in `dir`.
pub fn audit_text(dir: &Path) -> String {
    list_files(dir)
        .iter()
        .map(|path| fs::read_to_string(path).unwrap_or_default())
        .collect()
}

/// A scratch workspace with input, output, temp, checkpoint and audit
/// folders.
pub struct Workspace {
    root: TempDir,
    pub tracker: TempTracker,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        for sub in ["in", "out", "tmp", "checkpoints", "audit"] {
            fs::create_dir_all(root.path().join(sub)).expect("Failed to create folder");
        }
        let tracker = TempTracker::new(root.path().join("tmp"));
        Self { root, tracker }
    }

    pub fn path(&self, sub: &str) -> PathBuf {
        self.root.path().join(sub)
    }

    /// Write a `pages`-page input called `name`.
    pub fn input(&self, name: &str, pages: u32) -> PathBuf {
        write_pdf(&self.path("in").join(name), pages)
    }

    /// Write raw bytes as an input called `name`.
    pub fn raw_input(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path("in").join(name);
        fs::write(&path, bytes).expect("Failed to write input");
        path
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path("out")
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        list_files(&self.output_dir())
    }

    /// Files left in the temp folder.
    pub fn temp_files(&self) -> Vec<PathBuf> {
        list_files(&self.path("tmp"))
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(
            self.path("checkpoints"),
            std::process::id(),
            std::time::Duration::from_secs(3600),
        )
    }

    pub fn audit_text(&self) -> String {
        audit_text(&self.path("audit"))
    }

    /// Settings pointing every folder into this workspace.
    pub fn settings(&self) -> Settings {
        Settings {
            temp_dir: Some(self.path("tmp")),
            checkpoint_dir: Some(self.path("checkpoints")),
            audit_dir: Some(self.path("audit")),
            ..Default::default()
        }
    }

    /// Pipeline using the lopdf engine and `rasterizer`, retrying without
    /// delay.
    pub fn pipeline(&self, rasterizer: Arc<dyn Rasterizer>) -> JobPipeline {
        self.pipeline_with(Arc::new(LopdfEngine::new()), rasterizer)
    }

    pub fn pipeline_with(
        &self,
        engine: Arc<dyn DocumentEngine>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> JobPipeline {
        JobPipeline::new(
            engine,
            rasterizer,
            self.tracker.clone(),
            self.checkpoints(),
            AuditLog::new(self.path("audit"), std::process::id(), Utc::now()),
            Limits::default(),
        )
        .with_retry(RetryPolicy::immediate(3))
    }
}

/// Rasterizer for a machine without Ghostscript.
pub struct MissingRasterizer;

impl Rasterizer for MissingRasterizer {
    fn is_available(&self) -> bool {
        false
    }

    fn pdfa_available(&self) -> bool {
        false
    }

    fn compress<'a>(
        &'a self,
        _input: &'a Path,
        _output: &'a Path,
        _level: CompressionLevel,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(PdfSmithError::tool_unavailable("Ghostscript")) })
    }

    fn convert_to_pdfa<'a>(
        &'a self,
        _input: &'a Path,
        _output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(PdfSmithError::tool_unavailable("Ghostscript")) })
    }
}

/// Rasterizer that is installed but fails every run.
pub struct BrokenRasterizer;

impl Rasterizer for BrokenRasterizer {
    fn is_available(&self) -> bool {
        true
    }

    fn pdfa_available(&self) -> bool {
        true
    }

    fn compress<'a>(
        &'a self,
        _input: &'a Path,
        _output: &'a Path,
        _level: CompressionLevel,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(PdfSmithError::processing("Compression", "gs exited with 1")) })
    }

    fn convert_to_pdfa<'a>(
        &'a self,
        _input: &'a Path,
        _output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(PdfSmithError::processing("PDF/A", "gs exited with 1")) })
    }
}

/// Rasterizer that copies its input and counts how often it ran.
#[derive(Default)]
pub struct CopyingRasterizer {
    pub compressions: AtomicUsize,
    pub conversions: AtomicUsize,
}

impl CopyingRasterizer {
    pub fn compressions(&self) -> usize {
        self.compressions.load(Ordering::SeqCst)
    }

    pub fn conversions(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }
}

impl Rasterizer for CopyingRasterizer {
    fn is_available(&self) -> bool {
        true
    }

    fn pdfa_available(&self) -> bool {
        true
    }

    fn compress<'a>(
        &'a self,
        input: &'a Path,
        output: &'a Path,
        _level: CompressionLevel,
    ) -> BoxFuture<'a, Result<()>> {
        self.compressions.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            fs::copy(input, output)?;
            Ok(())
        })
    }

    fn convert_to_pdfa<'a>(
        &'a self,
        input: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            fs::copy(input, output)?;
            Ok(())
        })
    }
}

/// Rasterizer whose output is not a PDF at all.
pub struct GarbageRasterizer;

impl Rasterizer for GarbageRasterizer {
    fn is_available(&self) -> bool {
        true
    }

    fn pdfa_available(&self) -> bool {
        true
    }

    fn compress<'a>(
        &'a self,
        _input: &'a Path,
        output: &'a Path,
        _level: CompressionLevel,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            fs::write(output, vec![b'x'; 4096])?;
            Ok(())
        })
    }

    fn convert_to_pdfa<'a>(
        &'a self,
        _input: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            fs::write(output, vec![b'x'; 4096])?;
            Ok(())
        })
    }
}
