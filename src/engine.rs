//! PDF document capability.
//!
//! The pipeline never touches the PDF object model directly. It asks a
//! [`DocumentEngine`] to load, combine, slice, protect and save documents,
//! and [`LopdfEngine`] answers those requests with `lopdf`. Anything specific
//! to the library version stays inside this module.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use lopdf::{
    Document, EncryptionState, EncryptionVersion, Object, ObjectId, Permissions, StringFormat,
};
use tracing::debug;

use crate::error::{PdfSmithError, Result};
use crate::job::Password;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Document operations used by the pipeline.
pub trait DocumentEngine: Send + Sync {
    /// Parse the document at `path`.
    fn load(&self, path: &Path) -> Result<Document>;

    /// Number of pages in `doc`.
    fn page_count(&self, doc: &Document) -> usize {
        doc.get_pages().len()
    }

    /// Append every page of `source` to the end of `target`.
    fn append(&self, target: &mut Document, source: Document) -> Result<()>;

    /// A copy of `doc` holding only `pages` (1-based, ascending).
    fn select_pages(&self, doc: &Document, pages: &[u32]) -> Result<Document>;

    /// Remove the information dictionary and XMP metadata.
    fn strip_metadata(&self, doc: &mut Document) -> Result<()>;

    /// Encrypt `doc` with `password` as both user and owner password.
    fn encrypt(&self, doc: &mut Document, password: &Password) -> Result<()>;

    /// Write `doc` to `path`, optionally compressing its streams.
    fn save(&self, doc: &mut Document, path: &Path, compress: bool) -> Result<()>;
}

/// [`DocumentEngine`] backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfEngine;

impl LopdfEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for LopdfEngine {
    fn load(&self, path: &Path) -> Result<Document> {
        Document::load(path).map_err(|e| PdfSmithError::corruption(path, e.to_string()))
    }

    fn append(&self, target: &mut Document, mut source: Document) -> Result<()> {
        let source_pages: Vec<ObjectId> = source.get_pages().into_values().collect();
        for &page_id in &source_pages {
            inherit_attributes(&mut source, page_id);
        }

        // Shift every object id of the source past the target's range.
        let offset = target.max_id + 1;
        source.renumber_objects_with(offset);
        target.max_id = source.max_id;

        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        target.objects.extend(source.objects);
        add_pages_to_tree(target, &page_ids)
    }

    fn select_pages(&self, doc: &Document, pages: &[u32]) -> Result<Document> {
        let page_count = doc.get_pages().len() as u32;
        if pages.is_empty() {
            return Err(PdfSmithError::processing("Splitting", "no pages selected"));
        }
        if let Some(&beyond) = pages.iter().find(|&&p| p == 0 || p > page_count) {
            return Err(PdfSmithError::processing(
                "Splitting",
                format!("page {beyond} does not exist (document has {page_count} pages)"),
            ));
        }

        let keep: BTreeSet<u32> = pages.iter().copied().collect();
        let mut selected = doc.clone();

        // Delete from the back so earlier page numbers stay valid.
        let mut to_delete: Vec<u32> = (1..=page_count).filter(|p| !keep.contains(p)).collect();
        to_delete.reverse();
        for page in to_delete {
            selected.delete_pages(&[page]);
        }

        selected.prune_objects();
        Ok(selected)
    }

    fn strip_metadata(&self, doc: &mut Document) -> Result<()> {
        doc.trailer.remove(b"Info");
        let catalog = doc
            .catalog_mut()
            .map_err(|e| PdfSmithError::processing("Metadata removal", e.to_string()))?;
        catalog.remove(b"Metadata");
        Ok(())
    }

    fn encrypt(&self, doc: &mut Document, password: &Password) -> Result<()> {
        ensure_file_id(doc);

        let version = EncryptionVersion::V2 {
            document: &*doc,
            owner_password: password.expose(),
            user_password: password.expose(),
            key_length: 128,
            permissions: Permissions::all(),
        };
        let state = EncryptionState::try_from(version)
            .map_err(|e| PdfSmithError::processing("Protecting", e.to_string()))?;
        doc.encrypt(&state)
            .map_err(|e| PdfSmithError::processing("Protecting", e.to_string()))?;
        Ok(())
    }

    fn save(&self, doc: &mut Document, path: &Path, compress: bool) -> Result<()> {
        doc.prune_objects();
        if compress {
            doc.compress();
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        doc.save_to(&mut writer)
            .map_err(|e| PdfSmithError::processing("Writing", e.to_string()))?;
        writer.flush()?;

        debug!(path = %path.display(), compress, "document written");
        Ok(())
    }
}

/// Copy inheritable attributes down from the page's ancestors so the page
/// keeps them after being re-parented.
fn inherit_attributes(doc: &mut Document, page_id: ObjectId) {
    let mut inherited: Vec<(&[u8], Object)> = Vec::new();
    let Ok(page) = doc.get_dictionary(page_id) else {
        return;
    };

    let mut missing: Vec<&[u8]> = INHERITABLE
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    while let (Some(parent_id), false) = (parent, missing.is_empty()) {
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((*key, value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    if let Ok(page) = doc.get_dictionary_mut(page_id) {
        for (key, value) in inherited {
            page.set(key, value);
        }
    }
}

/// Append `page_ids` to the root page tree of `doc`.
fn add_pages_to_tree(doc: &mut Document, page_ids: &[ObjectId]) -> Result<()> {
    let pages_id = doc
        .catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|e| PdfSmithError::processing("Merging", format!("missing page tree: {e}")))?;

    for &page_id in page_ids {
        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            page.set("Parent", Object::Reference(pages_id));
        }
    }

    let pages = doc
        .get_dictionary_mut(pages_id)
        .map_err(|e| PdfSmithError::processing("Merging", format!("bad page tree: {e}")))?;

    let kids = pages
        .get_mut(b"Kids")
        .and_then(Object::as_array_mut)
        .map_err(|_| PdfSmithError::processing("Merging", "page tree has no Kids array"))?;
    kids.extend(page_ids.iter().map(|&id| Object::Reference(id)));

    let count = pages.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
    pages.set("Count", Object::Integer(count + page_ids.len() as i64));
    Ok(())
}

/// Encryption keys are derived from the file identifier, so make sure one
/// exists.
fn ensure_file_id(doc: &mut Document) {
    if doc.trailer.has(b"ID") {
        return;
    }
    let seed = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_be_bytes();
    let mut id = Vec::with_capacity(16);
    id.extend_from_slice(&seed);
    id.extend_from_slice(&std::process::id().to_be_bytes());
    id.extend_from_slice(&(doc.objects.len() as u32).to_be_bytes());
    let id = Object::String(id, StringFormat::Hexadecimal);
    doc.trailer.set("ID", Object::Array(vec![id.clone(), id]));
}
