//! Fixed-size chunk processing for large files.
//!
//! Each processed chunk lands in its own tracked artifact. If processing
//! stops early for any reason, every chunk written so far is discarded
//! before the error is returned.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{PdfSmithError, Result};
use crate::tracker::TempTracker;
use crate::utils::format_file_size;

/// Default chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

const STAGE: &str = "Chunked processing";

/// Position of a chunk within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Zero-based chunk index.
    pub index: usize,
    /// Total number of chunks.
    pub total: usize,
}

/// Read `path` in `chunk_size` pieces and write each callback result to a
/// tracked chunk artifact.
///
/// Returns the chunk artifacts in order; the caller owns them and is
/// responsible for discarding them through `tracker`.
///
/// # Errors
///
/// Any read, callback or cancellation failure is reported as a Processing
/// error after the chunks produced so far have been deleted.
pub fn process_in_chunks<F>(
    path: &Path,
    chunk_size: usize,
    cancel: &CancelToken,
    tracker: &TempTracker,
    mut callback: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&[u8], ChunkInfo) -> Result<Vec<u8>>,
{
    if chunk_size == 0 {
        return Err(PdfSmithError::invalid_config("Chunk size must be greater than zero"));
    }

    let mut produced = Vec::new();
    let outcome = write_chunks(path, chunk_size, cancel, tracker, &mut callback, &mut produced);

    match outcome {
        Ok(()) => Ok(produced),
        Err(e) => {
            for chunk in &produced {
                tracker.discard(chunk);
            }
            Err(PdfSmithError::processing(STAGE, e.to_string()))
        }
    }
}

fn write_chunks<F>(
    path: &Path,
    chunk_size: usize,
    cancel: &CancelToken,
    tracker: &TempTracker,
    callback: &mut F,
    produced: &mut Vec<PathBuf>,
) -> Result<()>
where
    F: FnMut(&[u8], ChunkInfo) -> Result<Vec<u8>>,
{
    let file_size = fs::metadata(path)?.len();
    let total = usize::try_from(file_size.div_ceil(chunk_size as u64)).unwrap_or(usize::MAX);
    info!(
        file = %path.display(),
        size = %format_file_size(file_size),
        chunks = total,
        "processing file in chunks"
    );

    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; chunk_size];

    for index in 0..total {
        cancel.check()?;

        let filled = read_full(&mut file, &mut buffer)?;
        if filled == 0 {
            break;
        }

        let processed = callback(&buffer[..filled], ChunkInfo { index, total })?;
        let chunk_path = tracker.create(&format!("chunk_{index}_"), ".tmp")?;
        produced.push(chunk_path.clone());
        fs::write(&chunk_path, processed)?;

        debug!(chunk = index + 1, total, "chunk written");
    }

    Ok(())
}

fn read_full(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
