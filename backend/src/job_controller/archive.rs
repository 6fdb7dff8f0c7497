//! Packs a batch's successful documents into `archive.zip`.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_NAME: &str = "archive.zip";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no documents to archive")]
    Empty,
    #[error("archive I/O: {0}")]
    Io(#[from] io::Error),
    #[error("archive encoding: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub documents: usize,
}

/// Write `entries` (archive name, file on disk) into `<dir>/archive.zip`.
///
/// The zip is streamed into a temporary file next to the destination and
/// renamed into place, so a failed build never leaves a partial archive.
/// Entry timestamps are fixed, making the archive reproducible for the same
/// documents. Blocking; run it off the async workers.
pub fn build(dir: &Path, entries: &[(String, PathBuf)]) -> Result<ArchiveSummary, ArchiveError> {
    if entries.is_empty() {
        return Err(ArchiveError::Empty);
    }
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(NamedTempFile::new_in(dir)?);
    for (name, path) in entries {
        zip.start_file(name.as_str(), options)?;
        let mut document = File::open(path)?;
        io::copy(&mut document, &mut zip)?;
    }
    let tmp = zip.finish()?;

    let dest = dir.join(ARCHIVE_NAME);
    let file = tmp.persist(&dest).map_err(|e| e.error)?;
    let size_bytes = file.metadata()?.len();
    Ok(ArchiveSummary {
        path: dest,
        size_bytes,
        documents: entries.len(),
    })
}
