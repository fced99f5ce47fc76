//! File fingerprinting
//!
//! Builds the [`FileDescriptor`] peers compare to decide whether they picked
//! the same video. Only a fixed-size prefix is hashed, so analysis stays cheap
//! for multi-gigabyte files.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::player::{MediaProbe, ProbeError};
use crate::sync::FileDescriptor;

/// Number of leading bytes covered by the content digest
pub const PREFIX_LEN: usize = 100 * 1024;

/// Errors that can occur while analyzing a local file
#[derive(Debug, Error)]
pub enum FileAnalysisError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Path has no file name")]
    NoFileName,

    #[error("Could not read duration: {0}")]
    Duration(#[from] ProbeError),
}

/// Lowercase hex SHA-256 of at most `prefix_len` leading bytes of `reader`
pub fn prefix_digest<R: Read>(reader: R, prefix_len: usize) -> io::Result<String> {
    let mut header = Vec::with_capacity(prefix_len);
    reader.take(prefix_len as u64).read_to_end(&mut header)?;

    let mut hasher = Sha256::new();
    hasher.update(&header);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Analyze the file at `path`
pub fn analyze(
    path: &Path,
    probe: &dyn MediaProbe,
    prefix_len: usize,
) -> Result<FileDescriptor, FileAnalysisError> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or(FileAnalysisError::NoFileName)?;

    let file_size = std::fs::metadata(path)?.len() as i64;
    let content_digest = prefix_digest(File::open(path)?, prefix_len)?;
    let duration_seconds = probe.duration(path)?;

    debug!(
        "Analyzed {}: {} bytes, {:.2}s, digest {}",
        filename, file_size, duration_seconds, content_digest
    );

    Ok(FileDescriptor {
        filename,
        content_digest,
        file_size,
        duration_seconds,
    })
}

impl FileDescriptor {
    /// Fingerprint a file using the default prefix length
    pub fn from_path(path: &Path, probe: &dyn MediaProbe) -> Result<Self, FileAnalysisError> {
        analyze(path, probe, PREFIX_LEN)
    }
}
