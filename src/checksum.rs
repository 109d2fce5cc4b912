use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::Entry;
use crate::error::ManifestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Skipped,
    /// No checksum was stored yet; this value should be recorded.
    Bootstrapped(String),
    Verified,
}

#[derive(Debug, Clone, Copy)]
pub struct ChecksumVerifier {
    pub skip_checksum: bool,
    pub checksum_folders: bool,
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self {
            skip_checksum: false,
            checksum_folders: true,
        }
    }
}

impl ChecksumVerifier {
    /// Checks `path` against the entry's stored checksum. Never mutates the
    /// entry; a `Bootstrapped` outcome is recorded by the caller.
    pub fn verify(&self, entry: &Entry, path: &Path) -> Result<ChecksumOutcome, ManifestError> {
        if self.skip_checksum || entry.skip_checksum || !path.exists() {
            return Ok(ChecksumOutcome::Skipped);
        }
        if path.is_dir() && !self.checksum_folders {
            return Ok(ChecksumOutcome::Skipped);
        }

        let actual = sha256_path(path)?;
        match entry.sha256.as_deref() {
            None => {
                debug!(path = %path.display(), sha256 = %actual, "checksum bootstrapped");
                Ok(ChecksumOutcome::Bootstrapped(actual))
            }
            Some(expected) if expected.eq_ignore_ascii_case(&actual) => {
                Ok(ChecksumOutcome::Verified)
            }
            Some(expected) => Err(ManifestError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            }),
        }
    }
}

/// SHA-256 of a file, or of every file under a directory concatenated in
/// lexicographic path order.
pub fn sha256_path(path: &Path) -> Result<String, ManifestError> {
    let mut hasher = Sha256::new();
    if path.is_dir() {
        for item in WalkDir::new(path).sort_by_file_name() {
            let item = item.map_err(|err| ManifestError::Filesystem(err.to_string()))?;
            if item.file_type().is_file() {
                feed(&mut hasher, item.path())?;
            }
        }
    } else {
        feed(&mut hasher, path)?;
    }
    Ok(hex::encode(hasher.finalize()))
}

fn feed(hasher: &mut Sha256, path: &Path) -> Result<(), ManifestError> {
    let mut file = File::open(path)
        .map_err(|err| ManifestError::Filesystem(format!("open {}: {err}", path.display())))?;
    io::copy(&mut file, hasher).map_err(|err| ManifestError::Filesystem(err.to_string()))?;
    Ok(())
}
