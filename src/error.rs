use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("invalid dataset uri {uri}: {reason}")]
    Parse { uri: String, reason: String },

    #[error("entries {old_name} and {new_name} share no identifying field (key, uri, version or name)")]
    IdentityMismatch { old_name: String, new_name: String },

    #[error("dataset already registered as {old_name}; refusing to rename it to {new_name}")]
    #[diagnostic(help("pass overwrite to rename the entry, or register under the existing name"))]
    DuplicateName { old_name: String, new_name: String },

    #[error("dataset {new_name} conflicts with existing entry {old_name}\n{details}")]
    #[diagnostic(help(
        "pass overwrite to replace the existing entry, or choose a different name or key"
    ))]
    DuplicateConflict {
        old_name: String,
        new_name: String,
        details: String,
    },

    #[error("name {name} is taken by an unrelated entry ({occupant})")]
    #[diagnostic(help("remove {name} first, or choose a different name"))]
    NameTaken { name: String, occupant: String },

    #[error("checksum mismatch for {path}: expected {expected}, found {actual}")]
    #[diagnostic(help(
        "the remote data may have been republished or the local copy is corrupted; inspect it and update sha256 manually"
    ))]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("transport failed for {uri}: {message}")]
    Transport { uri: String, message: String },

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("multiple datasets match {query}: {}", candidates.join(", "))]
    MultipleMatches {
        query: String,
        candidates: Vec<String>,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{uri} returned status {status}")]
    HttpStatus { uri: String, status: u16 },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("failed to write manifest: {0}")]
    ManifestWrite(String),
}
