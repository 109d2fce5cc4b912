use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::ManifestError;
use crate::key::build_key;
use crate::uri::{ParsedUri, SchemeKind, parse_uri};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] =
        [ArchiveFormat::Zip, ArchiveFormat::Tar, ArchiveFormat::TarGz];

    pub fn name(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::TarGz => ".tar.gz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ArchiveFormat {
    type Err = ManifestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ArchiveFormat::ALL
            .into_iter()
            .find(|format| format.name() == value.trim())
            .ok_or_else(|| ManifestError::UnsupportedFormat(value.to_string()))
    }
}

/// Format implied by a path: a known archive suffix, otherwise the extension
/// of the last segment.
pub fn infer_format(path: &str) -> Option<String> {
    let last = path.rsplit('/').next().unwrap_or(path);
    if let Some(format) = ArchiveFormat::ALL
        .into_iter()
        .find(|format| last.len() > format.suffix().len() && last.ends_with(format.suffix()))
    {
        return Some(format.name().to_string());
    }
    match last.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < last.len() => Some(last[idx + 1..].to_string()),
        _ => None,
    }
}

/// Transport-specific part of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Download {
        extract: bool,
        format: Option<String>,
    },
    Repository {
        branch: Option<String>,
    },
}

/// Caller-supplied fields of an entry; everything else is derived from the uri.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub version: Option<String>,
    pub branch: Option<String>,
    pub doi: Option<String>,
    pub aliases: Vec<String>,
    pub key: Option<String>,
    pub sha256: Option<String>,
    pub skip_checksum: bool,
    pub skip_download: bool,
    pub extract: bool,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub uri: String,
    pub location: ParsedUri,
    pub version: Option<String>,
    pub doi: Option<String>,
    pub aliases: Vec<String>,
    pub key: String,
    pub sha256: Option<String>,
    pub skip_checksum: bool,
    pub skip_download: bool,
    pub kind: EntryKind,
}

impl Entry {
    pub fn new(uri: &str, options: EntryOptions) -> Result<Self, ManifestError> {
        let location = parse_uri(uri)?;
        let version = non_empty(options.version).or_else(|| location.version.clone());
        if let Some(key) = options.key.as_deref() {
            if key.split(['/', '\\']).any(|component| component == "..") {
                return Err(ManifestError::Parse {
                    uri: uri.to_string(),
                    reason: format!("key {key} escapes the root folder"),
                });
            }
        }
        let key = non_empty(options.key).unwrap_or_else(|| {
            build_key(&location.host, &location.path, version.as_deref())
        });

        let kind = if location.kind() == SchemeKind::Git {
            EntryKind::Repository {
                branch: non_empty(options.branch),
            }
        } else {
            if options.branch.is_some() {
                warn!(uri, "branch only applies to git repositories; ignoring it");
            }
            let format = non_empty(options.format)
                .or_else(|| location.format.clone())
                .or_else(|| infer_format(&location.path));
            let is_archive = format
                .as_deref()
                .map(|value| value.parse::<ArchiveFormat>().is_ok())
                .unwrap_or(false);
            EntryKind::Download {
                extract: options.extract && is_archive,
                format,
            }
        };

        Ok(Self {
            uri: uri.trim().to_string(),
            location,
            version,
            doi: non_empty(options.doi),
            aliases: options.aliases,
            key,
            sha256: non_empty(options.sha256),
            skip_checksum: options.skip_checksum,
            skip_download: options.skip_download,
            kind,
        })
    }

    pub fn is_repository(&self) -> bool {
        matches!(self.kind, EntryKind::Repository { .. })
    }

    pub fn extract(&self) -> bool {
        matches!(self.kind, EntryKind::Download { extract: true, .. })
    }

    pub fn format(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Download { format, .. } => format.as_deref(),
            EntryKind::Repository { .. } => None,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Repository { branch } => branch.as_deref(),
            EntryKind::Download { .. } => None,
        }
    }

    /// Ref handed to `git clone --branch`: the branch, else the version.
    pub fn clone_ref(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Repository { branch } => branch.as_deref().or(self.version.as_deref()),
            EntryKind::Download { .. } => None,
        }
    }

    /// The uri as handed to git or HTTP: the `#version` fragment is ours.
    pub fn remote_uri(&self) -> &str {
        match self.uri.split_once('#') {
            Some((base, _)) => base,
            None => &self.uri,
        }
    }

    /// Aliases, DOI, key and path, in that order.
    pub fn alternative_keys(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .iter()
            .map(String::as_str)
            .chain(self.doi.as_deref())
            .chain(std::iter::once(self.key.as_str()))
            .chain(std::iter::once(self.location.path.as_str()))
    }

    /// Field equality ignoring the checksum and its skip flag.
    pub fn same_content(&self, other: &Entry) -> bool {
        self.uri == other.uri
            && self.version == other.version
            && self.doi == other.doi
            && self.aliases == other.aliases
            && self.key == other.key
            && self.skip_download == other.skip_download
            && self.kind == other.kind
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
