use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::{Entry, EntryKind, EntryOptions, infer_format};
use crate::error::ManifestError;
use crate::key::build_key;

/// One dataset as written to the manifest file. Fields equal to their zero
/// value or to what the uri already implies are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_checksum: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_download: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub extract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

pub type ManifestFile = BTreeMap<String, EntryRecord>;

fn is_false(value: &bool) -> bool {
    !*value
}

impl From<&Entry> for EntryRecord {
    fn from(entry: &Entry) -> Self {
        let location = &entry.location;
        let version = entry
            .version
            .clone()
            .filter(|version| location.version.as_ref() != Some(version));
        let derived_key = build_key(&location.host, &location.path, entry.version.as_deref());
        let key = Some(entry.key.clone()).filter(|key| *key != derived_key);

        let (branch, extract, format) = match &entry.kind {
            EntryKind::Repository { branch } => (branch.clone(), false, None),
            EntryKind::Download { extract, format } => {
                let implied = location
                    .format
                    .clone()
                    .or_else(|| infer_format(&location.path));
                let format = format.clone().filter(|format| implied.as_ref() != Some(format));
                (None, *extract, format)
            }
        };

        Self {
            uri: entry.uri.clone(),
            version,
            branch,
            doi: entry.doi.clone(),
            aliases: entry.aliases.clone(),
            key,
            sha256: entry.sha256.clone(),
            skip_checksum: entry.skip_checksum,
            skip_download: entry.skip_download,
            extract,
            format,
        }
    }
}

impl TryFrom<EntryRecord> for Entry {
    type Error = ManifestError;

    fn try_from(record: EntryRecord) -> Result<Self, Self::Error> {
        Entry::new(
            &record.uri,
            EntryOptions {
                version: record.version,
                branch: record.branch,
                doi: record.doi,
                aliases: record.aliases,
                key: record.key,
                sha256: record.sha256,
                skip_checksum: record.skip_checksum,
                skip_download: record.skip_download,
                extract: record.extract,
                format: record.format,
            },
        )
    }
}

pub fn parse_manifest(content: &str) -> Result<BTreeMap<String, Entry>, ManifestError> {
    let file: ManifestFile =
        toml::from_str(content).map_err(|err| ManifestError::ManifestParse(err.to_string()))?;
    file.into_iter()
        .map(|(name, record)| Entry::try_from(record).map(|entry| (name, entry)))
        .collect()
}

pub fn render_manifest(entries: &BTreeMap<String, Entry>) -> Result<String, ManifestError> {
    let file = entries
        .iter()
        .map(|(name, entry)| (name.clone(), EntryRecord::from(entry)))
        .collect::<ManifestFile>();
    toml::to_string_pretty(&file).map_err(|err| ManifestError::ManifestWrite(err.to_string()))
}

pub fn read_manifest(path: &Utf8Path) -> Result<BTreeMap<String, Entry>, ManifestError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| ManifestError::ManifestRead(path.as_std_path().to_path_buf()))?;
    parse_manifest(&content)
}

/// Writes through a sibling temporary file and renames it over `path`.
pub fn write_manifest(
    path: &Utf8Path,
    entries: &BTreeMap<String, Entry>,
) -> Result<(), ManifestError> {
    let content = render_manifest(entries)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ManifestError::ManifestWrite(err.to_string()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| ManifestError::ManifestWrite(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| ManifestError::ManifestWrite(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields_are_omitted() {
        let entry = Entry::new(
            "https://example.org/d/set.zip#2",
            EntryOptions {
                extract: true,
                ..EntryOptions::default()
            },
        )
        .unwrap();
        let record = EntryRecord::from(&entry);
        assert_eq!(
            record,
            EntryRecord {
                uri: "https://example.org/d/set.zip#2".to_string(),
                extract: true,
                ..EntryRecord::default()
            }
        );
    }

    #[test]
    fn explicit_fields_are_kept() {
        let entry = Entry::new(
            "https://h/p",
            EntryOptions {
                version: Some("1".to_string()),
                key: Some("elsewhere".to_string()),
                format: Some("zip".to_string()),
                ..EntryOptions::default()
            },
        )
        .unwrap();
        let record = EntryRecord::from(&entry);
        assert_eq!(record.version.as_deref(), Some("1"));
        assert_eq!(record.key.as_deref(), Some("elsewhere"));
        assert_eq!(record.format.as_deref(), Some("zip"));
    }

    #[test]
    fn render_is_minimal_toml() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "set".to_string(),
            Entry::new("https://h/set.csv", EntryOptions::default()).unwrap(),
        );
        let text = render_manifest(&entries).unwrap();
        assert_eq!(text.trim(), "[set]\nuri = \"https://h/set.csv\"");
    }

    #[test]
    fn parse_rejects_missing_uri() {
        let err = parse_manifest("[set]\nversion = \"1\"\n").unwrap_err();
        assert!(matches!(err, ManifestError::ManifestParse(_)));
    }
}
