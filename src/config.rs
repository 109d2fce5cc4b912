use camino::Utf8PathBuf;
use directories::BaseDirs;

use crate::error::ManifestError;
use crate::registry::Manifest;

pub const CACHE_DIR_ENV: &str = "KIRA_DM_CACHE_DIR";
pub const MANIFEST_ENV: &str = "KIRA_DM_MANIFEST";
pub const SKIP_CHECKSUM_ENV: &str = "KIRA_DM_SKIP_CHECKSUM";
pub const CHECKSUM_FOLDERS_ENV: &str = "KIRA_DM_CHECKSUM_FOLDERS";
pub const DEFAULT_MANIFEST: &str = "datasets.toml";

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub root: Option<String>,
    pub manifest: Option<String>,
    pub skip_checksum: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub root: Utf8PathBuf,
    pub manifest_path: Utf8PathBuf,
    pub skip_checksum: bool,
    pub checksum_folders: bool,
}

impl Settings {
    /// Settings from flags, then the process environment, then defaults.
    pub fn from_env(overrides: SettingsOverrides) -> Result<Self, ManifestError> {
        Self::resolve_with(overrides, |name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(overrides: SettingsOverrides, lookup: F) -> Result<Self, ManifestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let root = match overrides.root.or_else(|| env(CACHE_DIR_ENV)) {
            Some(root) => Utf8PathBuf::from(root),
            None => default_cache_root()?,
        };
        let manifest_path = overrides
            .manifest
            .or_else(|| env(MANIFEST_ENV))
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_MANIFEST));
        let skip_checksum = overrides.skip_checksum
            || env(SKIP_CHECKSUM_ENV).map(|value| is_truthy(&value)).unwrap_or(false);
        let checksum_folders = env(CHECKSUM_FOLDERS_ENV)
            .map(|value| is_truthy(&value))
            .unwrap_or(true);

        Ok(Self {
            root,
            manifest_path,
            skip_checksum,
            checksum_folders,
        })
    }

    /// Opens the manifest these settings point at, creating nothing until the
    /// first mutation.
    pub fn open_manifest(&self) -> Result<Manifest, ManifestError> {
        let mut manifest = Manifest::open(self.manifest_path.clone(), self.root.clone())?;
        manifest.skip_checksum = self.skip_checksum;
        manifest.checksum_folders = self.checksum_folders;
        Ok(manifest)
    }
}

fn default_cache_root() -> Result<Utf8PathBuf, ManifestError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-dataset-manifest"))
                .ok()
        })
        .ok_or_else(|| ManifestError::Filesystem("unable to resolve cache directory".to_string()))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
