use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checksum::ChecksumOutcome;
use crate::error::ManifestError;
use crate::registry::Manifest;
use crate::transport::{Transport, TransportDispatcher};

#[derive(Debug, Clone, Serialize)]
pub struct FetchedItem {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub fetched: Vec<FetchedItem>,
    pub failed: Vec<FetchFailure>,
}

impl FetchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Download if absent, verify always.
pub struct Fetcher<T: Transport> {
    dispatcher: TransportDispatcher<T>,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(dispatcher: TransportDispatcher<T>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &TransportDispatcher<T> {
        &self.dispatcher
    }

    /// Fetches the dataset `query` resolves to and returns its local path.
    /// `extract` overrides the entry's own flag.
    pub fn fetch_one(
        &self,
        manifest: &mut Manifest,
        query: &str,
        extract: Option<bool>,
    ) -> Result<Utf8PathBuf, ManifestError> {
        let name = manifest.resolve_name(query)?;
        let entry = manifest
            .get(&name)
            .cloned()
            .ok_or_else(|| ManifestError::NotFound(name.clone()))?;
        let extract = extract.unwrap_or(entry.extract()) && !entry.skip_download;

        let raw_path = manifest.resolve_path(&entry, false);
        let final_path = manifest.resolve_path(&entry, extract);

        if !final_path.as_std_path().exists() {
            let extract_path = extract.then(|| final_path.as_std_path());
            self.dispatcher
                .fetch(&entry, raw_path.as_std_path(), extract_path)?;
        }

        // The stored checksum covers the entry's own path only.
        if !entry.skip_download && extract != entry.extract() {
            debug!(%name, path = %final_path, "not the entry's own path; checksum not checked");
            return Ok(final_path);
        }

        match manifest
            .verifier()
            .verify(&entry, final_path.as_std_path())?
        {
            ChecksumOutcome::Bootstrapped(sha256) => {
                info!(%name, %sha256, "recording checksum");
                manifest.record_checksum(&name, sha256)?;
            }
            ChecksumOutcome::Verified | ChecksumOutcome::Skipped => {}
        }
        Ok(final_path)
    }

    /// Fetches every named dataset (all of them when `names` is `None`).
    /// A failing dataset is reported and the rest are still fetched.
    pub fn fetch_all(&self, manifest: &mut Manifest, names: Option<&[String]>) -> FetchReport {
        let names = match names {
            Some(names) => names.to_vec(),
            None => manifest.entries().keys().cloned().collect(),
        };

        let mut report = FetchReport::default();
        for name in names {
            match self.fetch_one(manifest, &name, None) {
                Ok(path) => report.fetched.push(FetchedItem {
                    name,
                    path: path.to_string(),
                }),
                Err(err) => {
                    warn!(%name, error = %err, "fetch failed");
                    report.failed.push(FetchFailure {
                        name,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }
}
