use serde::Serialize;

use crate::domain::{Entry, EntryKind};
use crate::error::ManifestError;
use crate::fetch::{FetchReport, Fetcher};
use crate::registry::{LookupOptions, Manifest, RegisterOptions, SearchOptions};
use crate::transport::{Transport, TransportDispatcher};

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub uri: String,
    pub kind: String,
    pub key: String,
    pub version: Option<String>,
    pub branch: Option<String>,
    pub doi: Option<String>,
    pub aliases: Vec<String>,
    pub format: Option<String>,
    pub extract: bool,
    pub sha256: Option<String>,
    pub path: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub root: String,
    pub manifest: Option<String>,
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub matches: Vec<DatasetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub name: String,
    pub path: String,
    pub present: bool,
}

pub struct App<T: Transport> {
    manifest: Manifest,
    fetcher: Fetcher<T>,
}

impl<T: Transport> App<T> {
    pub fn new(manifest: Manifest, transport: T) -> Self {
        Self::with_dispatcher(manifest, TransportDispatcher::new(transport))
    }

    pub fn with_dispatcher(manifest: Manifest, dispatcher: TransportDispatcher<T>) -> Self {
        Self {
            manifest,
            fetcher: Fetcher::new(dispatcher),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    pub fn transport(&self) -> &T {
        self.fetcher.dispatcher().transport()
    }

    pub fn into_manifest(self) -> Manifest {
        self.manifest
    }

    pub fn add(
        &mut self,
        uri: &str,
        options: RegisterOptions,
    ) -> Result<DatasetSummary, ManifestError> {
        let (name, entry) = self.manifest.register(uri, options)?;
        Ok(self.summary(&name, &entry))
    }

    /// Registers `uri` and fetches it right away.
    pub fn add_and_fetch(
        &mut self,
        uri: &str,
        options: RegisterOptions,
    ) -> Result<FetchResult, ManifestError> {
        let (name, _) = self.manifest.register(uri, options)?;
        self.fetch(&name, None)
    }

    pub fn fetch(
        &mut self,
        query: &str,
        extract: Option<bool>,
    ) -> Result<FetchResult, ManifestError> {
        let name = self.manifest.resolve_name(query)?;
        let path = self.fetcher.fetch_one(&mut self.manifest, &name, extract)?;
        Ok(FetchResult {
            name,
            path: path.to_string(),
        })
    }

    pub fn fetch_all(&mut self, names: Option<&[String]>) -> FetchReport {
        self.fetcher.fetch_all(&mut self.manifest, names)
    }

    pub fn search(&self, query: &str, options: SearchOptions) -> SearchResult {
        let matches = self
            .manifest
            .search(query, options)
            .into_iter()
            .map(|(name, entry)| self.summary(name, entry))
            .collect();
        SearchResult {
            query: query.to_string(),
            matches,
        }
    }

    /// Local path of a dataset without fetching it.
    pub fn path(&self, query: &str, extract: Option<bool>) -> Result<PathResult, ManifestError> {
        let (name, entry) = self.resolve(query)?;
        let path = self
            .manifest
            .resolve_path(entry, extract.unwrap_or(entry.extract()));
        Ok(PathResult {
            name: name.to_string(),
            present: path.as_std_path().exists(),
            path: path.to_string(),
        })
    }

    pub fn list(&self) -> ListResult {
        ListResult {
            root: self.manifest.root().to_string(),
            manifest: self.manifest.file().map(|file| file.to_string()),
            datasets: self
                .manifest
                .entries()
                .iter()
                .map(|(name, entry)| self.summary(name, entry))
                .collect(),
        }
    }

    pub fn info(&self, query: &str) -> Result<DatasetSummary, ManifestError> {
        let (name, entry) = self.resolve(query)?;
        Ok(self.summary(name, entry))
    }

    /// Drops a dataset from the manifest; fetched files stay on disk.
    pub fn remove(&mut self, query: &str) -> Result<DatasetSummary, ManifestError> {
        let name = self.manifest.resolve_name(query)?;
        let entry = self.manifest.remove(&name)?;
        Ok(self.summary(&name, &entry))
    }

    fn resolve(&self, query: &str) -> Result<(&str, &Entry), ManifestError> {
        if let Some((name, entry)) = self.manifest.entries().get_key_value(query) {
            return Ok((name.as_str(), entry));
        }
        self.manifest.lookup(query, LookupOptions::default())
    }

    fn summary(&self, name: &str, entry: &Entry) -> DatasetSummary {
        let path = self.manifest.resolve_path(entry, entry.extract());
        let kind = match entry.kind {
            EntryKind::Download { .. } => "download",
            EntryKind::Repository { .. } => "repository",
        };
        DatasetSummary {
            name: name.to_string(),
            uri: entry.uri.clone(),
            kind: kind.to_string(),
            key: entry.key.clone(),
            version: entry.version.clone(),
            branch: entry.branch().map(str::to_string),
            doi: entry.doi.clone(),
            aliases: entry.aliases.clone(),
            format: entry.format().map(str::to_string),
            extract: entry.extract(),
            sha256: entry.sha256.clone(),
            present: path.as_std_path().exists(),
            path: path.to_string(),
        }
    }
}
