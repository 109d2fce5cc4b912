use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::checksum::ChecksumVerifier;
use crate::domain::{Entry, EntryKind, EntryOptions};
use crate::error::ManifestError;
use crate::key::{build_extract_path, name_from_key};
use crate::manifest;
use crate::uri::ParsedUri;

const GIT_HOSTS: [&str; 4] = ["github.com", "gitlab.com", "bitbucket.org", "codeberg.org"];

#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub name: Option<String>,
    pub overwrite: bool,
    pub check_duplicate: bool,
    pub entry: EntryOptions,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            name: None,
            overwrite: false,
            check_duplicate: true,
            entry: EntryOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Also match aliases, DOI, key and path.
    pub alt: bool,
    /// Substring instead of exact matches.
    pub partial: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            alt: true,
            partial: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions {
    pub search: SearchOptions,
    /// Take the first match with a warning instead of failing when several
    /// entries match.
    pub first_match: bool,
}

/// Dataset name → entry map, with the root folder fetched content lives under
/// and an optional backing file every mutation is written to.
///
/// Entries iterate in lexicographic name order. Search results and the
/// duplicate tie-break rely on that order.
#[derive(Debug, Clone)]
pub struct Manifest {
    entries: BTreeMap<String, Entry>,
    root: Utf8PathBuf,
    file: Option<Utf8PathBuf>,
    pub skip_checksum: bool,
    pub checksum_folders: bool,
}

impl Manifest {
    /// In-memory manifest; nothing is persisted.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            entries: BTreeMap::new(),
            root: root.into(),
            file: None,
            skip_checksum: false,
            checksum_folders: true,
        }
    }

    /// Manifest backed by `file`, loaded from it when it exists.
    pub fn open(
        file: impl Into<Utf8PathBuf>,
        root: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ManifestError> {
        let file = file.into();
        let mut manifest = Self::new(root);
        if file.as_std_path().exists() {
            manifest.entries = manifest::read_manifest(&file)?;
        }
        manifest.file = Some(file);
        Ok(manifest)
    }

    /// Loads `file` and keeps it as the backing file. The file must exist.
    pub fn load(
        file: impl Into<Utf8PathBuf>,
        root: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ManifestError> {
        let file = file.into();
        let entries = manifest::read_manifest(&file)?;
        let mut manifest = Self::new(root);
        manifest.entries = entries;
        manifest.file = Some(file);
        Ok(manifest)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn file(&self) -> Option<&Utf8Path> {
        self.file.as_deref()
    }

    pub fn entries(&self) -> &BTreeMap<String, Entry> {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn verifier(&self) -> ChecksumVerifier {
        ChecksumVerifier {
            skip_checksum: self.skip_checksum,
            checksum_folders: self.checksum_folders,
        }
    }

    /// Writes the backing file, if any.
    pub fn save(&self) -> Result<(), ManifestError> {
        match &self.file {
            Some(file) => manifest::write_manifest(file, &self.entries),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, file: &Utf8Path) -> Result<(), ManifestError> {
        manifest::write_manifest(file, &self.entries)
    }

    /// Adds the dataset at `uri`, or reconciles it with an existing entry
    /// sharing its key or name. The map is left untouched on any error.
    pub fn register(
        &mut self,
        uri: &str,
        options: RegisterOptions,
    ) -> Result<(String, Entry), ManifestError> {
        let candidate = Entry::new(uri, options.entry)?;
        let name = options
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_name(&candidate));

        if options.check_duplicate {
            let duplicate = self
                .entries
                .iter()
                .find(|(_, entry)| entry.key == candidate.key)
                .map(|(old_name, _)| old_name.clone());
            if let Some(old_name) = duplicate {
                debug!(%old_name, key = %candidate.key, "found entry with the same key");
                return self.update_entry(&old_name, &name, candidate, options.overwrite);
            }
        }

        if self.entries.contains_key(&name) {
            return self.update_entry(&name, &name, candidate, options.overwrite);
        }

        info!(%name, key = %candidate.key, "registering dataset");
        let inserted = candidate.clone();
        self.apply(|entries| {
            entries.insert(name.clone(), inserted);
        })?;
        Ok((name, candidate))
    }

    /// Reconciles the entry stored under `old_name` with `candidate`, which is
    /// to be stored under `new_name`.
    pub fn update_entry(
        &mut self,
        old_name: &str,
        new_name: &str,
        candidate: Entry,
        overwrite: bool,
    ) -> Result<(String, Entry), ManifestError> {
        let existing = self
            .entries
            .get(old_name)
            .cloned()
            .ok_or_else(|| ManifestError::NotFound(old_name.to_string()))?;

        let same_identity = existing.key == candidate.key
            || existing.uri == candidate.uri
            || existing.version == candidate.version
            || old_name == new_name;
        if !same_identity {
            return Err(ManifestError::IdentityMismatch {
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
            });
        }

        if existing.same_content(&candidate) {
            if old_name == new_name {
                debug!(name = old_name, "dataset already registered");
                return Ok((old_name.to_string(), existing));
            }
            if !overwrite {
                return Err(ManifestError::DuplicateName {
                    old_name: old_name.to_string(),
                    new_name: new_name.to_string(),
                });
            }
            info!(from = old_name, to = new_name, "renaming dataset");
            self.replace(old_name, new_name, existing.clone())?;
            return Ok((new_name.to_string(), existing));
        }

        if !overwrite {
            return Err(ManifestError::DuplicateConflict {
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
                details: self.conflict_details(old_name, &existing, new_name, &candidate),
            });
        }

        info!(from = old_name, to = new_name, "overwriting dataset");
        self.replace(old_name, new_name, candidate.clone())?;
        Ok((new_name.to_string(), candidate))
    }

    /// Removes an entry from the manifest. Fetched content is left on disk.
    pub fn remove(&mut self, name: &str) -> Result<Entry, ManifestError> {
        let removed = self
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| ManifestError::NotFound(name.to_string()))?;
        self.apply(|entries| {
            entries.remove(name);
        })?;
        Ok(removed)
    }

    /// Stores a freshly computed checksum and persists it.
    pub fn record_checksum(&mut self, name: &str, sha256: String) -> Result<(), ManifestError> {
        if !self.entries.contains_key(name) {
            return Err(ManifestError::NotFound(name.to_string()));
        }
        self.apply(|entries| {
            if let Some(entry) = entries.get_mut(name) {
                entry.sha256 = Some(sha256);
            }
        })
    }

    /// Matches `query` against the manifest in four phases: exact name,
    /// exact alternative key (`alt`), name substring (`partial`), then
    /// alternative key substring (`alt` and `partial`). Comparisons ignore
    /// case. Within a phase results follow map order, and an entry matched
    /// by an earlier phase is not repeated. Callers taking the first result
    /// depend on this ordering.
    pub fn search(&self, query: &str, options: SearchOptions) -> Vec<(&str, &Entry)> {
        let needle = query.to_lowercase();
        let mut seen = BTreeSet::new();
        let mut results = Vec::new();

        let mut phase = |predicate: &dyn Fn(&str, &Entry) -> bool| {
            for (name, entry) in &self.entries {
                if !seen.contains(name.as_str()) && predicate(name, entry) {
                    seen.insert(name.as_str());
                    results.push((name.as_str(), entry));
                }
            }
        };

        phase(&|name, _| name.to_lowercase() == needle);
        if options.alt {
            phase(&|_, entry| {
                entry
                    .alternative_keys()
                    .any(|value| value.to_lowercase() == needle)
            });
        }
        if options.partial {
            phase(&|name, _| name.to_lowercase().contains(&needle));
        }
        if options.alt && options.partial {
            phase(&|_, entry| {
                entry
                    .alternative_keys()
                    .any(|value| value.to_lowercase().contains(&needle))
            });
        }
        results
    }

    /// Single-result lookup; zero matches is `NotFound`.
    pub fn lookup(
        &self,
        query: &str,
        options: LookupOptions,
    ) -> Result<(&str, &Entry), ManifestError> {
        self.find(query, options)?
            .ok_or_else(|| ManifestError::NotFound(query.to_string()))
    }

    /// Single-result lookup returning `None` when nothing matches.
    pub fn find(
        &self,
        query: &str,
        options: LookupOptions,
    ) -> Result<Option<(&str, &Entry)>, ManifestError> {
        let results = self.search(query, options.search);
        if results.len() > 1 {
            let candidates = results
                .iter()
                .map(|(name, _)| name.to_string())
                .collect::<Vec<_>>();
            if !options.first_match {
                return Err(ManifestError::MultipleMatches {
                    query: query.to_string(),
                    candidates,
                });
            }
            warn!(query, ?candidates, "multiple datasets match; using the first");
        }
        Ok(results.into_iter().next())
    }

    /// Direct name first, then a default lookup.
    pub fn resolve_name(&self, query: &str) -> Result<String, ManifestError> {
        if self.entries.contains_key(query) {
            return Ok(query.to_string());
        }
        self.lookup(query, LookupOptions::default())
            .map(|(name, _)| name.to_string())
    }

    /// Local path of an entry's content. Pure; touches no filesystem.
    pub fn resolve_path(&self, entry: &Entry, extract: bool) -> Utf8PathBuf {
        if entry.skip_download {
            return Utf8PathBuf::from(local_reference(entry));
        }
        let relative = if extract {
            build_extract_path(&entry.key)
        } else {
            entry.key.clone()
        };
        self.root.join(relative.trim_start_matches('/'))
    }

    fn replace(
        &mut self,
        old_name: &str,
        new_name: &str,
        entry: Entry,
    ) -> Result<(), ManifestError> {
        if old_name != new_name {
            if let Some(occupant) = self.entries.get(new_name) {
                return Err(ManifestError::NameTaken {
                    name: new_name.to_string(),
                    occupant: describe(occupant),
                });
            }
        }
        self.apply(|entries| {
            entries.remove(old_name);
            entries.insert(new_name.to_string(), entry);
        })
    }

    /// Mutates the map and persists it, restoring the previous map when the
    /// write fails.
    fn apply(
        &mut self,
        mutate: impl FnOnce(&mut BTreeMap<String, Entry>),
    ) -> Result<(), ManifestError> {
        let snapshot = self.file.is_some().then(|| self.entries.clone());
        mutate(&mut self.entries);
        if let Err(err) = self.save() {
            if let Some(snapshot) = snapshot {
                self.entries = snapshot;
            }
            return Err(err);
        }
        Ok(())
    }

    fn conflict_details(
        &self,
        old_name: &str,
        existing: &Entry,
        new_name: &str,
        candidate: &Entry,
    ) -> String {
        let old_path = self.resolve_path(existing, existing.extract());
        let new_path = self.resolve_path(candidate, candidate.extract());
        let mut details = format!(
            "  existing {old_name}: {} path={old_path}\n       new {new_name}: {} path={new_path}",
            describe(existing),
            describe(candidate)
        );
        if old_path != new_path && old_path.as_std_path().exists() && new_path.as_std_path().exists()
        {
            details.push_str(&format!(
                "\n  both {old_path} and {new_path} exist on disk; remove the stale copy manually"
            ));
        }
        details
    }
}

/// `owner/repo` for a two-segment path on a known git host, else the key
/// without its extension.
pub fn default_name(entry: &Entry) -> String {
    git_repo_name(&entry.location).unwrap_or_else(|| name_from_key(&entry.key))
}

fn git_repo_name(location: &ParsedUri) -> Option<String> {
    let host = location.host.as_str();
    if !GIT_HOSTS.contains(&host) && !host.starts_with("gitlab.") {
        return None;
    }
    let segments = location
        .path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    match segments.as_slice() {
        [owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            Some(format!("{owner}/{repo}"))
        }
        _ => None,
    }
}

fn local_reference(entry: &Entry) -> String {
    if entry.location.scheme == "file" {
        entry.location.path.clone()
    } else {
        entry.uri.clone()
    }
}

fn describe(entry: &Entry) -> String {
    let mut parts = vec![format!("uri={}", entry.uri), format!("key={}", entry.key)];
    if let Some(version) = &entry.version {
        parts.push(format!("version={version}"));
    }
    if let Some(doi) = &entry.doi {
        parts.push(format!("doi={doi}"));
    }
    if !entry.aliases.is_empty() {
        parts.push(format!("aliases=[{}]", entry.aliases.join(", ")));
    }
    match &entry.kind {
        EntryKind::Download { extract, format } => {
            if let Some(format) = format {
                parts.push(format!("format={format}"));
            }
            if *extract {
                parts.push("extract".to_string());
            }
        }
        EntryKind::Repository { branch } => {
            if let Some(branch) = branch {
                parts.push(format!("branch={branch}"));
            }
        }
    }
    if entry.skip_download {
        parts.push("skip_download".to_string());
    }
    parts.join(" ")
}
