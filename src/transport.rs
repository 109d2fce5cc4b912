use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::Builder;
use tracing::{debug, info};

use crate::domain::{ArchiveFormat, Entry};
use crate::error::ManifestError;
use crate::fs_util;
use crate::uri::SchemeKind;

/// Retrieval primitives. Implementations only move bytes; choosing one and
/// deciding whether to call it at all is up to [`TransportDispatcher`].
pub trait Transport: Send + Sync {
    /// Shallow clone of `uri` into `destination`.
    fn git_clone(
        &self,
        uri: &str,
        reference: Option<&str>,
        destination: &Path,
    ) -> Result<(), ManifestError>;
    /// Copies `source` (`host:path` or a local path) to `destination`.
    fn rsync(&self, source: &str, destination: &Path) -> Result<(), ManifestError>;
    fn download(&self, url: &str, destination: &Path) -> Result<(), ManifestError>;
}

#[derive(Clone)]
pub struct SystemTransport {
    client: Client,
    git: Option<PathBuf>,
    rsync: Option<PathBuf>,
}

impl SystemTransport {
    pub fn new() -> Result<Self, ManifestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-dm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ManifestError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| ManifestError::Transport {
                uri: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            git: find_in_path("git"),
            rsync: find_in_path("rsync"),
        })
    }

    fn run_cmd(&self, program: &Path, args: &[String], uri: &str) -> Result<(), ManifestError> {
        debug!(program = %program.display(), ?args, "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| transport_error(uri, err))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program.display(), output.status)
        } else {
            stderr
        };
        Err(transport_error(uri, message))
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, ManifestError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(transport_error(url, err));
                }
            }
        }
    }
}

impl Transport for SystemTransport {
    fn git_clone(
        &self,
        uri: &str,
        reference: Option<&str>,
        destination: &Path,
    ) -> Result<(), ManifestError> {
        let git = self
            .git
            .as_ref()
            .ok_or_else(|| ManifestError::MissingTool("git".to_string()))?;
        let mut args = vec!["clone".to_string(), "--depth".to_string(), "1".to_string()];
        if let Some(reference) = reference {
            args.push("--branch".to_string());
            args.push(reference.to_string());
        }
        args.push(uri.to_string());
        args.push(destination.to_string_lossy().to_string());
        self.run_cmd(git, &args, uri)
    }

    fn rsync(&self, source: &str, destination: &Path) -> Result<(), ManifestError> {
        let rsync = self
            .rsync
            .as_ref()
            .ok_or_else(|| ManifestError::MissingTool("rsync".to_string()))?;
        let parent = destination
            .parent()
            .ok_or_else(|| transport_error(source, "invalid destination path"))?;
        let staging = Builder::new()
            .prefix(".kira-dm-rsync")
            .tempdir_in(parent)
            .map_err(|err| ManifestError::Filesystem(err.to_string()))?;

        let args = vec![
            "-avzL".to_string(),
            source.to_string(),
            format!("{}/", staging.path().to_string_lossy()),
        ];
        self.run_cmd(rsync, &args, source)?;

        let name = source
            .rsplit(['/', ':'])
            .find(|segment| !segment.is_empty())
            .ok_or_else(|| transport_error(source, "cannot determine copied name"))?;
        let copied = staging.path().join(name);
        if !copied.exists() {
            return Err(transport_error(source, "rsync produced no output"));
        }
        fs::rename(&copied, destination).map_err(|err| ManifestError::Filesystem(err.to_string()))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), ManifestError> {
        let mut response = self.send_with_retries(url)?;
        if !response.status().is_success() {
            return Err(ManifestError::HttpStatus {
                uri: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let parent = destination
            .parent()
            .ok_or_else(|| transport_error(url, "invalid destination path"))?;
        let mut temp = Builder::new()
            .prefix(".kira-dm-download")
            .tempfile_in(parent)
            .map_err(|err| ManifestError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| transport_error(url, err))?;
        temp.persist(destination)
            .map_err(|err| ManifestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Picks the retrieval mechanism for an entry and applies the
/// download-only-if-absent rule.
pub struct TransportDispatcher<T: Transport> {
    transport: T,
    hostname: Option<String>,
}

impl<T: Transport> TransportDispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            hostname: local_hostname(),
        }
    }

    /// Dispatcher with a fixed local hostname (`None` disables the
    /// localhost shortcut).
    pub fn with_hostname(transport: T, hostname: Option<String>) -> Self {
        Self {
            transport,
            hostname,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Makes sure the entry's content exists: `raw_path` is retrieved unless
    /// present, then expanded into `extract_path` when one is given. Nothing
    /// happens when the final path already exists.
    pub fn fetch(
        &self,
        entry: &Entry,
        raw_path: &Path,
        extract_path: Option<&Path>,
    ) -> Result<(), ManifestError> {
        if entry.skip_download {
            debug!(uri = %entry.uri, "download skipped for local reference");
            return Ok(());
        }
        let target = extract_path.unwrap_or(raw_path);
        if target.exists() {
            debug!(path = %target.display(), "already present");
            return Ok(());
        }
        if !raw_path.exists() {
            self.retrieve(entry, raw_path)?;
        }
        if let Some(extract_path) = extract_path {
            self.extract(entry, raw_path, extract_path)?;
        }
        Ok(())
    }

    /// Retrieves the raw content of `entry` into `destination`.
    pub fn retrieve(&self, entry: &Entry, destination: &Path) -> Result<(), ManifestError> {
        if entry.skip_download {
            return Ok(());
        }
        fs_util::ensure_parent(destination)?;
        let location = &entry.location;
        let mut kind = location.kind();
        if kind == SchemeKind::Remote && self.is_local_host(&location.host) {
            debug!(host = %location.host, "remote host is this machine; copying locally");
            kind = SchemeKind::File;
        }

        match kind {
            SchemeKind::Git => {
                info!(uri = %entry.uri, "cloning repository");
                self.transport
                    .git_clone(entry.remote_uri(), entry.clone_ref(), destination)
            }
            SchemeKind::Remote => {
                info!(uri = %entry.uri, "copying with rsync");
                self.transport.rsync(&location.remote_spec(), destination)
            }
            SchemeKind::File => {
                let source = Path::new(&location.path);
                if source == destination {
                    return Ok(());
                }
                if !source.exists() {
                    return Err(transport_error(&entry.uri, "local source does not exist"));
                }
                info!(source = %source.display(), "copying local dataset");
                fs_util::copy_atomic(source, destination)
            }
            SchemeKind::Url => {
                info!(uri = %entry.uri, "downloading");
                self.transport.download(entry.remote_uri(), destination)
            }
        }
    }

    /// Expands the archive at `raw_path` into `target`.
    pub fn extract(
        &self,
        entry: &Entry,
        raw_path: &Path,
        target: &Path,
    ) -> Result<(), ManifestError> {
        let format = entry
            .format()
            .ok_or_else(|| ManifestError::UnsupportedFormat(format!("none for {}", entry.uri)))?
            .parse::<ArchiveFormat>()?;
        info!(archive = %raw_path.display(), %format, "extracting");
        fs_util::extract_archive(format, raw_path, target)
    }

    fn is_local_host(&self, host: &str) -> bool {
        let Some(hostname) = self.hostname.as_deref() else {
            return false;
        };
        let first_label = hostname.split('.').next().unwrap_or(hostname);
        host == hostname || host == first_label
    }
}

fn local_hostname() -> Option<String> {
    let from_command = Command::new("hostname")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());
    from_command
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn transport_error(uri: &str, message: impl ToString) -> ManifestError {
    ManifestError::Transport {
        uri: uri.to_string(),
        message: message.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
