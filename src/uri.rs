use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::error::ManifestError;

/// Structural decomposition of a dataset locator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedUri {
    pub scheme: String,
    pub user: Option<String>,
    pub host: String,
    pub path: String,
    pub version: Option<String>,
    pub format: Option<String>,
}

/// How a scheme is retrieved. Decided once from `(scheme, path)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeKind {
    Git,
    Remote,
    File,
    Url,
}

impl SchemeKind {
    pub fn classify(scheme: &str, path: &str) -> Self {
        match scheme {
            "git" | "ssh+git" => SchemeKind::Git,
            "https" if path.ends_with(".git") => SchemeKind::Git,
            "ssh" | "sshfs" | "rsync" => SchemeKind::Remote,
            "file" => SchemeKind::File,
            _ => SchemeKind::Url,
        }
    }
}

impl ParsedUri {
    pub fn kind(&self) -> SchemeKind {
        SchemeKind::classify(&self.scheme, &self.path)
    }

    /// `[user@]host:path`, the form rsync and ssh expect.
    pub fn remote_spec(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}:{}", self.host, self.path),
            None => format!("{}:{}", self.host, self.path),
        }
    }
}

fn ssh_shorthand() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<user>[A-Za-z0-9._-]+)@(?P<host>[A-Za-z0-9.-]+):(?P<path>.+)$")
            .expect("static regex")
    })
}

fn scheme_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:").expect("static regex"))
}

fn is_local_path(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with("./")
        || value.starts_with("../")
        || !scheme_prefix().is_match(value)
}

/// Parses a dataset locator.
///
/// `user@host:path` is rewritten to `git://user@host/path` before parsing.
/// Anything else must be `scheme://...` or a local path; a `scheme:` prefix
/// without `//` is rejected rather than read as a file name. The version
/// comes from the fragment, then the `version` query parameter, then `ref`.
pub fn parse_uri(uri: &str) -> Result<ParsedUri, ManifestError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(parse_error(uri, "empty uri"));
    }

    let canonical = if trimmed.contains("://") {
        trimmed.to_string()
    } else if let Some(caps) = ssh_shorthand().captures(trimmed) {
        let path = caps["path"].trim_start_matches('/');
        format!("git://{}@{}/{}", &caps["user"], &caps["host"], path)
    } else if is_local_path(trimmed) {
        return Ok(ParsedUri {
            scheme: "file".to_string(),
            path: strip_trailing_slash(trimmed),
            ..ParsedUri::default()
        });
    } else {
        return Err(parse_error(uri, "expected scheme://host/path or a local path"));
    };

    let url = Url::parse(&canonical).map_err(|err| parse_error(uri, &err.to_string()))?;
    let scheme = url.scheme().to_string();
    let host = url.host_str().unwrap_or_default().to_string();
    if host.is_empty() && scheme != "file" {
        return Err(parse_error(uri, "missing host"));
    }
    let user = Some(url.username())
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let query = |name: &str| {
        url.query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    };
    let version = url
        .fragment()
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_string)
        .or_else(|| query("version"))
        .or_else(|| query("ref"));
    let format = query("format");

    Ok(ParsedUri {
        scheme,
        user,
        host,
        path: strip_trailing_slash(url.path()),
        version,
        format,
    })
}

fn strip_trailing_slash(path: &str) -> String {
    let stripped = path.trim_end_matches('/');
    if stripped.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

fn parse_error(uri: &str, reason: &str) -> ManifestError {
    ManifestError::Parse {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}
