use crate::domain::ArchiveFormat;

/// Derives the storage key from location parts: `host/path`, separators
/// trimmed, with `#version` appended when a version is set.
pub fn build_key(host: &str, path: &str, version: Option<&str>) -> String {
    let path = path.trim_matches('/');
    let joined = match (host.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => host.to_string(),
        (false, false) => format!("{host}/{path}"),
    };
    let mut key = joined.trim_matches('/').to_string();
    if let Some(version) = version.filter(|value| !value.is_empty()) {
        key.push('#');
        key.push_str(version);
    }
    key
}

/// Path (relative to the root folder) an archive stored under `key` is
/// expanded into.
pub fn build_extract_path(key: &str) -> String {
    for format in ArchiveFormat::ALL {
        if let Some(stem) = key.strip_suffix(format.suffix()) {
            return stem.to_string();
        }
    }
    for format in ArchiveFormat::ALL {
        let pattern = format!("?format={}", format.name());
        if let Some(idx) = key.find(&pattern) {
            return key[..idx].to_string();
        }
    }
    format!("{key}.d")
}

/// Default dataset name for a key: the key with the extension of its last
/// segment removed. A key made of a bare host keeps its dots.
pub fn name_from_key(key: &str) -> String {
    for format in ArchiveFormat::ALL {
        if let Some(stem) = key.strip_suffix(format.suffix()) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    let Some((head, last)) = key.rsplit_once('/') else {
        return key.to_string();
    };
    match last.rfind('.') {
        Some(idx) if idx > 0 => format!("{head}/{}", &last[..idx]),
        _ => key.to_string(),
    }
}
