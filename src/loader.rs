//! Document loading from files, strings, and HTTP URLs.
//!
//! Binding schemas and subject trees are YAML; snapshots may be JSON or YAML.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{LoadError, ResolveError};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// libyaml rejects the 1.2 directive, and 1.1 reads these documents the same way.
fn downgrade_yaml_directive(content: &str) -> std::borrow::Cow<'_, str> {
    if content.contains("%YAML 1.2") {
        content.replace("%YAML 1.2", "%YAML 1.1").into()
    } else {
        content.into()
    }
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn is_json_path(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// Load a YAML or JSON document, picking the parser by file extension.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or a parse error if the content is malformed.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    let content = read_file(path)?;
    if is_json_path(path) {
        load_json_str(&content)
    } else {
        load_yaml_str(&content)
    }
}

/// Load a document that must be a mapping.
pub fn load_mapping(path: &Path) -> Result<Value, LoadError> {
    let value = load_document(path)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(LoadError::NotAMapping {
            what: path.display().to_string(),
        })
    }
}

/// Parse a YAML string into plain JSON values.
pub fn load_yaml_str(content: &str) -> Result<Value, LoadError> {
    serde_yaml::from_str(&downgrade_yaml_directive(content))
        .map_err(|source| LoadError::InvalidYaml { source })
}

/// Parse a JSON string.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Read a YAML file keeping tags, for subject trees.
pub fn load_tagged_yaml(path: &Path) -> Result<(String, serde_yaml::Value), LoadError> {
    let content = read_file(path)?;
    let value = load_tagged_yaml_str(&content)?;
    Ok((content, value))
}

pub fn load_tagged_yaml_str(content: &str) -> Result<serde_yaml::Value, LoadError> {
    serde_yaml::from_str(&downgrade_yaml_directive(content))
        .map_err(|source| LoadError::InvalidYaml { source })
}

/// Load a document from an HTTP/HTTPS URL. The body may be JSON or YAML.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
pub fn load_url(url: &str) -> Result<Value, LoadError> {
    let network_error = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network_error)?;

    let body = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(network_error)?;

    // JSON is a subset of YAML.
    load_yaml_str(&body)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Navigate a JSON Pointer fragment (e.g., "#/definitions/uint32").
///
/// The fragment may start with '#'. An empty fragment returns the document.
pub fn navigate_fragment<'a>(doc: &'a Value, fragment: &str) -> Result<&'a Value, ResolveError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(doc);
    }

    let mut current = doc;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        let next = match current {
            Value::Array(list) => key.parse::<usize>().ok().and_then(|i| list.get(i)),
            _ => current.get(&key),
        };
        current = next.ok_or_else(|| ResolveError::InvalidReference {
            reference: fragment.to_string(),
            message: "fragment not found".to_string(),
        })?;
    }
    Ok(current)
}

/// Collect files with one of `extensions` under `path`, recursively, sorted.
///
/// A plain file is returned as-is regardless of its extension.
pub fn collect_files(path: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, extensions, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, extensions: &[&str], files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, extensions, files);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e))
            .unwrap_or(false)
        {
            files.push(path);
        }
    }
}
