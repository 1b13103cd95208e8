//! Document loading from files, strings, and HTTP URLs.
//!
//! Text is normalized as JSON first, then YAML. `serde_yaml` caps alias
//! expansion, so a hostile anchor/alias bomb fails to parse instead of
//! amplifying.

use std::path::Path;

use serde_json::Value;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Normalize raw text into a document.
///
/// Returns `None` for anything that is not a JSON or YAML object/array.
/// Never fails loudly: documents are often mid-edit and invalid.
pub fn normalize(text: &str) -> Option<Value> {
    parse_container(text).ok()
}

/// Parse text as JSON, falling back to YAML.
///
/// # Errors
///
/// Returns `LoadError::InvalidYaml` if neither parser accepts the text, or
/// `LoadError::Unparsable` if it parses to a bare scalar.
pub fn load_document_str(content: &str) -> Result<Value, LoadError> {
    parse_container(content)
}

fn parse_container(text: &str) -> Result<Value, LoadError> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => serde_yaml::from_str::<Value>(text)
            .map_err(|source| LoadError::InvalidYaml { source })?,
    };

    if value.is_object() || value.is_array() {
        Ok(value)
    } else {
        Err(LoadError::Unparsable {
            input: preview(text),
        })
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 40 {
        format!("{}...", line.chars().take(40).collect::<String>())
    } else {
        line.to_string()
    }
}

/// Load a document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist, or a parse
/// error if it holds neither JSON nor YAML.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_document_str(&content)
}

/// Async variant of [`load_document`] used by the file plugin.
pub async fn read_document(path: &Path) -> Result<Value, LoadError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            LoadError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            LoadError::ReadError {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    load_document_str(&content)
}

/// Build the default HTTP client.
#[cfg(feature = "remote")]
pub fn http_client() -> Result<reqwest::Client, LoadError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|source| LoadError::NetworkError {
            url: String::new(),
            source,
        })
}

/// Fetch a document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` for transport failures and non-2xx
/// statuses, or a parse error if the body is neither JSON nor YAML.
#[cfg(feature = "remote")]
pub async fn fetch_document(client: &reqwest::Client, url: &str) -> Result<Value, LoadError> {
    let body = fetch_text(client, url, &[]).await?;
    load_document_str(&body)
}

/// Fetch the raw body of `url`, sending `headers` with the request.
///
/// # Errors
///
/// Returns `LoadError::NetworkError` for transport failures and non-2xx statuses.
#[cfg(feature = "remote")]
pub async fn fetch_text(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
) -> Result<String, LoadError> {
    let network_error = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await.map_err(network_error)?;

    // Check for HTTP errors before reading the body
    let response = response.error_for_status().map_err(network_error)?;

    response.text().await.map_err(network_error)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Check if a reference points into the current document (starts with #).
pub fn is_local_ref(s: &str) -> bool {
    s.starts_with('#')
}
