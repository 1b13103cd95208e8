//! Resolver plugins: where external references get their documents from.
//!
//! Plugins are tried in order and the first whose [`ResolverPlugin::validate`]
//! accepts a source loads it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;
use crate::loader::{is_url, load_document_str, read_document};

/// Loads documents for the sources it accepts.
#[async_trait]
pub trait ResolverPlugin: Send + Sync {
    /// Whether this plugin handles `source` (an absolute URL or file path).
    fn validate(&self, source: &str) -> bool;

    /// Load and normalize the document at `source`.
    async fn exec(&self, source: &str) -> Result<Value, LoadError>;
}

/// Transport used by [`FetchUrls`]; swap it to route through a proxy.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, LoadError>;
}

/// Headers sent to every URL whose host matches one of `domains`.
#[derive(Debug, Clone, Default)]
pub struct HeaderRule {
    pub domains: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl HeaderRule {
    fn matches(&self, url: &str) -> bool {
        let Ok(url) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host_port = url.port().map(|port| format!("{host}:{port}"));

        self.domains
            .iter()
            .any(|domain| domain == host || host_port.as_deref() == Some(domain.as_str()))
    }
}

/// Loads `http://` and `https://` sources.
#[derive(Clone)]
pub struct FetchUrls {
    rules: Vec<HeaderRule>,
    fetcher: Arc<dyn Fetch>,
}

impl FetchUrls {
    /// Fetch with the default reqwest client.
    #[cfg(feature = "remote")]
    pub fn new() -> Result<Self, LoadError> {
        Ok(Self::with_fetch(ReqwestFetch::new()?))
    }

    /// Fetch through a custom transport.
    pub fn with_fetch(fetcher: impl Fetch + 'static) -> Self {
        Self {
            rules: Vec::new(),
            fetcher: Arc::new(fetcher),
        }
    }

    pub fn with_header_rule(mut self, rule: HeaderRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn headers_for(&self, url: &str) -> Vec<(String, String)> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(url))
            .flat_map(|rule| rule.headers.iter().cloned())
            .collect()
    }
}

impl std::fmt::Debug for FetchUrls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchUrls")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ResolverPlugin for FetchUrls {
    fn validate(&self, source: &str) -> bool {
        is_url(source)
    }

    async fn exec(&self, source: &str) -> Result<Value, LoadError> {
        let headers = self.headers_for(source);
        debug!(url = source, headers = headers.len(), "fetching");
        let body = self.fetcher.fetch(source, &headers).await?;
        load_document_str(&body)
    }
}

/// [`Fetch`] over a shared `reqwest::Client`.
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl ReqwestFetch {
    pub fn new() -> Result<Self, LoadError> {
        Ok(Self::with_client(crate::loader::http_client()?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, LoadError> {
        crate::loader::fetch_text(&self.client, url, headers).await
    }
}

/// Loads local JSON/YAML files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFiles;

impl ReadFiles {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResolverPlugin for ReadFiles {
    fn validate(&self, source: &str) -> bool {
        !source.is_empty() && !is_url(source) && !source.starts_with('#')
    }

    async fn exec(&self, source: &str) -> Result<Value, LoadError> {
        read_document(Path::new(source)).await
    }
}
