//! Error types for loading, patching, merging, and rebasing documents.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while turning a source (file, URL, text) into a document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to fetch {url}: {message}")]
    FetchFailed { url: String, message: String },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{input} is neither valid JSON nor YAML")]
    Unparsable { input: String },

    #[error("no loader accepts {input}")]
    Unsupported { input: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::FetchFailed { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while applying differences to a document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    /// The difference was computed against another version of the document.
    #[error("invalid changes detected: cannot apply change at {path:?}")]
    InvalidChangesDetected { path: Vec<String> },
}

impl PatchError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Errors from checked deep merges.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("key collision at {path:?}")]
    KeyCollision { path: Vec<String> },
}

/// Errors while resolving a rebase.
#[derive(Debug, Error)]
pub enum RebaseError {
    #[error("document '{name}' does not exist in the workspace")]
    DocumentNotFound { name: String },

    #[error("document '{name}' changed since the conflicts were computed")]
    Stale { name: String },

    #[error("cannot export document '{name}': {message}")]
    Export { name: String, message: String },

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl RebaseError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            RebaseError::Patch(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Typed outcome of a rebase cycle that produced nothing to resolve.
///
/// These are expected runtime conditions, returned as data rather than raised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RebaseFailure {
    #[error("no changes detected")]
    NoChangesDetected,

    #[error("failed to fetch {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("document '{name}' does not exist in the workspace")]
    DocumentNotFound { name: String },

    #[error("document '{name}' has no source url")]
    NoSourceUrl { name: String },

    #[error("failed to apply remote changes: {message}")]
    ApplyFailed { message: String },
}

impl RebaseFailure {
    /// Whether the failure should drive the poll backoff.
    ///
    /// Only transport and parse failures count; "no changes" is a successful cycle.
    pub fn is_transport(&self) -> bool {
        matches!(self, RebaseFailure::FetchFailed { .. })
    }
}
