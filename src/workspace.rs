//! Named documents with a local copy and a synchronized snapshot.
//!
//! Each document keeps the user's editable copy next to an immutable
//! snapshot of the last state known to match the remote source. Snapshots
//! are only ever replaced as a whole, so readers see either the old or the
//! new version.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::apply::apply_selective_updates;
use crate::error::{LoadError, RebaseError, RebaseFailure};
use crate::rebase::{plan_rebase, RebasePlan};
use crate::types::{Conflict, Difference, DEFAULT_EXCLUDED_KEYS};

/// Where a workspace fetches the remote version of a document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, LoadError>;
}

/// Fetches documents over HTTP and normalizes JSON or YAML bodies.
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl HttpSource {
    pub fn new() -> Result<Self, LoadError> {
        Ok(Self {
            client: crate::loader::http_client()?,
        })
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl DocumentSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Value, LoadError> {
        crate::loader::fetch_document(&self.client, url).await
    }
}

/// Serialization format for [`Workspace::export_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Yaml,
}

struct DocumentState {
    local: Value,
    snapshot: Arc<Value>,
    url: Option<String>,
    watch: bool,
    /// Bumped on every change to `local`.
    generation: u64,
}

struct Inner {
    documents: RwLock<HashMap<String, DocumentState>>,
    source: Arc<dyn DocumentSource>,
}

/// Shared handle to a set of named documents.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<Inner>,
    excluded_keys: Arc<[String]>,
}

impl Workspace {
    /// Workspace fetching remote documents over HTTP.
    #[cfg(feature = "remote")]
    pub fn new() -> Result<Self, LoadError> {
        Ok(Self::with_source(HttpSource::new()?))
    }

    pub fn with_source(source: impl DocumentSource + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: RwLock::new(HashMap::new()),
                source: Arc::new(source),
            }),
            excluded_keys: DEFAULT_EXCLUDED_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Top-level keys a rebase never applies from the remote side.
    pub fn with_excluded_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluded_keys(&self) -> &[String] {
        &self.excluded_keys
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DocumentState>> {
        self.inner
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DocumentState>> {
        self.inner
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a document. The snapshot starts equal to `document`.
    pub fn add_document(&self, name: impl Into<String>, document: Value, url: Option<String>) {
        let name = name.into();
        debug!(document = %name, url = ?url, "adding document");
        self.write().insert(
            name,
            DocumentState {
                snapshot: Arc::new(document.clone()),
                local: document,
                url,
                watch: false,
                generation: 0,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn remove_document(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    pub fn document_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// A copy of the local document.
    pub fn document(&self, name: &str) -> Option<Value> {
        self.read().get(name).map(|state| state.local.clone())
    }

    /// The last synchronized snapshot.
    pub fn snapshot(&self, name: &str) -> Option<Arc<Value>> {
        self.read().get(name).map(|state| Arc::clone(&state.snapshot))
    }

    pub fn generation(&self, name: &str) -> Option<u64> {
        self.read().get(name).map(|state| state.generation)
    }

    pub fn source_url(&self, name: &str) -> Option<String> {
        self.read().get(name).and_then(|state| state.url.clone())
    }

    pub fn set_source_url(&self, name: &str, url: Option<String>) -> Result<(), RebaseError> {
        self.with_state(name, |state| state.url = url)
    }

    pub fn is_watching(&self, name: &str) -> bool {
        self.read().get(name).is_some_and(|state| state.watch)
    }

    pub fn set_watch(&self, name: &str, watch: bool) -> Result<(), RebaseError> {
        self.with_state(name, |state| state.watch = watch)
    }

    fn with_state<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut DocumentState) -> R,
    ) -> Result<R, RebaseError> {
        let mut documents = self.write();
        let state = documents
            .get_mut(name)
            .ok_or_else(|| RebaseError::DocumentNotFound {
                name: name.to_string(),
            })?;
        Ok(f(state))
    }

    /// Edit the local document.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::DocumentNotFound` for an unknown name.
    pub fn update_document<R>(
        &self,
        name: &str,
        edit: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, RebaseError> {
        self.with_state(name, |state| {
            state.generation += 1;
            edit(&mut state.local)
        })
    }

    /// Make the local document the new snapshot, except under excluded keys.
    ///
    /// Returns the held-back differences.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::DocumentNotFound` for an unknown name, or a patch
    /// error if the local changes do not apply.
    pub fn save_document(&self, name: &str) -> Result<Vec<Difference>, RebaseError> {
        let excluded_keys = Arc::clone(&self.excluded_keys);
        self.with_state(name, |state| -> Result<Vec<Difference>, RebaseError> {
            let mut snapshot = (*state.snapshot).clone();
            let excluded = apply_selective_updates(&mut snapshot, &state.local, &excluded_keys[..])?;
            state.snapshot = Arc::new(snapshot);
            Ok(excluded)
        })?
    }

    /// Discard local edits.
    pub fn revert_document(&self, name: &str) -> Result<(), RebaseError> {
        self.with_state(name, |state| {
            state.local = (*state.snapshot).clone();
            state.generation += 1;
        })
    }

    /// Serialize the local document.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::DocumentNotFound` for an unknown name, or
    /// `RebaseError::Export` if serialization fails.
    pub fn export_document(&self, name: &str, format: ExportFormat) -> Result<String, RebaseError> {
        let document = self.document(name).ok_or_else(|| RebaseError::DocumentNotFound {
            name: name.to_string(),
        })?;

        let exported = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&document).map_err(|e| e.to_string()),
            ExportFormat::Yaml => serde_yaml::to_string(&document).map_err(|e| e.to_string()),
        };
        exported.map_err(|message| RebaseError::Export {
            name: name.to_string(),
            message,
        })
    }

    /// Fetch the remote version of a document without touching it.
    pub async fn fetch_remote(&self, name: &str) -> Result<Value, RebaseFailure> {
        let url = {
            let documents = self.read();
            let state = documents
                .get(name)
                .ok_or_else(|| RebaseFailure::DocumentNotFound {
                    name: name.to_string(),
                })?;
            state.url.clone().ok_or_else(|| RebaseFailure::NoSourceUrl {
                name: name.to_string(),
            })?
        };

        self.inner
            .source
            .fetch(&url)
            .await
            .map_err(|err| RebaseFailure::FetchFailed {
                url,
                message: err.to_string(),
            })
    }

    /// Fetch the remote version and rebase the local document onto it.
    pub async fn rebase_document(&self, name: &str) -> Result<Rebase, RebaseFailure> {
        let remote = self.fetch_remote(name).await?;
        self.rebase_document_with(name, remote)
    }

    /// Rebase the local document onto an already fetched remote version.
    ///
    /// Remote changes that conflict with nothing are applied right away.
    /// Without conflicts the snapshot becomes `remote`; with conflicts it
    /// stays until [`Rebase::apply_changes`].
    pub fn rebase_document_with(&self, name: &str, remote: Value) -> Result<Rebase, RebaseFailure> {
        let mut documents = self.write();
        let state = documents
            .get_mut(name)
            .ok_or_else(|| RebaseFailure::DocumentNotFound {
                name: name.to_string(),
            })?;

        let plan = plan_rebase(&state.snapshot, &state.local, &remote, &self.excluded_keys[..])?;
        let updated = plan
            .apply_remote(&state.local)
            .map_err(|err| RebaseFailure::ApplyFailed {
                message: err.to_string(),
            })?;
        if !plan.to_apply.is_empty() {
            state.local = updated;
            state.generation += 1;
        }

        let base = Arc::clone(&state.snapshot);
        let remote = Arc::new(remote);
        if !plan.has_conflicts() {
            state.snapshot = Arc::clone(&remote);
        }

        info!(
            document = name,
            applied = plan.to_apply.len(),
            excluded = plan.excluded.len(),
            conflicts = plan.conflicts.len(),
            "rebased document"
        );

        Ok(Rebase {
            workspace: self.clone(),
            name: name.to_string(),
            generation: state.generation,
            base,
            remote,
            plan,
        })
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("documents", &self.document_names())
            .field("excluded_keys", &self.excluded_keys)
            .finish()
    }
}

/// Outcome of a rebase, with a handle to resolve its conflicts.
#[derive(Debug, Clone)]
pub struct Rebase {
    workspace: Workspace,
    name: String,
    generation: u64,
    base: Arc<Value>,
    remote: Arc<Value>,
    plan: RebasePlan,
}

impl Rebase {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(remote members, local members)` groups awaiting a decision.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.plan.conflicts
    }

    pub fn has_conflicts(&self) -> bool {
        self.plan.has_conflicts()
    }

    /// Remote changes already applied to the local document.
    pub fn applied(&self) -> &[Difference] {
        &self.plan.to_apply
    }

    /// Remote changes under excluded keys.
    pub fn excluded(&self) -> &[Difference] {
        &self.plan.excluded
    }

    /// Resolve the conflicts with the caller's picks.
    ///
    /// The local document becomes the old snapshot plus every
    /// non-conflicting change plus `selected`; the snapshot becomes the
    /// remote version.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::Stale` if the local document changed since this
    /// rebase was computed, `RebaseError::DocumentNotFound` if it was
    /// removed, or a patch error if `selected` does not apply.
    pub fn apply_changes(&self, selected: &[Difference]) -> Result<(), RebaseError> {
        let resolved = self.plan.resolve(&self.base, selected)?;

        self.workspace.with_state(&self.name, |state| {
            if state.generation != self.generation {
                return Err(RebaseError::Stale {
                    name: self.name.clone(),
                });
            }
            state.local = resolved;
            state.snapshot = Arc::clone(&self.remote);
            state.generation += 1;
            Ok(())
        })?
    }
}
