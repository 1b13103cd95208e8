//! JSON Magic
//!
//! Reference-aware tooling for multi-file JSON and YAML API documents.
//!
//! - A lazy, memoizing view that follows `$ref` pointers on access ([`wrap`]).
//! - A bundler that hoists external references into `x-ext` ([`bundle`]).
//! - A differ, patcher, and three-way merge over path-addressed changes
//!   ([`diff`], [`apply`], [`merge`]).
//! - A workspace that rebases local edits onto a changing remote source
//!   ([`Workspace`], [`Watcher`]).
//!
//! # Example
//!
//! ```
//! use json_magic::{apply, diff, wrap};
//! use serde_json::json;
//!
//! let base = json!({
//!     "components": { "User": { "type": "object" } },
//!     "schema": { "$ref": "#/components/User" }
//! });
//!
//! // References resolve on access.
//! let doc = wrap(&base);
//! let schema = doc.root().get("schema").unwrap();
//! assert_eq!(schema.raw(), &json!({ "type": "object" }));
//!
//! // Differences replay onto the base.
//! let mut updated = base.clone();
//! updated["components"]["User"]["type"] = json!("array");
//! let changes = diff(&base, &updated);
//!
//! let mut patched = base.clone();
//! apply(&mut patched, &changes).unwrap();
//! assert_eq!(patched, updated);
//! ```
//!
//! # Difference Format
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `path` | Segments from the root (`["paths", "/users", "get"]`) |
//! | `type` | `"add"`, `"update"`, or `"delete"` |
//! | `changes` | New value; for `"delete"`, the removed value |

mod apply;
pub mod bundle;
mod dereference;
mod diff;
mod error;
mod loader;
mod magic;
mod merge;
mod pointer;
mod rebase;
mod schemas;
mod sync;
mod types;
mod workspace;

pub use apply::{apply, apply_selective_updates, is_excluded};
pub use bundle::{
    bundle, bundle_source, tree_shake, BundleHooks, BundleOptions, BundleReport, Fetch, FetchUrls,
    HeaderRule, Limiter, ReadFiles, ResolverPlugin,
};
pub use dereference::dereference;
pub use diff::diff;
pub use error::{LoadError, MergeError, PatchError, RebaseError, RebaseFailure};
pub use loader::{is_local_ref, is_url, load_document, load_document_str, normalize, read_document};
pub use magic::{set_ref_value, wrap, MagicDocument, MagicOptions, Node};
pub use merge::{is_key_collisions, merge, merge_objects, merge_objects_checked, MergeResult};
pub use pointer::{
    escape_segment, get_value_by_path, get_value_by_path_mut, parse_json_pointer,
    resolve_reference_path, set_value_at_path, to_json_pointer, unescape_segment,
};
pub use rebase::{plan_rebase, RebasePlan};
pub use schemas::{collect_schemas, context_at, schema_id, to_local_path, SchemaIndex};
pub use sync::{SyncConfig, SyncEvent, SyncState, Watcher};
pub use types::{
    json_type_name, ref_pointer, Conflict, DiffType, Difference, DEFAULT_EXCLUDED_KEYS,
    EXTERNAL_KEY, EXTERNAL_URLS_KEY, INTERNAL_PREFIX, REF_KEY, REF_VALUE_KEY,
};
pub use workspace::{DocumentSource, ExportFormat, Rebase, Workspace};

#[cfg(feature = "remote")]
pub use bundle::ReqwestFetch;
#[cfg(feature = "remote")]
pub use loader::{fetch_document, fetch_text, http_client};
#[cfg(feature = "remote")]
pub use workspace::HttpSource;
