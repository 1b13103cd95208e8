//! Core types shared by the differ, patcher, and rebase logic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key holding a reference pointer.
pub const REF_KEY: &str = "$ref";

/// Virtual key exposing the resolved target of a reference node.
pub const REF_VALUE_KEY: &str = "$ref-value";

/// Namespace for hoisted external documents in a bundle.
pub const EXTERNAL_KEY: &str = "x-ext";

/// Map of hoisted keys to their source URLs in a bundle.
pub const EXTERNAL_URLS_KEY: &str = "x-ext-urls";

/// Prefix of internal keys hidden by the magic proxy.
pub const INTERNAL_PREFIX: &str = "__scalar_";

/// Top-level keys the rebase never applies automatically.
pub const DEFAULT_EXCLUDED_KEYS: &[&str] = &["x-scalar-navigation", EXTERNAL_KEY, EXTERNAL_URLS_KEY];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Returns the pointer of a reference node (`{ "$ref": "..." }`), if any.
pub fn ref_pointer(value: &Value) -> Option<&str> {
    value.as_object()?.get(REF_KEY)?.as_str()
}

/// Kind of a path-addressed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Add,
    Update,
    Delete,
}

/// A single change at a path.
///
/// For `add` and `update`, `changes` is the value to place at `path`.
/// For `delete`, `changes` holds the removed value and is ignored when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    pub path: Vec<String>,
    #[serde(rename = "type")]
    pub kind: DiffType,
    #[serde(default)]
    pub changes: Value,
}

impl Difference {
    pub fn add(path: Vec<String>, changes: Value) -> Self {
        Self {
            path,
            kind: DiffType::Add,
            changes,
        }
    }

    pub fn update(path: Vec<String>, changes: Value) -> Self {
        Self {
            path,
            kind: DiffType::Update,
            changes,
        }
    }

    pub fn delete(path: Vec<String>, removed: Value) -> Self {
        Self {
            path,
            kind: DiffType::Delete,
            changes: removed,
        }
    }

    /// True when `self.path` is a prefix of (or equal to) `other.path`.
    pub fn is_prefix_of(&self, other: &Difference) -> bool {
        self.path.len() <= other.path.len() && other.path.starts_with(&self.path)
    }

    /// True when either path is a prefix of the other.
    pub fn is_related(&self, other: &Difference) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

/// A pair of competing change sets touching overlapping paths.
///
/// The first member comes from the remote side, the second from the local side.
pub type Conflict = (Vec<Difference>, Vec<Difference>);
