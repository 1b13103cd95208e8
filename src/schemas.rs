//! `$id` / `$anchor` indexing and conversion of references to local paths.

use std::collections::HashMap;

use serde_json::Value;

use crate::loader::is_url;
use crate::pointer::{child, parse_json_pointer};

/// Maps schema identifiers (`$id`, `<id>#anchor`, `#anchor`) to document paths.
pub type SchemaIndex = HashMap<String, Vec<String>>;

/// Returns the `$id` of an object, if it is a non-empty string.
pub fn schema_id(value: &Value) -> Option<&str> {
    value
        .as_object()?
        .get("$id")?
        .as_str()
        .filter(|id| !id.is_empty())
}

/// Resolve an `$id` against the enclosing one.
fn absolute_id(base: Option<&str>, id: &str) -> String {
    match base {
        Some(base) if is_url(base) && !is_url(id) => url::Url::parse(base)
            .and_then(|url| url.join(id))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| id.to_string()),
        _ => id.to_string(),
    }
}

/// Index every `$id` and `$anchor` in the document.
///
/// An anchor is keyed by its enclosing `$id` (`https://x/schema#name`), or
/// by `#name` when no `$id` encloses it. The first occurrence wins.
pub fn collect_schemas(root: &Value) -> SchemaIndex {
    let mut index = SchemaIndex::new();
    collect(root, None, &mut Vec::new(), &mut index);
    index
}

fn collect(value: &Value, base: Option<&str>, path: &mut Vec<String>, index: &mut SchemaIndex) {
    match value {
        Value::Object(map) => {
            let id = schema_id(value).map(|id| absolute_id(base, id));
            if let Some(id) = &id {
                index.entry(id.clone()).or_insert_with(|| path.clone());
            }
            let base = id.as_deref().or(base);

            if let Some(anchor) = map.get("$anchor").and_then(Value::as_str) {
                let key = format!("{}#{}", base.unwrap_or_default(), anchor);
                index.entry(key).or_insert_with(|| path.clone());
            }

            for (key, child) in map {
                path.push(key.clone());
                collect(child, base, path, index);
                path.pop();
            }
        }
        Value::Array(arr) => {
            for (i, child) in arr.iter().enumerate() {
                path.push(i.to_string());
                collect(child, base, path, index);
                path.pop();
            }
        }
        _ => {}
    }
}

/// The `$id` scope in effect at `path` (nearest enclosing `$id`).
pub fn context_at<S: AsRef<str>>(root: &Value, path: &[S]) -> Option<String> {
    let mut context = schema_id(root).map(str::to_string);
    let mut current = root;
    for segment in path {
        current = child(current, segment.as_ref())?;
        if let Some(id) = schema_id(current) {
            context = Some(absolute_id(context.as_deref(), id));
        }
    }
    context
}

/// Context for a child node given its parent's context.
pub(crate) fn child_context(parent: Option<&str>, child: &Value) -> Option<String> {
    match schema_id(child) {
        Some(id) => Some(absolute_id(parent, id)),
        None => parent.map(str::to_string),
    }
}

/// Convert a reference into a path within the current document.
///
/// Handles `#`, `#/pointer`, `#anchor`, known `$id`s (optionally with a
/// pointer or anchor fragment), and references relative to `context`.
/// Returns `None` for anything that lives outside the document.
pub fn to_local_path(
    reference: &str,
    context: Option<&str>,
    schemas: &SchemaIndex,
) -> Option<Vec<String>> {
    if reference == "#" {
        return match context {
            Some(id) => schemas.get(id).cloned().or_else(|| Some(Vec::new())),
            None => Some(Vec::new()),
        };
    }

    if reference.starts_with("#/") {
        return Some(parse_json_pointer(reference));
    }

    if let Some(anchor) = reference.strip_prefix('#') {
        let scoped = format!("{}#{}", context.unwrap_or_default(), anchor);
        return schemas
            .get(&scoped)
            .or_else(|| schemas.get(reference))
            .cloned();
    }

    let absolute = absolute_id(context, reference);
    let (base, fragment) = match absolute.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (absolute.as_str(), None),
    };

    match fragment {
        None | Some("") => schemas.get(base).cloned(),
        Some(pointer) if pointer.starts_with('/') => {
            let mut path = schemas.get(base)?.clone();
            path.extend(parse_json_pointer(pointer));
            Some(path)
        }
        Some(anchor) => schemas.get(&format!("{base}#{anchor}")).cloned(),
    }
}
