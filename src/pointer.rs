//! JSON Pointer segments, path lookup, and reference path resolution.
//!
//! Paths are plain `Vec<String>` segments: object keys or stringified array
//! indices. Pointers are their `#/a/b~1c` string form.

use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};

use crate::loader::is_url;

/// Escape a single pointer segment (`~` → `~0`, `/` → `~1`).
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescape a single pointer segment (`~1` → `/`, `~0` → `~`).
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Split a pointer (`#/a/b`, `/a/b`, or `#`) into unescaped segments.
pub fn parse_json_pointer(pointer: &str) -> Vec<String> {
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    let pointer = pointer.strip_prefix('/').unwrap_or(pointer);
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer.split('/').map(unescape_segment).collect()
}

/// Join segments into a local pointer (`#/a/b~1c`). The empty path is `#`.
pub fn to_json_pointer<S: AsRef<str>>(segments: &[S]) -> String {
    let mut pointer = String::from("#");
    for segment in segments {
        pointer.push('/');
        pointer.push_str(&escape_segment(segment.as_ref()));
    }
    pointer
}

/// Parse an array index segment.
pub(crate) fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    segment.parse().ok()
}

/// Look up the child of a container by segment.
pub fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(arr) => arr.get(array_index(segment)?),
        _ => None,
    }
}

/// Mutable variant of [`child`].
pub fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(arr) => arr.get_mut(array_index(segment)?),
        _ => None,
    }
}

/// Get the value at `path`, or `None` if any segment is missing.
pub fn get_value_by_path<'a, S: AsRef<str>>(root: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |current, segment| child(current, segment.as_ref()))
}

/// Mutable variant of [`get_value_by_path`].
pub fn get_value_by_path_mut<'a, S: AsRef<str>>(
    root: &'a mut Value,
    path: &[S],
) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path {
        current = child_mut(current, segment.as_ref())?;
    }
    Some(current)
}

/// Set `value` at `path`, creating missing intermediate objects.
///
/// Returns `false` when an intermediate segment exists but is a scalar, or
/// when an array segment is not a valid index. The root itself cannot be set.
pub fn set_value_at_path<S: AsRef<str>>(root: &mut Value, path: &[S], value: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };

    let mut current = root;
    for segment in parents {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(arr) => match array_index(segment).and_then(|i| arr.get_mut(i)) {
                Some(next) => next,
                None => return false,
            },
            _ => return false,
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.as_ref().to_string(), value);
            true
        }
        Value::Array(arr) => match array_index(last.as_ref()) {
            Some(i) if i < arr.len() => {
                arr[i] = value;
                true
            }
            Some(i) if i == arr.len() => {
                arr.push(value);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// Resolve `relative` against the document at `base`.
///
/// Absolute URLs pass through. A URL base resolves per RFC 3986; a file base
/// resolves against its parent directory. An empty base leaves `relative` as-is.
pub fn resolve_reference_path(base: &str, relative: &str) -> String {
    if is_url(relative) {
        return relative.to_string();
    }

    if is_url(base) {
        return match url::Url::parse(base).and_then(|url| url.join(relative)) {
            Ok(joined) => joined.to_string(),
            Err(_) => relative.to_string(),
        };
    }

    if base.is_empty() {
        return relative.to_string();
    }

    let dir = Path::new(base).parent().unwrap_or(Path::new(""));
    normalize_path(&dir.join(relative)).to_string_lossy().into_owned()
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
