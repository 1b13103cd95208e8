//! Dropping hoisted definitions that nothing references.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::pointer::{get_value_by_path, parse_json_pointer, set_value_at_path};
use crate::types::{ref_pointer, EXTERNAL_KEY, EXTERNAL_URLS_KEY};

/// Keep only the parts of `x-ext` reachable from the rest of the document.
///
/// Reachability starts at every local reference outside `x-ext` and follows
/// references inside the kept parts. Paths through arrays keep the whole array.
pub fn tree_shake(document: &mut Value) {
    if get_value_by_path(document, &[EXTERNAL_KEY]).is_none() {
        return;
    }

    let mut queue = Vec::new();
    if let Value::Object(map) = &*document {
        for (key, value) in map {
            if key != EXTERNAL_KEY && key != EXTERNAL_URLS_KEY {
                collect_pointers(value, &mut queue);
            }
        }
    }

    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut kept: Vec<Vec<String>> = Vec::new();
    while let Some(pointer) = queue.pop() {
        let path = parse_json_pointer(&pointer);
        if path.len() < 2 || path[0] != EXTERNAL_KEY {
            continue;
        }
        let path = truncate_at_array(document, path);
        if !seen.insert(path.clone()) {
            continue;
        }
        if let Some(target) = get_value_by_path(document, &path) {
            collect_pointers(target, &mut queue);
            kept.push(path);
        }
    }

    let mut shaken = Value::Object(Map::new());
    kept.sort_by_key(Vec::len);
    for path in &kept {
        if let Some(value) = get_value_by_path(document, path) {
            set_value_at_path(&mut shaken, path, value.clone());
        }
    }

    let Value::Object(root) = document else {
        return;
    };
    let external = match shaken {
        Value::Object(mut map) => map.shift_remove(EXTERNAL_KEY),
        _ => None,
    };
    let remaining: HashSet<String> = external
        .as_ref()
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();

    debug!(kept = kept.len(), "tree shaking");
    match external {
        Some(external) => {
            root.insert(EXTERNAL_KEY.to_string(), external);
        }
        None => {
            root.shift_remove(EXTERNAL_KEY);
        }
    }

    if let Some(Value::Object(urls)) = root.get_mut(EXTERNAL_URLS_KEY) {
        urls.retain(|key, _| remaining.contains(key));
    }
}

fn collect_pointers(value: &Value, out: &mut Vec<String>) {
    if let Some(pointer) = ref_pointer(value) {
        if pointer.starts_with("#/") {
            out.push(pointer.to_string());
        }
    }
    match value {
        Value::Object(map) => map.values().for_each(|child| collect_pointers(child, out)),
        Value::Array(arr) => arr.iter().for_each(|child| collect_pointers(child, out)),
        _ => {}
    }
}

/// Cut `path` at the first array it passes through.
fn truncate_at_array(document: &Value, path: Vec<String>) -> Vec<String> {
    let mut current = document;
    for (i, segment) in path.iter().enumerate() {
        if current.is_array() {
            return path[..i].to_vec();
        }
        match current.get(segment) {
            Some(next) => current = next,
            None => break,
        }
    }
    path
}
