//! Structural diff between two documents.

use serde_json::Value;

use crate::types::Difference;

/// Compute the differences that turn `base` into `updated`.
///
/// Output order is deterministic: keys of `updated` in document order
/// (recursing into shared containers), then keys only `base` has. Arrays
/// compare by position; trailing removals come last, highest index first,
/// so the result can be applied in order with [`crate::apply::apply`].
///
/// Pass [`crate::magic::Node::raw`] when diffing a wrapped document.
pub fn diff(base: &Value, updated: &Value) -> Vec<Difference> {
    let mut out = Vec::new();
    diff_into(base, updated, &mut Vec::new(), &mut out);
    out
}

fn diff_into(base: &Value, updated: &Value, path: &mut Vec<String>, out: &mut Vec<Difference>) {
    match (base, updated) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, new_value) in new {
                path.push(key.clone());
                compare(old.get(key), new_value, path, out);
                path.pop();
            }
            for (key, old_value) in old {
                if !new.contains_key(key) {
                    path.push(key.clone());
                    out.push(Difference::delete(path.clone(), old_value.clone()));
                    path.pop();
                }
            }
        }
        (Value::Array(old), Value::Array(new)) => {
            for (i, new_value) in new.iter().enumerate() {
                path.push(i.to_string());
                compare(old.get(i), new_value, path, out);
                path.pop();
            }
            for i in (new.len()..old.len()).rev() {
                path.push(i.to_string());
                out.push(Difference::delete(path.clone(), old[i].clone()));
                path.pop();
            }
        }
        _ if base != updated => out.push(Difference::update(path.clone(), updated.clone())),
        _ => {}
    }
}

fn compare(old: Option<&Value>, new: &Value, path: &mut Vec<String>, out: &mut Vec<Difference>) {
    match old {
        None => out.push(Difference::add(path.clone(), new.clone())),
        Some(old) if old != new => diff_into(old, new, path, out),
        Some(_) => {}
    }
}
