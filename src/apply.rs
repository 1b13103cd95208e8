//! Applying differences to a document in place.

use serde_json::Value;
use tracing::debug;

use crate::diff::diff;
use crate::error::PatchError;
use crate::pointer::{array_index, get_value_by_path_mut};
use crate::types::{DiffType, Difference};

/// Apply `diffs` to `document` in order.
///
/// Differences already applied stay applied when a later one fails.
///
/// # Errors
///
/// Returns `PatchError::InvalidChangesDetected` when a difference does not fit
/// the document: a missing or scalar intermediate segment, an array index
/// past the end, or a delete of the root.
pub fn apply<'a>(document: &'a mut Value, diffs: &[Difference]) -> Result<&'a mut Value, PatchError> {
    for diff in diffs {
        apply_one(document, diff)?;
    }
    Ok(document)
}

fn apply_one(document: &mut Value, diff: &Difference) -> Result<(), PatchError> {
    let invalid = || PatchError::InvalidChangesDetected {
        path: diff.path.clone(),
    };

    let Some((last, parents)) = diff.path.split_last() else {
        return match diff.kind {
            DiffType::Delete => Err(invalid()),
            DiffType::Add | DiffType::Update => {
                *document = diff.changes.clone();
                Ok(())
            }
        };
    };

    let parent = get_value_by_path_mut(document, parents).ok_or_else(invalid)?;

    match (parent, diff.kind) {
        (Value::Object(map), DiffType::Delete) => {
            map.shift_remove(last.as_str());
        }
        (Value::Object(map), _) => {
            map.insert(last.clone(), diff.changes.clone());
        }
        (Value::Array(arr), DiffType::Delete) => {
            let index = array_index(last).ok_or_else(invalid)?;
            if index < arr.len() {
                arr.remove(index);
            }
        }
        (Value::Array(arr), _) => match array_index(last) {
            Some(index) if index < arr.len() => arr[index] = diff.changes.clone(),
            Some(index) if index == arr.len() => arr.push(diff.changes.clone()),
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    }

    Ok(())
}

/// Bring `target` in line with `source`, except under excluded top-level keys.
///
/// Returns the differences that were held back.
///
/// # Errors
///
/// Propagates `PatchError` from [`apply`].
pub fn apply_selective_updates<S: AsRef<str>>(
    target: &mut Value,
    source: &Value,
    excluded_keys: &[S],
) -> Result<Vec<Difference>, PatchError> {
    let (excluded, allowed): (Vec<Difference>, Vec<Difference>) = diff(target, source)
        .into_iter()
        .partition(|d| is_excluded(d, excluded_keys));

    debug!(
        applied = allowed.len(),
        excluded = excluded.len(),
        "selective update"
    );
    apply(target, &allowed)?;
    Ok(excluded)
}

/// True when `diff` sits under one of the top-level `excluded_keys`.
pub fn is_excluded<S: AsRef<str>>(diff: &Difference, excluded_keys: &[S]) -> bool {
    diff.path
        .first()
        .is_some_and(|key| excluded_keys.iter().any(|excluded| excluded.as_ref() == key))
}
