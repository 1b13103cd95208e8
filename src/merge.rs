//! Deep object merging and classification of competing change sets.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::MergeError;
use crate::types::{Conflict, DiffType, Difference};

/// True when merging `b` into `a` would overwrite a differing leaf.
///
/// Objects are compared key by key; arrays and scalars are leaves.
pub fn is_key_collisions(a: &Value, b: &Value) -> bool {
    first_collision(a, b, &mut Vec::new()).is_some()
}

fn first_collision(a: &Value, b: &Value, path: &mut Vec<String>) -> Option<Vec<String>> {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            for (key, right_value) in right {
                let Some(left_value) = left.get(key) else {
                    continue;
                };
                path.push(key.clone());
                let found = first_collision(left_value, right_value, path);
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            None
        }
        _ if a != b => Some(path.clone()),
        _ => None,
    }
}

/// Deep-merge `source` into `target` in place.
///
/// Objects merge key by key; anything else in `source` overwrites. Check
/// [`is_key_collisions`] first, or use [`merge_objects_checked`].
pub fn merge_objects<'a>(target: &'a mut Value, source: &Value) -> &'a mut Value {
    merge_into(target, source, &mut HashSet::new());
    target
}

fn merge_into(target: &mut Value, source: &Value, visited: &mut HashSet<*const Value>) {
    // a source branch is merged at most once per call
    if !visited.insert(source as *const Value) {
        return;
    }

    match (target, source) {
        (Value::Object(left), Value::Object(right)) => {
            for (key, right_value) in right {
                match left.get_mut(key) {
                    Some(left_value) if left_value.is_object() && right_value.is_object() => {
                        merge_into(left_value, right_value, visited);
                    }
                    _ => {
                        left.insert(key.clone(), right_value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// [`merge_objects`] that refuses to overwrite.
///
/// # Errors
///
/// Returns `MergeError::KeyCollision` with the first colliding path; `target`
/// is left untouched.
pub fn merge_objects_checked<'a>(
    target: &'a mut Value,
    source: &Value,
) -> Result<&'a mut Value, MergeError> {
    if let Some(path) = first_collision(target, source, &mut Vec::new()) {
        return Err(MergeError::KeyCollision { path });
    }
    Ok(merge_objects(target, source))
}

/// Outcome of [`merge`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeResult {
    /// Differences safe to apply.
    pub diffs: Vec<Difference>,
    /// Groups of competing differences, `(left members, right members)`.
    pub conflicts: Vec<Conflict>,
}

enum Resolution {
    KeepLeft,
    KeepRight,
    Merged(Difference),
    Conflict,
}

fn resolve_pair(left: &Difference, right: &Difference) -> Resolution {
    if left == right {
        return Resolution::KeepLeft;
    }

    match (left.kind, right.kind) {
        (DiffType::Delete, DiffType::Delete) => {
            if left.path.len() <= right.path.len() {
                Resolution::KeepLeft
            } else {
                Resolution::KeepRight
            }
        }
        (DiffType::Add, DiffType::Add)
            if left.path == right.path
                && left.changes.is_object()
                && right.changes.is_object()
                && !is_key_collisions(&left.changes, &right.changes) =>
        {
            let mut changes = left.changes.clone();
            merge_objects(&mut changes, &right.changes);
            Resolution::Merged(Difference::add(left.path.clone(), changes))
        }
        _ => Resolution::Conflict,
    }
}

/// Combine two change sets computed against the same base.
///
/// Two differences are related when one path is a prefix of the other.
/// Related pairs resolve without conflict when both are deletes (the
/// shallower one wins), when they are identical, or when both add objects
/// at the same path with no colliding keys. Every other related pair is a
/// conflict; conflicts sharing a member are grouped together, in order of
/// first appearance in `left`.
pub fn merge(left: &[Difference], right: &[Difference]) -> MergeResult {
    let (n, m) = (left.len(), right.len());
    let mut dropped_left = vec![false; n];
    let mut dropped_right = vec![false; m];
    let mut replaced: Vec<Option<Difference>> = vec![None; n];
    let mut groups = DisjointSet::new(n + m);
    let mut in_conflict = vec![false; n + m];

    for (i, a) in left.iter().enumerate() {
        for (j, b) in right.iter().enumerate() {
            if !a.is_related(b) {
                continue;
            }
            match resolve_pair(a, b) {
                Resolution::KeepLeft => dropped_right[j] = true,
                Resolution::KeepRight => dropped_left[i] = true,
                Resolution::Merged(diff) => {
                    replaced[i] = Some(diff);
                    dropped_right[j] = true;
                }
                Resolution::Conflict => {
                    in_conflict[i] = true;
                    in_conflict[n + j] = true;
                    groups.union(i, n + j);
                }
            }
        }
    }

    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut group_of_root: Vec<Option<usize>> = vec![None; n + m];
    for i in (0..n).filter(|&i| in_conflict[i]) {
        let root = groups.find(i);
        let index = *group_of_root[root].get_or_insert_with(|| {
            conflicts.push((Vec::new(), Vec::new()));
            conflicts.len() - 1
        });
        conflicts[index].0.push(left[i].clone());
    }
    for j in (0..m).filter(|&j| in_conflict[n + j]) {
        let root = groups.find(n + j);
        if let Some(index) = group_of_root[root] {
            conflicts[index].1.push(right[j].clone());
        }
    }

    let mut diffs = Vec::new();
    for (i, diff) in left.iter().enumerate() {
        if !in_conflict[i] && !dropped_left[i] {
            diffs.push(replaced[i].clone().unwrap_or_else(|| diff.clone()));
        }
    }
    for (j, diff) in right.iter().enumerate() {
        if !in_conflict[n + j] && !dropped_right[j] {
            diffs.push(diff.clone());
        }
    }

    MergeResult { diffs, conflicts }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }
}
