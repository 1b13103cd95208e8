//! Three-way reconciliation of local edits with a new remote version.
//!
//! Both sides are diffed against the last synchronized snapshot and the two
//! change sets are classified with [`merge`]. Remote changes that conflict
//! with nothing are applied to the local document right away; conflicts wait
//! for the caller to pick a side.

use serde_json::Value;
use tracing::debug;

use crate::apply::{apply, is_excluded};
use crate::diff::diff;
use crate::error::{PatchError, RebaseFailure};
use crate::merge::merge;
use crate::types::{Conflict, Difference};

/// Everything a rebase decided, before anything is written back.
#[derive(Debug, Clone, PartialEq)]
pub struct RebasePlan {
    /// Non-conflicting differences from both sides.
    pub merged: Vec<Difference>,
    /// `(remote members, local members)` groups.
    pub conflicts: Vec<Conflict>,
    /// Remote changes the local document does not have yet.
    pub to_apply: Vec<Difference>,
    /// Remote changes under excluded top-level keys; never applied.
    pub excluded: Vec<Difference>,
}

/// Compare `local` and `remote` against `snapshot`.
///
/// A remote change that no longer fits the local document, such as an array
/// append past an element the local side removed, is reported as a conflict
/// with the local changes under the same parent.
///
/// # Errors
///
/// Returns `RebaseFailure::NoChangesDetected` when `remote` equals `snapshot`.
pub fn plan_rebase<S: AsRef<str>>(
    snapshot: &Value,
    local: &Value,
    remote: &Value,
    excluded_keys: &[S],
) -> Result<RebasePlan, RebaseFailure> {
    let remote_diffs = diff(snapshot, remote);
    if remote_diffs.is_empty() {
        return Err(RebaseFailure::NoChangesDetected);
    }
    let local_diffs = diff(snapshot, local);

    let mut merged = merge(&remote_diffs, &local_diffs);
    let (excluded, candidates): (Vec<Difference>, Vec<Difference>) = merged
        .diffs
        .iter()
        .filter(|d| !local_diffs.contains(d))
        .cloned()
        .partition(|d| is_excluded(d, excluded_keys));

    let (to_apply, misfits) = dry_run(local, candidates);
    if !misfits.is_empty() {
        let conflicts = misfit_conflicts(misfits, &local_diffs);
        merged.diffs.retain(|d| {
            !conflicts
                .iter()
                .any(|(remote_side, local_side)| remote_side.contains(d) || local_side.contains(d))
        });
        debug!(conflicts = conflicts.len(), "remote changes no longer fit the local document");
        merged.conflicts.extend(conflicts);
    }

    Ok(RebasePlan {
        merged: merged.diffs,
        conflicts: merged.conflicts,
        to_apply,
        excluded,
    })
}

/// Split `candidates` into the ones that apply to `local` in order and the
/// ones that don't.
fn dry_run(local: &Value, candidates: Vec<Difference>) -> (Vec<Difference>, Vec<Difference>) {
    let mut trial = local.clone();
    let mut fits = Vec::with_capacity(candidates.len());
    let mut misfits = Vec::new();

    for candidate in candidates {
        match apply(&mut trial, std::slice::from_ref(&candidate)) {
            Ok(_) => fits.push(candidate),
            Err(_) => misfits.push(candidate),
        }
    }
    (fits, misfits)
}

/// Group misfits by parent path, each against the local changes at or under
/// that parent.
fn misfit_conflicts(misfits: Vec<Difference>, local_diffs: &[Difference]) -> Vec<Conflict> {
    let mut groups: Vec<(Vec<String>, Conflict)> = Vec::new();

    for misfit in misfits {
        let parent = misfit.path[..misfit.path.len().saturating_sub(1)].to_vec();
        match groups.iter_mut().find(|(existing, _)| *existing == parent) {
            Some((_, (remote_side, _))) => remote_side.push(misfit),
            None => {
                let local_side = local_diffs
                    .iter()
                    .filter(|d| d.path.starts_with(&parent) || parent.starts_with(&d.path))
                    .cloned()
                    .collect();
                groups.push((parent, (vec![misfit], local_side)));
            }
        }
    }

    groups.into_iter().map(|(_, conflict)| conflict).collect()
}

impl RebasePlan {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// `local` with the non-conflicting remote changes applied.
    ///
    /// `local` itself is never touched, so a failure leaves nothing half
    /// written.
    ///
    /// # Errors
    ///
    /// Propagates `PatchError` from [`apply`].
    pub fn apply_remote(&self, local: &Value) -> Result<Value, PatchError> {
        let mut updated = local.clone();
        apply(&mut updated, &self.to_apply)?;
        Ok(updated)
    }

    /// Build the resolved document: `snapshot` plus every non-conflicting
    /// difference plus the caller's picks from the conflicts.
    ///
    /// # Errors
    ///
    /// Propagates `PatchError` from [`apply`].
    pub fn resolve(&self, snapshot: &Value, selected: &[Difference]) -> Result<Value, PatchError> {
        let kept: Vec<Difference> = self
            .merged
            .iter()
            .filter(|d| !self.excluded.contains(d))
            .cloned()
            .collect();

        let mut resolved = snapshot.clone();
        apply(&mut resolved, &kept)?;
        apply(&mut resolved, selected)?;
        Ok(resolved)
    }
}
