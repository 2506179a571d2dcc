//! Merge engine: last-writer-wins reconciliation of element collections.
//!
//! DESIGN
//! ======
//! `merge(base, incoming)` is a pure function. Incoming records are applied
//! in input order against a map keyed by element id:
//! - a tombstone removes the id unconditionally;
//! - an unseen id is inserted;
//! - otherwise the record with the newer `updatedAt` (falling back to
//!   `createdAt`) wins, and incoming wins ties.
//!
//! The result is sorted by `(createdAt, id)` so every peer renders the same
//! stacking order for the same set.
//!
//! TRADE-OFFS
//! ==========
//! Timestamps are client clocks. Two peers editing one element at the same
//! millisecond resolve to whichever batch is applied last; clock skew is not
//! corrected. Omission from a batch is never treated as deletion; only
//! tombstones, explicit removed ids, or `reconcile_snapshot` delete.
//!
//! Re-applying a batch is idempotent: `merge(merge(X, Y), Y) == merge(X, Y)`.
//! Merging the result back into its base is not. When `Y` tombstones an id
//! that `X` holds, the tombstone is gone from `merge(X, Y)`, so
//! `merge(X, merge(X, Y))` keeps the element.

use std::collections::{HashMap, HashSet};

use crate::element::{Element, ElementId};

/// Merge `incoming` into `base` and return the reconciled, sorted collection.
#[must_use]
pub fn merge(base: &[Element], incoming: &[Element]) -> Vec<Element> {
    let mut map: HashMap<ElementId, Element> = base
        .iter()
        .filter(|el| !el.is_deleted)
        .map(|el| (el.id.clone(), el.clone()))
        .collect();

    for el in incoming {
        if el.is_deleted {
            map.remove(&el.id);
            continue;
        }

        let merged = match map.remove(&el.id) {
            None => el.clone(),
            Some(existing) if el.effective_updated_at() >= existing.effective_updated_at() => {
                existing.overlay(el.clone())
            }
            Some(existing) => existing,
        };
        map.insert(merged.id.clone(), merged);
    }

    sorted(map.into_values().collect())
}

/// Merge `incoming`, then delete every id listed in `removed_ids`.
#[must_use]
pub fn merge_with_removals(base: &[Element], incoming: &[Element], removed_ids: &[ElementId]) -> Vec<Element> {
    let mut merged = merge(base, incoming);
    if !removed_ids.is_empty() {
        let removed: HashSet<&str> = removed_ids.iter().map(String::as_str).collect();
        merged.retain(|el| !removed.contains(el.id.as_str()));
    }
    merged
}

/// Fold in a batch declared to be a full snapshot: ids in `base` that the
/// snapshot omits are removed, everything else merges normally.
#[must_use]
pub fn reconcile_snapshot(base: &[Element], snapshot: &[Element]) -> Vec<Element> {
    let present: HashSet<&str> = snapshot.iter().map(|el| el.id.as_str()).collect();
    let kept: Vec<Element> = base
        .iter()
        .filter(|el| present.contains(el.id.as_str()))
        .cloned()
        .collect();
    merge(&kept, snapshot)
}

/// Sort by `(createdAt, id)` ascending.
#[must_use]
pub fn sorted(mut elements: Vec<Element>) -> Vec<Element> {
    elements.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    elements
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod tests;
