//! Merge strategies for same-name annotation conflicts.
//!
//! Both enumerations are closed and total: every `(existing, incoming)` pair
//! resolves to a value, there is no failure mode.

use crate::slot::DataRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Resolves a conflict between two text annotation values sharing a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Order-independent union of both values.
    #[default]
    Merge,
    /// The incoming value wins.
    OverwriteExisting,
    /// The existing value wins, the incoming one is discarded.
    #[serde(alias = "skip")]
    SkipExisting,
}

impl MergeStrategy {
    /// Resolve `existing` against `incoming`.
    pub fn merge(self, existing: &str, incoming: &str) -> String {
        match self {
            MergeStrategy::OverwriteExisting => incoming.to_string(),
            MergeStrategy::SkipExisting => existing.to_string(),
            MergeStrategy::Merge => merge_values(existing, incoming),
        }
    }
}

/// Decides which payload reference survives when two data annotations collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAnnotationMergeStrategy {
    /// Keep the existing reference if both are the same payload, otherwise
    /// the incoming one.
    #[default]
    Merge,
    /// The incoming reference wins.
    OverwriteExisting,
    /// The existing reference wins.
    #[serde(alias = "skip")]
    SkipExisting,
}

impl DataAnnotationMergeStrategy {
    /// Resolve `existing` against `incoming`.
    pub fn merge(self, existing: &DataRef, incoming: &DataRef) -> DataRef {
        match self {
            DataAnnotationMergeStrategy::OverwriteExisting => incoming.clone(),
            DataAnnotationMergeStrategy::SkipExisting => existing.clone(),
            DataAnnotationMergeStrategy::Merge => {
                if existing.ptr_eq(incoming) {
                    existing.clone()
                } else {
                    incoming.clone()
                }
            }
        }
    }
}

/// Union of two values rendered as a sorted JSON array of strings.
///
/// A value that already is a JSON array of strings contributes its elements,
/// so merging previously merged values stays flat. A union with a single
/// element is rendered as that element.
fn merge_values(existing: &str, incoming: &str) -> String {
    if existing == incoming {
        return existing.to_string();
    }

    let mut union = BTreeSet::new();
    expand_into(existing, &mut union);
    expand_into(incoming, &mut union);

    if union.len() == 1 {
        if let Some(single) = union.into_iter().next() {
            return single;
        }
        return String::new();
    }

    // Serializing a set of strings cannot fail.
    serde_json::to_string(&union).unwrap_or_default()
}

fn expand_into(value: &str, union: &mut BTreeSet<String>) {
    if value.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(value) {
            union.extend(items);
            return;
        }
    }
    union.insert(value.to_string());
}
