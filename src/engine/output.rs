//! Output commit: the append-only output slots of one node execution.
//!
//! All slots sit behind a single mutex, so committing a batch's staged rows
//! is one critical section. Row indices follow append order. With parallel
//! execution the order in which batches commit, and therefore the row order
//! across batches, is not deterministic.
//!
//! Re-annotating a committed row replaces its annotation set instead of
//! mutating it, so snapshots taken earlier keep their values.

use crate::annotation::{Annotation, MergeStrategy};
use crate::batch::{RowSelector, StagedAnnotation, StagedRow};
use crate::error::{EngineError, EngineResult};
use crate::slot::{DataRow, DataSlot};
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard};

/// Where a committed row landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedRow {
    pub slot: String,
    pub row: usize,
}

#[derive(Debug, Default)]
pub struct OutputSlots {
    slots: Mutex<IndexMap<String, DataSlot>>,
}

impl OutputSlots {
    /// Empty output slots with the given names, in declaration order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), DataSlot::new(name))
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, IndexMap<String, DataSlot>>> {
        self.slots
            .lock()
            .map_err(|e| EngineError::LockPoisoned(format!("output slots: {}", e)))
    }

    /// Append a batch's staged rows.
    ///
    /// Every target slot is checked before the first append, so an unknown
    /// slot leaves all outputs untouched.
    pub fn commit(&self, staged: Vec<StagedRow>) -> EngineResult<Vec<CommittedRow>> {
        self.commit_with(staged, Vec::new())
    }

    /// Append a batch's staged rows, then apply its staged re-annotations.
    ///
    /// Slots and row indices are all checked first; on error nothing is
    /// written.
    pub fn commit_with(
        &self,
        staged: Vec<StagedRow>,
        annotations: Vec<StagedAnnotation>,
    ) -> EngineResult<Vec<CommittedRow>> {
        let mut slots = self.lock()?;
        let unknown = staged
            .iter()
            .map(|s| &s.slot)
            .chain(annotations.iter().map(|a| &a.slot))
            .find(|slot| !slots.contains_key(slot.as_str()));
        if let Some(unknown) = unknown {
            return Err(EngineError::UnknownOutputSlot(unknown.clone()));
        }
        for target in &annotations {
            if let RowSelector::Index(row) = target.selector {
                let appended = staged.iter().filter(|s| s.slot == target.slot).count();
                let len = slots.get(&target.slot).map_or(0, DataSlot::len) + appended;
                if row >= len {
                    return Err(EngineError::RowOutOfRange {
                        slot: target.slot.clone(),
                        row,
                    });
                }
            }
        }

        let mut committed = Vec::with_capacity(staged.len());
        for StagedRow { slot, row } in staged {
            if let Some(target) = slots.get_mut(&slot) {
                let index = target.push(row);
                committed.push(CommittedRow { slot, row: index });
            }
        }
        for staged in &annotations {
            if let Some(target) = slots.get_mut(&staged.slot) {
                reannotate(target, staged);
            }
        }
        tracing::trace!(
            "Committed {} rows, {} re-annotations",
            committed.len(),
            annotations.len()
        );
        Ok(committed)
    }

    /// Merge annotations into an already committed row.
    pub fn annotate<I>(&self, slot: &str, row: usize, annotations: I, strategy: MergeStrategy) -> EngineResult<()>
    where
        I: IntoIterator<Item = Annotation>,
    {
        let mut slots = self.lock()?;
        let target = slots
            .get_mut(slot)
            .ok_or_else(|| EngineError::UnknownOutputSlot(slot.to_string()))?;
        let existing = target.row_mut(row).ok_or_else(|| EngineError::RowOutOfRange {
            slot: slot.to_string(),
            row,
        })?;
        merge_into(existing, annotations, strategy);
        Ok(())
    }

    /// Number of rows committed to `slot`.
    pub fn len(&self, slot: &str) -> EngineResult<usize> {
        self.lock()?
            .get(slot)
            .map(DataSlot::len)
            .ok_or_else(|| EngineError::UnknownOutputSlot(slot.to_string()))
    }

    /// Copy of the current contents of `slot`.
    pub fn snapshot(&self, slot: &str) -> EngineResult<DataSlot> {
        self.lock()?
            .get(slot)
            .cloned()
            .ok_or_else(|| EngineError::UnknownOutputSlot(slot.to_string()))
    }

    /// The populated slots, in declaration order.
    pub fn into_slots(self) -> EngineResult<Vec<DataSlot>> {
        let slots = self
            .slots
            .into_inner()
            .map_err(|e| EngineError::LockPoisoned(format!("output slots: {}", e)))?;
        Ok(slots.into_values().collect())
    }
}

fn reannotate(target: &mut DataSlot, staged: &StagedAnnotation) {
    let rows: Vec<usize> = match &staged.selector {
        RowSelector::Index(row) => vec![*row],
        RowSelector::Annotated { name, value } => (0..target.len())
            .filter(|&i| {
                target
                    .row(i)
                    .and_then(|row| row.annotations().value(name))
                    == Some(value.as_str())
            })
            .collect(),
    };
    for index in rows {
        if let Some(existing) = target.row_mut(index) {
            merge_into(existing, staged.annotations.iter().cloned(), staged.strategy);
        }
    }
}

fn merge_into<I>(existing: &mut DataRow, annotations: I, strategy: MergeStrategy)
where
    I: IntoIterator<Item = Annotation>,
{
    let mut updated = existing.annotations().clone();
    updated.merge_all(annotations, strategy);
    *existing = existing.with_annotations(updated);
}
