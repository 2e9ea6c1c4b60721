//! Batches: the unit of work handed to node logic.
//!
//! A [`Batch`] groups the input rows that share a batch key, together with a
//! working copy of their merged annotations. Node logic reads inputs through
//! the batch and stages output rows on it, along with re-annotations of rows
//! committed earlier; the executor commits both once the batch has been
//! processed successfully.
//!
//! Batches are built fresh for every node execution by the
//! [`BatchBuilder`] and borrow the input slots for their whole life.

pub mod builder;
pub mod config;
pub mod key;

pub use builder::{BatchBuilder, BatchPlan, InputBinding};
pub use config::{
    BatchMode, BatchingConfig, ColumnMatching, CustomColumn, JoinMode, MissingColumnPolicy,
};
pub use key::{BatchKey, KeyPart};

use crate::annotation::{
    AnnotationSet, DataAnnotationMergeStrategy, DataAnnotationSet, MergeStrategy,
};
use crate::error::{EngineError, EngineResult};
use crate::slot::{DataRef, DataRow};

/// Whether a batch carries one row per slot or any number of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Single,
    Merging,
}

impl From<BatchMode> for BatchKind {
    fn from(mode: BatchMode) -> Self {
        match mode {
            BatchMode::Single => BatchKind::Single,
            BatchMode::Merging => BatchKind::Merging,
        }
    }
}

/// An output row waiting for its batch to be committed.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub slot: String,
    pub row: DataRow,
}

/// Which committed output rows a staged re-annotation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelector {
    /// One row by its index in the output slot.
    Index(usize),
    /// Every row whose annotation `name` has `value`.
    Annotated { name: String, value: String },
}

/// Annotations to merge into committed output rows when the batch commits.
#[derive(Debug, Clone)]
pub struct StagedAnnotation {
    pub slot: String,
    pub selector: RowSelector,
    pub annotations: AnnotationSet,
    pub strategy: MergeStrategy,
}

/// A group of matching input rows.
#[derive(Debug)]
pub struct Batch<'a> {
    index: usize,
    key: BatchKey,
    key_label: String,
    kind: BatchKind,
    inputs: &'a [InputBinding<'a>],
    /// Row indices per input binding, ascending.
    rows: Vec<Vec<usize>>,
    annotations: AnnotationSet,
    data_annotations: DataAnnotationSet,
    staged: Vec<StagedRow>,
    reannotations: Vec<StagedAnnotation>,
}

impl<'a> Batch<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        key: BatchKey,
        key_label: String,
        kind: BatchKind,
        inputs: &'a [InputBinding<'a>],
        rows: Vec<Vec<usize>>,
        annotations: AnnotationSet,
        data_annotations: DataAnnotationSet,
    ) -> Self {
        Self {
            index,
            key,
            key_label,
            kind,
            inputs,
            rows,
            annotations,
            data_annotations,
            staged: Vec::new(),
            reannotations: Vec::new(),
        }
    }

    /// Position of the batch in the execution order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Readable key, e.g. `(Sample="A")`.
    pub fn key_label(&self) -> &str {
        &self.key_label
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    fn position(&self, slot: &str) -> EngineResult<usize> {
        self.inputs
            .iter()
            .position(|b| b.name() == slot)
            .ok_or_else(|| EngineError::RowNotInBatch {
                slot: slot.to_string(),
                row: None,
                batch: self.index,
            })
    }

    /// Indices of the rows this batch owns in `slot`.
    pub fn input_rows(&self, slot: &str) -> EngineResult<&[usize]> {
        let pos = self.position(slot)?;
        Ok(&self.rows[pos])
    }

    /// Whether the batch owns at least one row of `slot`.
    pub fn has_rows(&self, slot: &str) -> bool {
        self.position(slot)
            .map(|pos| !self.rows[pos].is_empty())
            .unwrap_or(false)
    }

    /// Row indices per input slot, in input order.
    pub fn rows_per_slot(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.inputs
            .iter()
            .zip(&self.rows)
            .map(|(binding, rows)| (binding.name(), rows.as_slice()))
    }

    /// Total number of input rows in the batch.
    pub fn row_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Payload of the batch's row in `slot`.
    ///
    /// For a merging batch this is the first row. Fails if the batch owns no
    /// row of `slot`.
    pub fn input_data(&self, slot: &str) -> EngineResult<&'a DataRef> {
        let pos = self.position(slot)?;
        match self.rows[pos].first() {
            Some(&row) => self.row_at(pos, row).map(DataRow::data),
            None => Err(EngineError::RowNotInBatch {
                slot: slot.to_string(),
                row: None,
                batch: self.index,
            }),
        }
    }

    /// Payload of a specific input row. Fails if the row is not in the batch.
    pub fn input_data_at(&self, slot: &str, row: usize) -> EngineResult<&'a DataRef> {
        self.input_row(slot, row).map(DataRow::data)
    }

    /// Payloads of every row of `slot` in the batch.
    pub fn input_data_all(&self, slot: &str) -> EngineResult<Vec<&'a DataRef>> {
        Ok(self
            .input_row_list(slot)?
            .into_iter()
            .map(|(_, row)| row.data())
            .collect())
    }

    /// Full input row. Fails if the row is not in the batch.
    pub fn input_row(&self, slot: &str, row: usize) -> EngineResult<&'a DataRow> {
        let pos = self.position(slot)?;
        if self.rows[pos].binary_search(&row).is_err() {
            return Err(EngineError::RowNotInBatch {
                slot: slot.to_string(),
                row: Some(row),
                batch: self.index,
            });
        }
        self.row_at(pos, row)
    }

    /// Every row of `slot` in the batch, with its index.
    pub fn input_row_list(&self, slot: &str) -> EngineResult<Vec<(usize, &'a DataRow)>> {
        let pos = self.position(slot)?;
        self.rows[pos]
            .iter()
            .map(|&row| self.row_at(pos, row).map(|r| (row, r)))
            .collect()
    }

    fn row_at(&self, pos: usize, row: usize) -> EngineResult<&'a DataRow> {
        let binding = &self.inputs[pos];
        binding.slot.row(row).ok_or_else(|| EngineError::RowNotInBatch {
            slot: binding.name().to_string(),
            row: Some(row),
            batch: self.index,
        })
    }

    /// Merged annotations of all contributing rows.
    pub fn merged_annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    /// Working copy of the merged annotations. Changes only affect rows
    /// staged afterwards.
    pub fn merged_annotations_mut(&mut self) -> &mut AnnotationSet {
        &mut self.annotations
    }

    pub fn merged_data_annotations(&self) -> &DataAnnotationSet {
        &self.data_annotations
    }

    pub fn merged_data_annotations_mut(&mut self) -> &mut DataAnnotationSet {
        &mut self.data_annotations
    }

    /// Stage an output row carrying the working annotations merged with
    /// `extra`.
    pub fn add_output_data(
        &mut self,
        slot: impl Into<String>,
        data: DataRef,
        extra: &AnnotationSet,
        strategy: MergeStrategy,
    ) {
        let annotations = self.annotations.merged(extra, strategy);
        let row = DataRow::with_data_annotations(data, annotations, self.data_annotations.clone());
        self.add_output_row(slot, row);
    }

    /// Like [`Batch::add_output_data`], also merging `extra_data` into the
    /// working data annotations.
    pub fn add_output_data_with(
        &mut self,
        slot: impl Into<String>,
        data: DataRef,
        extra: &AnnotationSet,
        strategy: MergeStrategy,
        extra_data: &DataAnnotationSet,
        data_strategy: DataAnnotationMergeStrategy,
    ) {
        let annotations = self.annotations.merged(extra, strategy);
        let mut data_annotations = self.data_annotations.clone();
        data_annotations.merge_all(extra_data.iter(), data_strategy);
        let row = DataRow::with_data_annotations(data, annotations, data_annotations);
        self.add_output_row(slot, row);
    }

    /// Stage a complete row as is.
    pub fn add_output_row(&mut self, slot: impl Into<String>, row: DataRow) {
        self.staged.push(StagedRow {
            slot: slot.into(),
            row,
        });
    }

    /// Rows staged so far.
    pub fn staged(&self) -> &[StagedRow] {
        &self.staged
    }

    /// Stage a re-annotation of output rows already committed, or staged
    /// by this batch. Applied after this batch's rows are appended.
    pub fn annotate_output(
        &mut self,
        slot: impl Into<String>,
        selector: RowSelector,
        annotations: AnnotationSet,
        strategy: MergeStrategy,
    ) {
        self.reannotations.push(StagedAnnotation {
            slot: slot.into(),
            selector,
            annotations,
            strategy,
        });
    }

    pub fn staged_annotations(&self) -> &[StagedAnnotation] {
        &self.reannotations
    }

    pub(crate) fn take_staged(&mut self) -> (Vec<StagedRow>, Vec<StagedAnnotation>) {
        (
            std::mem::take(&mut self.staged),
            std::mem::take(&mut self.reannotations),
        )
    }
}
