//! Data slots: ordered tables of annotated payload rows.
//!
//! A [`DataSlot`] is the unit exchanged between nodes. Row order is insertion
//! order and a row's index identifies it for the duration of one node
//! execution. Nodes read their input slots through shared references and
//! write to separate output slots, so an input row is never changed in place.

pub mod descriptor;
pub mod document;

pub use descriptor::{Multiplicity, SlotDescriptor, SlotDirection};
pub use document::{RowDocument, SlotDocument};

use crate::annotation::{AnnotationSet, DataAnnotationSet};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Payload content the engine can carry without inspecting it.
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// String projection, used only when a node asks for the payload as an
    /// annotation value.
    fn to_annotation_string(&self) -> String;

    fn as_any(&self) -> &dyn Any;
}

macro_rules! impl_display_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Payload for $ty {
                fn to_annotation_string(&self) -> String {
                    self.to_string()
                }

                fn as_any(&self) -> &dyn Any {
                    self
                }
            }
        )*
    };
}

impl_display_payload!(String, &'static str, i64, u64, i32, u32, f64, f32, bool);

/// Opaque, cheaply cloneable handle to a payload.
#[derive(Clone)]
pub struct DataRef(Arc<dyn Payload>);

impl DataRef {
    pub fn new<T: Payload>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc(value: Arc<dyn Payload>) -> Self {
        Self(value)
    }

    /// Whether both handles point at the same payload.
    pub fn ptr_eq(&self, other: &DataRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn to_annotation_string(&self) -> String {
        self.0.to_annotation_string()
    }
}

impl fmt::Debug for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataRef").field(&self.0).finish()
    }
}

/// One row of a slot: a payload plus its text and data annotations.
#[derive(Debug, Clone)]
pub struct DataRow {
    data: DataRef,
    annotations: Arc<AnnotationSet>,
    data_annotations: Arc<DataAnnotationSet>,
}

impl DataRow {
    pub fn new(data: DataRef, annotations: AnnotationSet) -> Self {
        Self::with_data_annotations(data, annotations, DataAnnotationSet::new())
    }

    pub fn with_data_annotations(
        data: DataRef,
        annotations: AnnotationSet,
        data_annotations: DataAnnotationSet,
    ) -> Self {
        Self {
            data,
            annotations: Arc::new(annotations),
            data_annotations: Arc::new(data_annotations),
        }
    }

    pub fn data(&self) -> &DataRef {
        &self.data
    }

    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    pub fn data_annotations(&self) -> &DataAnnotationSet {
        &self.data_annotations
    }

    /// Copy of this row carrying `annotations` instead. The payload and data
    /// annotations are shared with the original.
    pub fn with_annotations(&self, annotations: AnnotationSet) -> Self {
        Self {
            data: self.data.clone(),
            annotations: Arc::new(annotations),
            data_annotations: Arc::clone(&self.data_annotations),
        }
    }
}

/// A named, ordered table of rows.
#[derive(Debug, Clone, Default)]
pub struct DataSlot {
    name: String,
    rows: Vec<DataRow>,
}

impl DataSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(name: impl Into<String>, rows: Vec<DataRow>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&DataRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row. Returns its index.
    pub fn push(&mut self, row: DataRow) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    /// Append a payload with annotations. Returns the new row index.
    pub fn add_data(&mut self, data: DataRef, annotations: AnnotationSet) -> usize {
        self.push(DataRow::new(data, annotations))
    }

    /// Names of all annotation columns, in first-seen order.
    pub fn annotation_columns(&self) -> Vec<&str> {
        let mut seen = indexmap::IndexSet::new();
        for row in &self.rows {
            seen.extend(row.annotations().names());
        }
        seen.into_iter().collect()
    }

    pub(crate) fn row_mut(&mut self, index: usize) -> Option<&mut DataRow> {
        self.rows.get_mut(index)
    }
}
