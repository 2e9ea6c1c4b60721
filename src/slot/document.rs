//! JSON form of string-payload slots, used by the command line runner.

use crate::annotation::{AnnotationSet, DataAnnotationSet};
use crate::error::EngineResult;
use crate::slot::{DataRef, DataRow, DataSlot};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A slot whose payloads are strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDocument {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<RowDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDocument {
    pub data: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data_annotations: IndexMap<String, String>,
}

impl SlotDocument {
    /// Build a slot. Fails on empty annotation names.
    pub fn into_slot(self) -> EngineResult<DataSlot> {
        let mut slot = DataSlot::new(self.name);
        for row in self.rows {
            let annotations = AnnotationSet::from_pairs(row.annotations)?;
            let mut data_annotations = DataAnnotationSet::new();
            for (name, value) in row.data_annotations {
                data_annotations.insert(name, DataRef::new(value))?;
            }
            slot.push(DataRow::with_data_annotations(
                DataRef::new(row.data),
                annotations,
                data_annotations,
            ));
        }
        Ok(slot)
    }

    /// Describe a slot, projecting every payload to its string form.
    pub fn from_slot(slot: &DataSlot) -> Self {
        let rows = slot
            .rows()
            .iter()
            .map(|row| RowDocument {
                data: row.data().to_annotation_string(),
                annotations: row
                    .annotations()
                    .iter()
                    .map(|a| (a.name().to_string(), a.value().to_string()))
                    .collect(),
                data_annotations: row
                    .data_annotations()
                    .iter()
                    .map(|(name, data)| (name.to_string(), data.to_annotation_string()))
                    .collect(),
            })
            .collect();
        Self {
            name: slot.name().to_string(),
            rows,
        }
    }
}
