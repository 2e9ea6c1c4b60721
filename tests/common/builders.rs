//! Test data builders for creating slots and rows

use databatch::{AnnotationSet, DataRef, DataRow, DataSlot};

/// Builder for creating test rows with string payloads
pub struct RowBuilder {
    data: String,
    annotations: Vec<(String, String)>,
}

impl RowBuilder {
    pub fn new(data: &str) -> Self {
        Self {
            data: data.to_string(),
            annotations: Vec::new(),
        }
    }

    pub fn annotation(mut self, name: &str, value: &str) -> Self {
        self.annotations.push((name.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> DataRow {
        let annotations = AnnotationSet::from_pairs(self.annotations).expect("valid annotation names");
        DataRow::new(DataRef::new(self.data), annotations)
    }
}

/// Builder for creating test slots
pub struct SlotBuilder {
    name: String,
    rows: Vec<DataRow>,
}

impl SlotBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: RowBuilder) -> Self {
        self.rows.push(row.build());
        self
    }

    /// Add a row with a single annotation
    pub fn keyed(self, data: &str, column: &str, value: &str) -> Self {
        self.row(RowBuilder::new(data).annotation(column, value))
    }

    pub fn build(self) -> DataSlot {
        DataSlot::with_rows(self.name, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_builder() {
        let slot = SlotBuilder::new("Data")
            .keyed("p1", "Sample", "A")
            .row(RowBuilder::new("p2").annotation("Sample", "B").annotation("Dose", "2"))
            .build();

        assert_eq!(slot.name(), "Data");
        assert_eq!(slot.len(), 2);
        assert_eq!(slot.row(1).unwrap().annotations().value("Dose"), Some("2"));
    }
}
