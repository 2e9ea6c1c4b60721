//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use databatch::DataSlot;

/// String payloads of a slot, in row order
pub fn payloads(slot: &DataSlot) -> Vec<String> {
    slot.rows()
        .iter()
        .map(|r| r.data().to_annotation_string())
        .collect()
}

/// Value of one annotation for every row of a slot
pub fn column(slot: &DataSlot, name: &str) -> Vec<Option<String>> {
    slot.rows()
        .iter()
        .map(|r| r.annotations().value(name).map(str::to_string))
        .collect()
}
