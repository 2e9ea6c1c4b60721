//! Slot descriptors for the node system.
//!
//! Each node declares its slots (inputs/outputs) via `SlotDescriptor` lists.
//! The executor uses these to bind supplied input slots, to create output
//! slots, and the batch builder reads the presence and multiplicity rules.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Whether a slot is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDirection {
    Input,
    Output,
}

/// How many rows of an input slot may share one batch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    /// At most one row per key (strict).
    #[default]
    Single,
    /// Zero or more rows per key.
    Many,
}

/// Static descriptor for a node's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub name: Cow<'static, str>,
    pub direction: SlotDirection,
    /// Inputs only: an inner join drops keys this slot has no row for.
    pub required: bool,
    /// Inputs only: rows per key tolerated in single-row batching.
    pub multiplicity: Multiplicity,
}

impl SlotDescriptor {
    /// A required, strict input slot.
    pub const fn input(name: &'static str) -> Self {
        Self::input_with(name, true, Multiplicity::Single)
    }

    pub const fn input_with(name: &'static str, required: bool, multiplicity: Multiplicity) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: SlotDirection::Input,
            required,
            multiplicity,
        }
    }

    pub const fn output(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: SlotDirection::Output,
            required: false,
            multiplicity: Multiplicity::Many,
        }
    }

    /// Input slot with a runtime name.
    pub fn dynamic_input(name: impl Into<String>, required: bool, multiplicity: Multiplicity) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            direction: SlotDirection::Input,
            required,
            multiplicity,
        }
    }

    /// Output slot with a runtime name.
    pub fn dynamic_output(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            direction: SlotDirection::Output,
            required: false,
            multiplicity: Multiplicity::Many,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_input(&self) -> bool {
        self.direction == SlotDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == SlotDirection::Output
    }
}
