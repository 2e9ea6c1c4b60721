//! Batching configuration: how rows are matched, joined and merged.
//!
//! All options are closed enums so a configuration file either names a known
//! behavior or fails to load.

use crate::annotation::{DataAnnotationMergeStrategy, MergeStrategy};
use crate::error::{EngineError, EngineResult};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Which annotation columns form the batch key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "columns", rename_all = "snake_case")]
pub enum ColumnMatching {
    /// Columns present in every non-empty input slot.
    #[default]
    AllShared,
    /// Every column present in any input slot.
    Union,
    /// A fixed list of columns.
    Explicit(Vec<String>),
    /// Columns computed from an expression per row.
    Custom(Vec<CustomColumn>),
    /// No columns: all rows share one key.
    MergeAll,
    /// No grouping: every row is its own key.
    SplitAll,
}

/// A computed matching column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomColumn {
    pub name: String,
    pub expression: String,
}

impl CustomColumn {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// What a row that lacks a matching column matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingColumnPolicy {
    /// Missing is a value of its own: it matches other missing values only.
    #[default]
    Distinct,
    /// The row matches nothing and is batched alone.
    NoMatch,
    /// The column is ignored for that row.
    Wildcard,
}

/// Treatment of keys that some required slot has no row for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Inner,
    Outer,
}

/// How many rows per slot a batch may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Strict slots contribute at most one row per batch.
    #[default]
    Single,
    /// Any number of rows per slot.
    Merging,
}

/// Complete batching configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub matching: ColumnMatching,
    pub missing_columns: MissingColumnPolicy,
    pub join: JoinMode,
    /// Turn a missing required row into an error instead of dropping the key.
    ///
    /// Under an inner join, building fails with
    /// [`EngineError::MissingRequiredSlotRow`] on the first such key, before
    /// any batch runs. Combined with an outer join it is rejected by
    /// [`BatchingConfig::validate`].
    pub require_presence: bool,
    pub mode: BatchMode,
    pub annotation_merge: MergeStrategy,
    pub data_annotation_merge: DataAnnotationMergeStrategy,
}

impl BatchingConfig {
    /// One batch per row.
    pub fn per_row() -> Self {
        Self {
            matching: ColumnMatching::SplitAll,
            ..Self::default()
        }
    }

    /// Merging batches over all shared columns.
    pub fn merging() -> Self {
        Self {
            mode: BatchMode::Merging,
            ..Self::default()
        }
    }

    pub fn with_matching(mut self, matching: ColumnMatching) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_explicit_columns<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_matching(ColumnMatching::Explicit(
            columns.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn with_missing_columns(mut self, policy: MissingColumnPolicy) -> Self {
        self.missing_columns = policy;
        self
    }

    pub fn with_join(mut self, join: JoinMode) -> Self {
        self.join = join;
        self
    }

    pub fn with_require_presence(mut self, require: bool) -> Self {
        self.require_presence = require;
        self
    }

    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_annotation_merge(mut self, strategy: MergeStrategy) -> Self {
        self.annotation_merge = strategy;
        self
    }

    pub fn with_data_annotation_merge(mut self, strategy: DataAnnotationMergeStrategy) -> Self {
        self.data_annotation_merge = strategy;
        self
    }

    /// Reject contradictory settings.
    pub fn validate(&self) -> EngineResult<()> {
        if self.join == JoinMode::Outer && self.require_presence {
            return Err(EngineError::InvalidConfiguration(
                "outer join cannot require presence of every slot".to_string(),
            ));
        }

        match &self.matching {
            ColumnMatching::Explicit(columns) => {
                let mut seen = IndexSet::new();
                for column in columns {
                    if column.is_empty() {
                        return Err(EngineError::InvalidConfiguration(
                            "explicit matching column name is empty".to_string(),
                        ));
                    }
                    if !seen.insert(column.as_str()) {
                        return Err(EngineError::InvalidConfiguration(format!(
                            "explicit matching column '{}' listed twice",
                            column
                        )));
                    }
                }
            }
            ColumnMatching::Custom(columns) => {
                let mut seen = IndexSet::new();
                for column in columns {
                    if column.name.is_empty() {
                        return Err(EngineError::InvalidConfiguration(
                            "custom matching column name is empty".to_string(),
                        ));
                    }
                    if !seen.insert(column.name.as_str()) {
                        return Err(EngineError::InvalidConfiguration(format!(
                            "custom matching column '{}' defined twice",
                            column.name
                        )));
                    }
                    if column.expression.trim().is_empty() {
                        return Err(EngineError::InvalidConfiguration(format!(
                            "custom matching column '{}' has no expression",
                            column.name
                        )));
                    }
                }
            }
            ColumnMatching::AllShared
            | ColumnMatching::Union
            | ColumnMatching::MergeAll
            | ColumnMatching::SplitAll => {}
        }

        Ok(())
    }
}
