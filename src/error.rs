//! Error handling for the batch engine
//!
//! This module defines the engine error taxonomy and a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// More rows matched a key than the slot's multiplicity allows
    #[error("Cardinality violation in slot '{slot}' for key {key}: {rows} rows matched, expected at most one")]
    CardinalityViolation {
        slot: String,
        key: String,
        rows: usize,
    },

    /// A required slot has no row for an otherwise valid key
    #[error("Required slot '{slot}' has no row for key {key}")]
    MissingRequiredSlotRow { slot: String, key: String },

    /// A custom matching column expression failed
    #[error("Expression for column '{column}' failed on row {row} of slot '{slot}': {message}")]
    ExpressionEvaluation {
        slot: String,
        row: usize,
        column: String,
        message: String,
    },

    /// An annotation name resolved to an empty string
    #[error("Annotation name is empty")]
    AnnotationNameEmpty,

    /// Node logic asked for a slot/row the batch does not own
    #[error("Row {row:?} of slot '{slot}' is not part of batch {batch}")]
    RowNotInBatch {
        slot: String,
        row: Option<usize>,
        batch: usize,
    },

    /// Input slot is not declared by the node or was not supplied
    #[error("Unknown input slot: {0}")]
    UnknownInputSlot(String),

    /// Output slot is not declared by the node
    #[error("Unknown output slot: {0}")]
    UnknownOutputSlot(String),

    /// Re-annotation targeted a row that was never committed
    #[error("Row {row} does not exist in slot '{slot}'")]
    RowOutOfRange { slot: String, row: usize },

    /// Contradictory or incomplete batching configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared lock was poisoned by a panicking worker
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Failure reported by node logic while processing a batch
    #[error("Node '{node}' error: {message}")]
    Node { node: String, message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a node error
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Node {
            node: node.into(),
            message: message.into(),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error only invalidates the batch that raised it.
    ///
    /// Batch-scoped errors discard that batch's staged output and the node
    /// invocation continues, whatever the failure policy.
    pub fn is_batch_scoped(&self) -> bool {
        matches!(self.root(), EngineError::AnnotationNameEmpty)
    }

    /// Whether this error always aborts the node invocation.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self.root(), EngineError::RowNotInBatch { .. })
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;
