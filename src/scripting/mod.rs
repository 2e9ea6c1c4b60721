//! Expression evaluation for computed columns and node logic
//!
//! The engine only depends on the [`ExpressionEvaluator`] trait: a pure,
//! synchronous `evaluate(expression, variables) -> value` function. The
//! default implementation, [`RhaiEvaluator`], runs expressions as Rhai scripts.
//!
//! ## Variables
//!
//! Row expressions see:
//!
//! - every annotation of the row, as a string, under its own name
//! - `slot_name` - name of the slot the row comes from
//! - `row_index` - index of the row in that slot
//! - `vars` - a map of all of the above, for names that are not identifiers
//!
//! `slot_name` and `row_index` take precedence over annotations with the same
//! name.
//!
//! ## Example Expressions
//!
//! Grouping by the plate part of a well id:
//! ```rhai
//! before(Well, "-")
//! ```
//!
//! Reading an annotation with a space in its name:
//! ```rhai
//! upper(vars["Plate Id"])
//! ```

mod engine;

pub use engine::RhaiEvaluator;

use crate::slot::DataRow;
use indexmap::IndexMap;
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Name of the variable holding the row's slot name.
pub const SLOT_NAME_VAR: &str = "slot_name";
/// Name of the variable holding the row's index.
pub const ROW_INDEX_VAR: &str = "row_index";

/// Value produced by an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<ExpressionValue>),
}

impl ExpressionValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ExpressionValue::Null)
    }

    /// String form used when the value becomes an annotation.
    ///
    /// Integral numbers print without a fractional part, lists as JSON arrays.
    pub fn to_annotation_string(&self) -> String {
        match self {
            ExpressionValue::Null => String::new(),
            ExpressionValue::Bool(b) => b.to_string(),
            ExpressionValue::Number(n) => format_number(*n),
            ExpressionValue::String(s) => s.clone(),
            ExpressionValue::List(items) => {
                let items: Vec<String> = items.iter().map(|i| i.to_annotation_string()).collect();
                serde_json::to_string(&items).unwrap_or_default()
            }
        }
    }

    /// Truth value used by filters.
    pub fn is_truthy(&self) -> bool {
        match self {
            ExpressionValue::Null => false,
            ExpressionValue::Bool(b) => *b,
            ExpressionValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ExpressionValue::String(s) => !s.is_empty(),
            ExpressionValue::List(items) => !items.is_empty(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for ExpressionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_annotation_string())
    }
}

impl From<&str> for ExpressionValue {
    fn from(value: &str) -> Self {
        ExpressionValue::String(value.to_string())
    }
}

impl From<String> for ExpressionValue {
    fn from(value: String) -> Self {
        ExpressionValue::String(value)
    }
}

impl From<f64> for ExpressionValue {
    fn from(value: f64) -> Self {
        ExpressionValue::Number(value)
    }
}

impl From<i64> for ExpressionValue {
    fn from(value: i64) -> Self {
        ExpressionValue::Number(value as f64)
    }
}

impl From<usize> for ExpressionValue {
    fn from(value: usize) -> Self {
        ExpressionValue::Number(value as f64)
    }
}

impl From<bool> for ExpressionValue {
    fn from(value: bool) -> Self {
        ExpressionValue::Bool(value)
    }
}

/// Named inputs of one evaluation, in a stable order.
pub type Variables = IndexMap<String, ExpressionValue>;

/// Variables describing one input row.
pub fn row_variables(row: &DataRow, slot_name: &str, row_index: usize) -> Variables {
    let mut vars: Variables = row
        .annotations()
        .iter()
        .map(|a| (a.name().to_string(), ExpressionValue::from(a.value())))
        .collect();
    vars.insert(SLOT_NAME_VAR.to_string(), ExpressionValue::from(slot_name));
    vars.insert(ROW_INDEX_VAR.to_string(), ExpressionValue::from(row_index));
    vars
}

/// Failure of a single evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("unsupported result type: {0}")]
    UnsupportedType(String),
}

/// Pure, synchronous expression evaluation.
#[cfg_attr(test, mockall::automock)]
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, variables: &Variables) -> Result<ExpressionValue, EvaluationError>;

    /// Check that an expression compiles, without running it.
    fn validate(&self, _expression: &str) -> Result<(), EvaluationError> {
        Ok(())
    }
}

/// A compiled expression
#[derive(Clone)]
pub struct CompiledExpression {
    ast: Arc<AST>,
    source: String,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled expressions to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from source to compiled expression
    cache: HashMap<String, CompiledExpression>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub fn get(&self, source: &str) -> Option<CompiledExpression> {
        self.cache.get(source).cloned()
    }

    /// Get a cached expression or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        source: &str,
    ) -> Result<CompiledExpression, EvaluationError> {
        if let Some(compiled) = self.cache.get(source) {
            return Ok(compiled.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| EvaluationError::Compile(e.to_string()))?;

        let compiled = CompiledExpression {
            ast: Arc::new(ast),
            source: source.to_string(),
        };
        self.cache.insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;
