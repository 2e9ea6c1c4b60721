//! Rhai Expression Engine Implementation
//!
//! ## String Functions
//!
//! - `upper(s)` / `lower(s)` - Change case
//! - `strip(s)` - Remove surrounding whitespace
//! - `before(s, sep)` - Text before the first `sep` (all of `s` if absent)
//! - `after(s, sep)` - Text after the first `sep` (empty if absent)
//! - `to_number(s)` - Parse a number, `()` if it does not parse
//! - `is_blank(s)` - True for empty or whitespace-only strings
//!
//! Rhai's own string methods (`contains`, `starts_with`, `len`, ...) and
//! numeric functions (`abs`, `floor`, `round`, `to_int`, `**`, ...) are
//! available as well.

use crate::scripting::{
    CompiledExpression, EvaluationError, ExpressionEvaluator, ExpressionValue, ScriptCache,
    SharedScriptCache, Variables,
};
use rhai::{Array, Dynamic, Engine, Map, Scope};
use std::sync::{Arc, RwLock};

/// Name of the map variable holding every input variable.
const VARS_MAP: &str = "vars";

/// Rhai-backed expression evaluator
pub struct RhaiEvaluator {
    /// The Rhai engine instance
    engine: Engine,
    /// Cache of compiled expressions
    cache: SharedScriptCache,
}

impl RhaiEvaluator {
    /// Create an evaluator with default configuration
    pub fn new() -> Self {
        Self::with_cache(Arc::new(RwLock::new(ScriptCache::new())))
    }

    /// Create an evaluator with a shared cache
    pub fn with_cache(cache: SharedScriptCache) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine, cache }
    }

    /// Configure the Rhai engine with built-in functions and safety limits
    fn configure_engine(engine: &mut Engine) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);

        // ===== String Functions =====

        engine.register_fn("upper", |s: &str| s.to_uppercase());
        engine.register_fn("lower", |s: &str| s.to_lowercase());
        engine.register_fn("strip", |s: &str| s.trim().to_string());
        engine.register_fn("is_blank", |s: &str| s.trim().is_empty());

        engine.register_fn("before", |s: &str, sep: &str| -> String {
            match s.find(sep) {
                Some(pos) if !sep.is_empty() => s[..pos].to_string(),
                _ => s.to_string(),
            }
        });

        engine.register_fn("after", |s: &str, sep: &str| -> String {
            match s.find(sep) {
                Some(pos) if !sep.is_empty() => s[pos + sep.len()..].to_string(),
                _ => String::new(),
            }
        });

        engine.register_fn("to_number", |s: &str| -> Dynamic {
            s.trim()
                .parse::<f64>()
                .map(Dynamic::from_float)
                .unwrap_or(Dynamic::UNIT)
        });
    }

    /// Compile an expression and cache it
    pub fn compile(&self, source: &str) -> Result<CompiledExpression, EvaluationError> {
        {
            let cache = self.cache.read().map_err(|e| {
                EvaluationError::Runtime(format!("Failed to acquire cache lock: {}", e))
            })?;
            if let Some(compiled) = cache.get(source) {
                return Ok(compiled);
            }
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|e| EvaluationError::Runtime(format!("Failed to acquire cache lock: {}", e)))?;
        cache.get_or_compile(&self.engine, source)
    }

    /// Run a compiled expression
    pub fn execute(
        &self,
        compiled: &CompiledExpression,
        variables: &Variables,
    ) -> Result<ExpressionValue, EvaluationError> {
        let mut scope = Scope::new();
        let mut all = Map::new();
        for (name, value) in variables {
            let value = to_dynamic(value);
            if is_identifier(name) {
                scope.push_dynamic(name.as_str(), value.clone());
            }
            all.insert(name.as_str().into(), value);
        }
        scope.push_constant(VARS_MAP, all);

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, compiled.ast())
            .map_err(|e| EvaluationError::Runtime(e.to_string()))?;
        from_dynamic(result)
    }

    /// Clear the expression cache
    pub fn clear_cache(&self) -> Result<(), EvaluationError> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| EvaluationError::Runtime(format!("Failed to acquire cache lock: {}", e)))?;
        cache.clear();
        Ok(())
    }

    /// Get a reference to the shared cache
    pub fn cache(&self) -> &SharedScriptCache {
        &self.cache
    }
}

impl ExpressionEvaluator for RhaiEvaluator {
    fn evaluate(&self, expression: &str, variables: &Variables) -> Result<ExpressionValue, EvaluationError> {
        let compiled = self.compile(expression)?;
        self.execute(&compiled, variables)
    }

    fn validate(&self, expression: &str) -> Result<(), EvaluationError> {
        self.engine
            .compile(expression)
            .map(|_| ())
            .map_err(|e| EvaluationError::Compile(e.to_string()))
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RhaiEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiEvaluator")
            .field("cache_size", &self.cache.read().map(|c| c.len()).ok())
            .finish()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && name != VARS_MAP
}

fn to_dynamic(value: &ExpressionValue) -> Dynamic {
    match value {
        ExpressionValue::Null => Dynamic::UNIT,
        ExpressionValue::Bool(b) => Dynamic::from_bool(*b),
        ExpressionValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
            Dynamic::from_int(*n as i64)
        }
        ExpressionValue::Number(n) => Dynamic::from_float(*n),
        ExpressionValue::String(s) => Dynamic::from(s.clone()),
        ExpressionValue::List(items) => {
            let array: Array = items.iter().map(to_dynamic).collect();
            Dynamic::from_array(array)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Result<ExpressionValue, EvaluationError> {
    if value.is_unit() {
        return Ok(ExpressionValue::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(ExpressionValue::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(ExpressionValue::Number(i as f64));
    }
    if let Ok(f) = value.as_float() {
        return Ok(ExpressionValue::Number(f));
    }
    if let Ok(c) = value.as_char() {
        return Ok(ExpressionValue::String(c.to_string()));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(ExpressionValue::String)
            .map_err(|t| EvaluationError::UnsupportedType(t.to_string()));
    }
    let type_name = value.type_name().to_string();
    match value.try_cast::<Array>() {
        Some(items) => items
            .into_iter()
            .map(from_dynamic)
            .collect::<Result<Vec<_>, _>>()
            .map(ExpressionValue::List),
        None => Err(EvaluationError::UnsupportedType(type_name)),
    }
}
