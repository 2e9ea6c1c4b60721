//! Configuration module for databatch
//!
//! This module handles engine configuration:
//! - Execution settings shared by every node run
//! - Named node configurations, each carrying its batching rules
//!
//! # Files
//!
//! Engine configurations are stored as TOML (`.toml`) or JSON (`.json`);
//! the format follows the file extension.
//!
//! ```toml
//! [execution]
//! failure_policy = "skip_batch"
//! worker_threads = 4
//!
//! [nodes.join_meta]
//! kind = "lookup_join"
//! data_slot = "Data"
//! lookup_slot = "Meta"
//!
//! [nodes.join_meta.batching]
//! join = "outer"
//!
//! [nodes.join_meta.batching.matching]
//! mode = "explicit"
//! columns = ["Sample"]
//! ```
//!
//! # Example
//!
//! ```ignore
//! use databatch::config::EngineConfig;
//! use databatch::scripting::RhaiEvaluator;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let node = config.build_node("join_meta", Arc::new(RhaiEvaluator::new()))?;
//! ```

pub mod settings;

pub use settings::*;

use crate::batch::BatchingConfig;
use crate::engine::{AnyNode, BuiltinNode};
use crate::error::{EngineError, EngineResult};
use crate::nodes::{
    AnnotateConfig, AnnotateNode, FilterConfig, FilterNode, LookupJoinConfig, LookupJoinNode,
    MergeConfig, MergeNode, SplitConfig, SplitNode,
};
use crate::scripting::ExpressionEvaluator;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Configuration file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Format for `path`; anything but `.json` is read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Configuration of one built-in node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    Annotate(AnnotateConfig),
    Filter(FilterConfig),
    Merge(MergeConfig),
    LookupJoin(LookupJoinConfig),
    Split(SplitConfig),
}

impl NodeConfig {
    /// Node kind as written in configuration files
    pub fn kind(&self) -> &'static str {
        match self {
            NodeConfig::Annotate(_) => "annotate",
            NodeConfig::Filter(_) => "filter",
            NodeConfig::Merge(_) => "merge",
            NodeConfig::LookupJoin(_) => "lookup_join",
            NodeConfig::Split(_) => "split",
        }
    }

    pub fn batching(&self) -> &BatchingConfig {
        match self {
            NodeConfig::Annotate(c) => &c.batching,
            NodeConfig::Filter(c) => &c.batching,
            NodeConfig::Merge(c) => &c.batching,
            NodeConfig::LookupJoin(c) => &c.batching,
            NodeConfig::Split(c) => &c.batching,
        }
    }

    /// Instantiate the node.
    pub fn build(&self, name: &str, evaluator: Arc<dyn ExpressionEvaluator>) -> EngineResult<AnyNode> {
        let node = match self {
            NodeConfig::Annotate(c) => BuiltinNode::Annotate(AnnotateNode::new(name, c.clone(), evaluator)?),
            NodeConfig::Filter(c) => BuiltinNode::Filter(FilterNode::new(name, c.clone(), evaluator)?),
            NodeConfig::Merge(c) => BuiltinNode::Merge(MergeNode::new(name, c.clone(), evaluator)?),
            NodeConfig::LookupJoin(c) => {
                BuiltinNode::LookupJoin(LookupJoinNode::new(name, c.clone(), evaluator)?)
            }
            NodeConfig::Split(c) => BuiltinNode::Split(SplitNode::new(name, c.clone(), evaluator)?),
        };
        Ok(AnyNode::from(node))
    }
}

/// Engine configuration: execution settings plus named nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionSettings,
    pub nodes: IndexMap<String, NodeConfig>,
}

impl EngineConfig {
    /// Load a configuration file (TOML or JSON by extension)
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let parsed: Result<Self, String> = match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| e.to_string()),
        };
        let config = parsed.map_err(|e| {
            EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        tracing::debug!("Loaded config {:?} with {} nodes", path, config.nodes.len());
        Ok(config)
    }

    /// Load a configuration file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration (TOML or JSON by extension)
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => self.to_toml()?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| EngineError::Serialization(format!("Failed to serialize config: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    pub fn from_toml(content: &str) -> EngineResult<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> EngineResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.get(name)
    }

    /// Instantiate the named node.
    pub fn build_node(&self, name: &str, evaluator: Arc<dyn ExpressionEvaluator>) -> EngineResult<AnyNode> {
        let config = self
            .node(name)
            .ok_or_else(|| EngineError::Config(format!("No node named '{}'", name)))?;
        config
            .build(name, evaluator)
            .map_err(|e| e.with_context(format!("node '{}'", name)))
    }

    /// Check every node, including its expressions.
    pub fn validate(&self, evaluator: Arc<dyn ExpressionEvaluator>) -> EngineResult<()> {
        if self.nodes.is_empty() {
            tracing::warn!("Config defines no nodes");
        }
        for name in self.nodes.keys() {
            self.build_node(name, Arc::clone(&evaluator))?;
        }
        Ok(())
    }
}
