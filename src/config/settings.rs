//! Execution settings shared by every node run
//!
//! These settings control how the executor treats failing batches and how
//! much parallelism it may use. They are independent of any single node's
//! batching configuration.

use serde::{Deserialize, Serialize};

/// What a failing batch does to the rest of the node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failing batch.
    #[default]
    Fatal,
    /// Log the failure, discard the batch's output and continue.
    SkipBatch,
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Failure handling for batch errors
    pub failure_policy: FailurePolicy,

    /// Worker threads for parallel nodes (0 = available parallelism)
    pub worker_threads: usize,

    /// Force parallel (`true`) or sequential (`false`) execution for every
    /// node; unset leaves the choice to the node
    pub parallel: Option<bool>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Fatal,
            worker_threads: 0,
            parallel: None,
        }
    }
}

impl ExecutionSettings {
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_parallel(mut self, parallel: Option<bool>) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of worker threads to use, at least one.
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Whether a node asking for `node_parallel` runs in parallel.
    pub fn runs_parallel(&self, node_parallel: bool) -> bool {
        self.parallel.unwrap_or(node_parallel) && self.effective_workers() > 1
    }
}
