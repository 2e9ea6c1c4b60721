//! Node execution driver.
//!
//! One call to [`NodeExecutor::execute`] runs a node over its input slots:
//!
//! ```text
//! Idle -> BuildingBatches -> (Running -> Committing)* -> Done
//!   any non-terminal state -> Errored
//!   BuildingBatches | Running | Committing -> Cancelled
//! ```
//!
//! Batches are built completely before the first one runs. Each batch stages
//! its output rows, and they are committed only after the node logic returns
//! successfully, so a failing batch never leaves partial output behind.
//! Output of batches committed before a fatal failure is kept.
//!
//! Parallel nodes run their batches on scoped worker threads fed through a
//! bounded channel. Rows are then committed in completion order.

use crate::batch::{Batch, BatchBuilder, InputBinding};
use crate::config::{ExecutionSettings, FailurePolicy};
use crate::engine::node::{BatchNode, NodeContext};
use crate::engine::output::OutputSlots;
use crate::error::{EngineError, EngineResult};
use crate::slot::{DataSlot, SlotDescriptor};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation flag, shared between the caller and the executor.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of one node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    BuildingBatches,
    Running { batch: usize },
    Committing { batch: usize },
    Done,
    Errored,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Done | ExecutionState::Errored | ExecutionState::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(&self, next: &ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, next) {
            (from, Errored) => !from.is_terminal(),
            (Idle, BuildingBatches) => true,
            (BuildingBatches, Running { .. } | Done | Cancelled) => true,
            (Running { batch: a }, Committing { batch: b }) => a == b,
            // A skipped batch moves straight on
            (Running { batch: a }, Running { batch: b }) => b > a,
            (Running { .. }, Done | Cancelled) => true,
            (Committing { batch: a }, Running { batch: b }) => b > a,
            (Committing { .. }, Done | Cancelled) => true,
            _ => false,
        }
    }
}

/// Final result of an execution.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Done,
    Errored(EngineError),
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, ExecutionOutcome::Done)
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            ExecutionOutcome::Errored(e) => Some(e),
            _ => None,
        }
    }

    pub fn state(&self) -> ExecutionState {
        match self {
            ExecutionOutcome::Done => ExecutionState::Done,
            ExecutionOutcome::Errored(_) => ExecutionState::Errored,
            ExecutionOutcome::Cancelled => ExecutionState::Cancelled,
        }
    }
}

/// A batch whose failure was tolerated.
#[derive(Debug)]
pub struct SkippedBatch {
    pub index: usize,
    pub key: String,
    pub error: EngineError,
}

/// Everything one execution produced.
#[derive(Debug)]
pub struct ExecutionReport {
    pub node: String,
    pub outcome: ExecutionOutcome,
    /// Output slots in declaration order, holding every committed row.
    pub outputs: Vec<DataSlot>,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub dropped_groups: usize,
    pub skipped: Vec<SkippedBatch>,
    /// States visited. Per-batch states are only recorded for sequential runs.
    pub states: Vec<ExecutionState>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_done()
    }

    pub fn output(&self, name: &str) -> Option<&DataSlot> {
        self.outputs.iter().find(|s| s.name() == name)
    }

    /// The output slots, or the error that stopped the execution.
    pub fn into_result(self) -> EngineResult<Vec<DataSlot>> {
        match self.outcome {
            ExecutionOutcome::Done | ExecutionOutcome::Cancelled => Ok(self.outputs),
            ExecutionOutcome::Errored(e) => Err(e.with_context(format!("node '{}'", self.node))),
        }
    }
}

enum BatchResult {
    Committed,
    Skipped(SkippedBatch),
    Fatal(EngineError),
}

/// Runs nodes over their input slots.
#[derive(Debug, Clone, Default)]
pub struct NodeExecutor {
    settings: ExecutionSettings,
    cancellation: CancellationToken,
}

impl NodeExecutor {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self {
            settings,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Run `node` over `inputs`, matched to its input slots by name.
    pub fn execute(&self, node: &dyn BatchNode, inputs: &[DataSlot]) -> ExecutionReport {
        let outputs = OutputSlots::new(
            node.slots()
                .iter()
                .filter(|d| d.is_output())
                .map(|d| d.name().to_string()),
        );
        let mut run = Run::new(node.name());
        run.transition(ExecutionState::BuildingBatches);

        let descriptors: Vec<&SlotDescriptor> = node.slots().iter().filter(|d| d.is_input()).collect();
        let placeholders: Vec<DataSlot> = descriptors.iter().map(|d| DataSlot::new(d.name())).collect();
        let outcome = match bind_inputs(&descriptors, &placeholders, inputs) {
            Ok(bindings) => self.run_bound(node, &bindings, &outputs, &mut run),
            Err(e) => ExecutionOutcome::Errored(e),
        };

        run.finish(outcome, outputs)
    }

    fn run_bound(
        &self,
        node: &dyn BatchNode,
        bindings: &[InputBinding<'_>],
        outputs: &OutputSlots,
        run: &mut Run,
    ) -> ExecutionOutcome {
        let plan = BatchBuilder::new(node.batching()).and_then(|builder| {
            let builder = match node.evaluator() {
                Some(evaluator) => builder.with_evaluator(evaluator),
                None => builder,
            };
            builder.build(bindings)
        });
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("Node '{}' failed to build batches: {}", node.name(), e);
                return ExecutionOutcome::Errored(e);
            }
        };

        run.batches_total = plan.len();
        run.dropped_groups = plan.dropped_groups;
        tracing::info!(
            "Node '{}' running {} batches ({} groups dropped)",
            node.name(),
            plan.len(),
            plan.dropped_groups
        );

        let ctx = NodeContext {
            node_name: node.name(),
            batch_count: plan.len(),
            cancellation: &self.cancellation,
        };

        if self.settings.runs_parallel(node.parallel()) && plan.len() > 1 {
            self.run_parallel(node, plan.batches, &ctx, outputs, run)
        } else {
            self.run_sequential(node, plan.batches, &ctx, outputs, run)
        }
    }

    fn run_sequential(
        &self,
        node: &dyn BatchNode,
        batches: Vec<Batch<'_>>,
        ctx: &NodeContext<'_>,
        outputs: &OutputSlots,
        run: &mut Run,
    ) -> ExecutionOutcome {
        for mut batch in batches {
            if self.cancellation.is_cancelled() {
                tracing::info!("Node '{}' cancelled before batch {}", node.name(), batch.index());
                return ExecutionOutcome::Cancelled;
            }

            let index = batch.index();
            run.transition(ExecutionState::Running { batch: index });
            let result = match node.run_batch(&mut batch, ctx) {
                Ok(()) => {
                    run.transition(ExecutionState::Committing { batch: index });
                    commit(&mut batch, outputs)
                }
                Err(e) => self.classify_failure(node, &batch, e),
            };

            match result {
                BatchResult::Committed => run.batches_completed += 1,
                BatchResult::Skipped(skipped) => run.skipped.push(skipped),
                BatchResult::Fatal(e) => return ExecutionOutcome::Errored(e),
            }
        }
        ExecutionOutcome::Done
    }

    fn run_parallel(
        &self,
        node: &dyn BatchNode,
        batches: Vec<Batch<'_>>,
        ctx: &NodeContext<'_>,
        outputs: &OutputSlots,
        run: &mut Run,
    ) -> ExecutionOutcome {
        let total = batches.len();
        let workers = self.settings.effective_workers().min(total);
        tracing::debug!("Node '{}' using {} workers", node.name(), workers);

        let abort = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);
        let fatal: Mutex<Option<EngineError>> = Mutex::new(None);
        let skipped: Mutex<Vec<SkippedBatch>> = Mutex::new(Vec::new());
        let (tx, rx) = crossbeam_channel::bounded::<Batch<'_>>(workers * 2);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let (abort, completed, fatal, skipped) = (&abort, &completed, &fatal, &skipped);
                scope.spawn(move || {
                    for mut batch in rx.iter() {
                        if abort.load(Ordering::SeqCst) || self.cancellation.is_cancelled() {
                            continue;
                        }
                        let result = match node.run_batch(&mut batch, ctx) {
                            Ok(()) => commit(&mut batch, outputs),
                            Err(e) => self.classify_failure(node, &batch, e),
                        };
                        match result {
                            BatchResult::Committed => {
                                completed.fetch_add(1, Ordering::SeqCst);
                            }
                            BatchResult::Skipped(s) => {
                                if let Ok(mut list) = skipped.lock() {
                                    list.push(s);
                                }
                            }
                            BatchResult::Fatal(e) => {
                                abort.store(true, Ordering::SeqCst);
                                if let Ok(mut slot) = fatal.lock() {
                                    slot.get_or_insert(e);
                                }
                            }
                        }
                    }
                });
            }
            drop(rx);

            for batch in batches {
                if abort.load(Ordering::SeqCst) || self.cancellation.is_cancelled() {
                    break;
                }
                if tx.send(batch).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        run.batches_completed = completed.load(Ordering::SeqCst);
        let mut skipped = skipped
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        skipped.sort_by_key(|s| s.index);
        run.skipped = skipped;

        let fatal = fatal
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(e) = fatal {
            return ExecutionOutcome::Errored(e);
        }
        if self.cancellation.is_cancelled() && run.batches_completed + run.skipped.len() < total {
            return ExecutionOutcome::Cancelled;
        }
        ExecutionOutcome::Done
    }

    fn classify_failure(&self, node: &dyn BatchNode, batch: &Batch<'_>, error: EngineError) -> BatchResult {
        if error.is_always_fatal() {
            return BatchResult::Fatal(error);
        }
        if error.is_batch_scoped() || self.settings.failure_policy == FailurePolicy::SkipBatch {
            tracing::warn!(
                "Node '{}' skipped batch {} {}: {}",
                node.name(),
                batch.index(),
                batch.key_label(),
                error
            );
            return BatchResult::Skipped(SkippedBatch {
                index: batch.index(),
                key: batch.key_label().to_string(),
                error,
            });
        }
        BatchResult::Fatal(error)
    }
}

fn commit(batch: &mut Batch<'_>, outputs: &OutputSlots) -> BatchResult {
    let (rows, annotations) = batch.take_staged();
    match outputs.commit_with(rows, annotations) {
        Ok(_) => BatchResult::Committed,
        Err(e) => BatchResult::Fatal(e),
    }
}

fn bind_inputs<'a>(
    descriptors: &[&'a SlotDescriptor],
    placeholders: &'a [DataSlot],
    inputs: &'a [DataSlot],
) -> EngineResult<Vec<InputBinding<'a>>> {
    if let Some(undeclared) = inputs
        .iter()
        .find(|slot| !descriptors.iter().any(|d| d.name() == slot.name()))
    {
        return Err(EngineError::UnknownInputSlot(undeclared.name().to_string()));
    }

    descriptors
        .iter()
        .zip(placeholders)
        .map(|(&descriptor, empty)| {
            match inputs.iter().find(|slot| slot.name() == descriptor.name()) {
                Some(slot) => Ok(InputBinding::new(descriptor, slot)),
                None if descriptor.required => {
                    Err(EngineError::UnknownInputSlot(descriptor.name().to_string())
                        .with_context("required input slot not supplied"))
                }
                None => Ok(InputBinding::new(descriptor, empty)),
            }
        })
        .collect()
}

/// Bookkeeping of one execution.
struct Run {
    node: String,
    states: Vec<ExecutionState>,
    batches_total: usize,
    batches_completed: usize,
    dropped_groups: usize,
    skipped: Vec<SkippedBatch>,
}

impl Run {
    fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            states: vec![ExecutionState::Idle],
            batches_total: 0,
            batches_completed: 0,
            dropped_groups: 0,
            skipped: Vec::new(),
        }
    }

    fn current(&self) -> ExecutionState {
        self.states.last().copied().unwrap_or(ExecutionState::Idle)
    }

    fn transition(&mut self, next: ExecutionState) {
        debug_assert!(
            self.current().can_transition_to(&next),
            "illegal transition {:?} -> {:?}",
            self.current(),
            next
        );
        tracing::trace!("Node '{}': {:?} -> {:?}", self.node, self.current(), next);
        self.states.push(next);
    }

    fn finish(mut self, outcome: ExecutionOutcome, outputs: OutputSlots) -> ExecutionReport {
        let (outcome, outputs) = match outputs.into_slots() {
            Ok(slots) => (outcome, slots),
            Err(e) => (ExecutionOutcome::Errored(e), Vec::new()),
        };
        self.transition(outcome.state());

        match &outcome {
            ExecutionOutcome::Done => tracing::info!(
                "Node '{}' done: {}/{} batches committed, {} skipped",
                self.node,
                self.batches_completed,
                self.batches_total,
                self.skipped.len()
            ),
            ExecutionOutcome::Errored(e) => {
                tracing::error!("Node '{}' failed: {}", self.node, e)
            }
            ExecutionOutcome::Cancelled => tracing::info!(
                "Node '{}' cancelled after {} of {} batches",
                self.node,
                self.batches_completed,
                self.batches_total
            ),
        }

        ExecutionReport {
            node: self.node,
            outcome,
            outputs,
            batches_total: self.batches_total,
            batches_completed: self.batches_completed,
            dropped_groups: self.dropped_groups,
            skipped: self.skipped,
            states: self.states,
        }
    }
}
