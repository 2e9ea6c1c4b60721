//! Integration tests for node execution
//!
//! These tests drive nodes through `NodeExecutor`:
//! - Chaining built-in nodes, feeding outputs into the next node
//! - Plugin nodes implementing `BatchNode` directly
//! - Failure policies, cancellation and parallel execution
//! - Re-annotating committed output rows from node logic

mod common;

use common::builders::{RowBuilder, SlotBuilder};
use common::{column, payloads};
use databatch::batch::{Batch, BatchingConfig, RowSelector};
use databatch::config::{ExecutionSettings, FailurePolicy};
use databatch::engine::{
    AnyNode, BatchNode, CancellationToken, ExecutionOutcome, ExecutionState, NodeContext,
    NodeExecutor,
};
use databatch::nodes::{AnnotateConfig, AnnotateNode, LookupJoinConfig, LookupJoinNode, SplitConfig, SplitNode};
use databatch::scripting::{ExpressionEvaluator, RhaiEvaluator};
use databatch::slot::SlotDescriptor;
use databatch::{AnnotationSet, DataSlot, EngineError, EngineResult, MergeStrategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn evaluator() -> Arc<dyn ExpressionEvaluator> {
    Arc::new(RhaiEvaluator::new())
}

/// Renames slot `from` to `to`, keeping its rows
fn rename(slot: &DataSlot, to: &str) -> DataSlot {
    DataSlot::with_rows(to, slot.rows().to_vec())
}

#[test]
fn test_annotate_join_split_chain() {
    let wells = SlotBuilder::new("Input")
        .keyed("w1", "Well", "A-01")
        .keyed("w2", "Well", "B-01")
        .keyed("w3", "Well", "C-01")
        .build();
    let layout = SlotBuilder::new("Lookup")
        .row(RowBuilder::new("layout-A").annotation("Sample", "A").annotation("Kind", "Control"))
        .row(RowBuilder::new("layout-B").annotation("Sample", "B").annotation("Kind", "Treated"))
        .build();

    let annotate = AnnotateNode::new(
        "sample",
        AnnotateConfig {
            name_expression: r#""Sample""#.to_string(),
            value_expression: r#"before(Well, "-")"#.to_string(),
            ..AnnotateConfig::default()
        },
        evaluator(),
    )
    .unwrap();
    let join = LookupJoinNode::new(
        "layout",
        LookupJoinConfig {
            batching: BatchingConfig::default().with_explicit_columns(["Sample"]),
            ..LookupJoinConfig::default()
        },
        evaluator(),
    )
    .unwrap();
    let split = SplitNode::new(
        "by_kind",
        SplitConfig {
            annotation: "Kind".to_string(),
            outputs: vec!["Control".to_string(), "Treated".to_string()],
            ..SplitConfig::default()
        },
        evaluator(),
    )
    .unwrap();

    let executor = NodeExecutor::default();

    let annotated = executor.execute(&annotate, &[wells]).into_result().unwrap();
    let data = rename(&annotated[0], "Data");
    assert_eq!(column(&data, "Sample"), vec![Some("A".into()), Some("B".into()), Some("C".into())]);

    let joined = executor.execute(&join, &[data, layout]);
    assert_eq!(joined.dropped_groups, 1);
    let joined = joined.into_result().unwrap();
    let input = rename(&joined[0], "Input");
    assert_eq!(payloads(&input), vec!["w1", "w2"]);

    let report = executor.execute(&split, &[input]);
    assert!(report.is_success());
    assert_eq!(payloads(report.output("Control").unwrap()), vec!["w1"]);
    assert_eq!(payloads(report.output("Treated").unwrap()), vec!["w2"]);
    assert!(report.output("Other").unwrap().is_empty());
}

/// Plugin node counting its batches, failing on a chosen payload and
/// optionally cancelling the run after a number of calls
struct CountingNode {
    slots: Vec<SlotDescriptor>,
    batching: BatchingConfig,
    calls: AtomicUsize,
    fail_on: Option<&'static str>,
    cancel_after: Option<usize>,
}

impl CountingNode {
    fn new(fail_on: Option<&'static str>) -> Self {
        Self {
            slots: vec![SlotDescriptor::input("Input"), SlotDescriptor::output("Output")],
            batching: BatchingConfig::per_row(),
            calls: AtomicUsize::new(0),
            fail_on,
            cancel_after: None,
        }
    }

    fn cancelling_after(calls: usize) -> Self {
        Self {
            cancel_after: Some(calls),
            ..Self::new(None)
        }
    }
}

impl BatchNode for CountingNode {
    fn name(&self) -> &str {
        "counting"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    fn batching(&self) -> &BatchingConfig {
        &self.batching
    }

    fn parallel(&self) -> bool {
        true
    }

    fn run_batch(&self, batch: &mut Batch<'_>, ctx: &NodeContext<'_>) -> EngineResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(call) == self.cancel_after {
            ctx.cancellation.cancel();
        }
        let data = batch.input_data("Input")?.clone();
        if Some(data.to_annotation_string().as_str()) == self.fail_on {
            return Err(EngineError::node(ctx.node_name, "refused payload"));
        }
        let extra = AnnotationSet::from_pairs([("Seen", "yes")])?;
        batch.add_output_data("Output", data, &extra, MergeStrategy::OverwriteExisting);
        Ok(())
    }
}

fn numbered(count: usize) -> DataSlot {
    let mut builder = SlotBuilder::new("Input");
    for i in 0..count {
        builder = builder.keyed(&format!("p{}", i), "Index", &i.to_string());
    }
    builder.build()
}

#[test]
fn test_plugin_node_through_any_node() {
    let node = AnyNode::Plugin(Box::new(CountingNode::new(None)));
    let report = NodeExecutor::default().execute(&node, &[numbered(3)]);

    assert!(report.is_success());
    assert_eq!(report.batches_total, 3);
    assert_eq!(report.batches_completed, 3);
    let out = report.output("Output").unwrap();
    assert_eq!(payloads(out), vec!["p0", "p1", "p2"]);
    assert_eq!(column(out, "Seen"), vec![Some("yes".to_string()); 3]);
    assert_eq!(report.states.first(), Some(&ExecutionState::Idle));
    assert_eq!(report.states.last(), Some(&ExecutionState::Done));
}

#[test]
fn test_fatal_policy_stops_and_discards_failed_batch() {
    let node = CountingNode::new(Some("p1"));
    let report = NodeExecutor::default().execute(&node, &[numbered(4)]);

    match &report.outcome {
        ExecutionOutcome::Errored(e) => assert!(matches!(e, EngineError::Node { .. })),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(node.calls.load(Ordering::SeqCst), 2);
    assert_eq!(payloads(report.output("Output").unwrap()), vec!["p0"]);
    assert!(report.into_result().is_err());
}

#[test]
fn test_skip_policy_continues() {
    let node = CountingNode::new(Some("p1"));
    let executor = NodeExecutor::new(ExecutionSettings::default().with_failure_policy(FailurePolicy::SkipBatch));
    let report = executor.execute(&node, &[numbered(4)]);

    assert!(report.is_success());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 1);
    assert_eq!(payloads(report.output("Output").unwrap()), vec!["p0", "p2", "p3"]);
}

#[test]
fn test_cancelled_before_start() {
    let token = CancellationToken::new();
    token.cancel();
    let node = CountingNode::new(None);
    let report = NodeExecutor::default()
        .with_cancellation(token)
        .execute(&node, &[numbered(3)]);

    assert!(matches!(report.outcome, ExecutionOutcome::Cancelled));
    assert_eq!(node.calls.load(Ordering::SeqCst), 0);
    assert!(report.output("Output").unwrap().is_empty());
}

#[test]
fn test_cancelled_mid_run_sequential() {
    let node = CountingNode::cancelling_after(2);
    let settings = ExecutionSettings::default().with_parallel(Some(false));
    let report = NodeExecutor::new(settings).execute(&node, &[numbered(5)]);

    assert!(matches!(report.outcome, ExecutionOutcome::Cancelled));
    assert_eq!(node.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.batches_total, 5);
    assert_eq!(report.batches_completed, 2);
    assert_eq!(payloads(report.output("Output").unwrap()), vec!["p0", "p1"]);
    assert_eq!(report.states.last(), Some(&ExecutionState::Cancelled));
}

#[test]
fn test_cancelled_mid_run_parallel() {
    let node = CountingNode::cancelling_after(1);
    let settings = ExecutionSettings::default()
        .with_worker_threads(2)
        .with_parallel(Some(true));
    let report = NodeExecutor::new(settings).execute(&node, &[numbered(50)]);

    assert!(matches!(report.outcome, ExecutionOutcome::Cancelled));
    assert!(report.batches_completed < report.batches_total);
    assert!(node.calls.load(Ordering::SeqCst) < 50);
    assert_eq!(report.output("Output").unwrap().len(), report.batches_completed);
    assert_eq!(report.states.last(), Some(&ExecutionState::Cancelled));
}

#[test]
fn test_parallel_execution_commits_every_batch() {
    let node = CountingNode::new(None);
    let settings = ExecutionSettings::default().with_worker_threads(4);
    let report = NodeExecutor::new(settings).execute(&node, &[numbered(100)]);

    assert!(report.is_success());
    assert_eq!(report.batches_completed, 100);
    let mut out = payloads(report.output("Output").unwrap());
    out.sort_by_key(|p| p[1..].parse::<usize>().unwrap_or(usize::MAX));
    let expected: Vec<String> = (0..100).map(|i| format!("p{}", i)).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_parallel_fatal_reports_error() {
    let node = CountingNode::new(Some("p7"));
    let settings = ExecutionSettings::default().with_worker_threads(3);
    let report = NodeExecutor::new(settings).execute(&node, &[numbered(20)]);

    assert!(matches!(report.outcome, ExecutionOutcome::Errored(EngineError::Node { .. })));
    let out = payloads(report.output("Output").unwrap());
    assert!(!out.contains(&"p7".to_string()));
}

/// Plugin node passing rows through and marking every output row that
/// shares the current row's sample
struct MarkingNode {
    slots: Vec<SlotDescriptor>,
    batching: BatchingConfig,
    selector: fn(&str) -> RowSelector,
}

impl MarkingNode {
    fn new(selector: fn(&str) -> RowSelector) -> Self {
        Self {
            slots: vec![SlotDescriptor::input("Input"), SlotDescriptor::output("Output")],
            batching: BatchingConfig::per_row(),
            selector,
        }
    }
}

impl BatchNode for MarkingNode {
    fn name(&self) -> &str {
        "marking"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    fn batching(&self) -> &BatchingConfig {
        &self.batching
    }

    fn run_batch(&self, batch: &mut Batch<'_>, _ctx: &NodeContext<'_>) -> EngineResult<()> {
        let data = batch.input_data("Input")?.clone();
        let sample = batch
            .merged_annotations()
            .value("Sample")
            .unwrap_or_default()
            .to_string();
        batch.add_output_data("Output", data, &AnnotationSet::new(), MergeStrategy::Merge);
        batch.annotate_output(
            "Output",
            (self.selector)(&sample),
            AnnotationSet::from_pairs([("Checked", "yes")])?,
            MergeStrategy::OverwriteExisting,
        );
        Ok(())
    }
}

fn samples() -> DataSlot {
    SlotBuilder::new("Input")
        .keyed("p0", "Sample", "A")
        .keyed("p1", "Sample", "A")
        .keyed("p2", "Sample", "B")
        .build()
}

#[test]
fn test_reannotation_from_node_is_idempotent() {
    let node = MarkingNode::new(|sample| RowSelector::Annotated {
        name: "Sample".to_string(),
        value: sample.to_string(),
    });
    let report = NodeExecutor::default().execute(&node, &[samples()]);

    assert!(report.is_success());
    let out = report.output("Output").unwrap();
    assert_eq!(payloads(out), vec!["p0", "p1", "p2"]);
    // p0 is marked by both Sample=A batches and keeps a single value
    assert_eq!(column(out, "Checked"), vec![Some("yes".to_string()); 3]);
    let expected = AnnotationSet::from_pairs([("Sample", "A"), ("Checked", "yes")]).unwrap();
    assert_eq!(out.row(0).unwrap().annotations(), out.row(1).unwrap().annotations());
    assert_eq!(out.row(0).unwrap().annotations(), &expected);
}

#[test]
fn test_reannotation_out_of_range_commits_nothing() {
    let node = MarkingNode::new(|_| RowSelector::Index(5));
    let report = NodeExecutor::default().execute(&node, &[samples()]);

    assert!(matches!(
        report.outcome,
        ExecutionOutcome::Errored(EngineError::RowOutOfRange { row: 5, .. })
    ));
    assert!(report.output("Output").unwrap().is_empty());
}
