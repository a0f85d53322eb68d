//! Composite actions: a DAG of action batches driven through the queue
//! stage by stage.
//!
//! The nested [`ActionGraph`] is flattened into a petgraph `DiGraph` and
//! walked with an explicit worklist: a bounded set of in-flight batch
//! futures, each of which submits its actions, awaits every completion,
//! and only then unlocks its successors. No recursive task spawning.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::action::{Action, ActionKind, ProcessCtx, ProcessOutcome};
use crate::codec::Identity;
use crate::core::errors::{GridflowError, Result};

/// A batch of sibling actions plus the batches that follow it.
///
/// Every action in a batch must reach a terminal state before any batch
/// in `next` starts; sibling `next` batches run as parallel
/// continuations.
pub struct ActionGraph {
    pub actions: Vec<Action>,
    pub next: Vec<ActionGraph>,
}

impl ActionGraph {
    pub fn batch(actions: Vec<Action>) -> Self {
        Self {
            actions,
            next: Vec::new(),
        }
    }

    /// Append a continuation batch
    pub fn then(mut self, next: ActionGraph) -> Self {
        self.next.push(next);
        self
    }
}

struct FlatGraph {
    topology: DiGraph<usize, ()>,
    batches: Vec<Option<Vec<Action>>>,
    total: usize,
}

fn flatten(graph: ActionGraph) -> FlatGraph {
    let mut topology = DiGraph::new();
    let mut batches = Vec::new();
    let mut total = 0;
    let mut stack: Vec<(ActionGraph, Option<NodeIndex>)> = vec![(graph, None)];

    while let Some((node, parent)) = stack.pop() {
        total += node.actions.len();
        let ix = topology.add_node(batches.len());
        batches.push(Some(node.actions));
        if let Some(parent) = parent {
            topology.add_edge(parent, ix, ());
        }
        for next in node.next {
            stack.push((next, Some(ix)));
        }
    }

    FlatGraph {
        topology,
        batches,
        total,
    }
}

/// Builder for composite actions
pub struct MetaAction;

impl MetaAction {
    /// Build a synthetic parent action driving `graph`, with a generated id
    pub fn build(graph: ActionGraph) -> Result<Action> {
        Self::build_with_id(cuid2::create_id(), graph)
    }

    /// Build a synthetic parent action with a caller-chosen id.
    ///
    /// The parent's identity derives from the full set of leaf action
    /// ids, and it bypasses single-flight by construction so it never
    /// collides with the per-tile locks its own children take.
    pub fn build_with_id(id: impl Into<String>, graph: ActionGraph) -> Result<Action> {
        let id = id.into();
        let flat = flatten(graph);

        if flat.total == 0 {
            return Err(GridflowError::configuration(
                "meta-action graph has no actions",
            ));
        }
        if is_cyclic_directed(&flat.topology) {
            return Err(GridflowError::configuration("meta-action graph is cyclic"));
        }

        let leaf_ids: Vec<&str> = flat
            .batches
            .iter()
            .flatten()
            .flatten()
            .map(|action| action.id.as_str())
            .collect();
        let mut seen = HashSet::new();
        for leaf_id in &leaf_ids {
            if !seen.insert(*leaf_id) {
                return Err(GridflowError::action(
                    *leaf_id,
                    "duplicate leaf id in meta-action graph",
                ));
            }
        }
        let identity = Identity::from_action_ids(leaf_ids);

        let cell = Mutex::new(Some(flat));
        let action = Action::builder(id, ActionKind::Meta, identity)
            .ignore_concurrency()
            .process(move |ctx, _payload| {
                let taken = cell.lock().expect("meta graph lock poisoned").take();
                async move {
                    let Some(flat) = taken else {
                        anyhow::bail!("meta-action graph already consumed");
                    };
                    run_graph(ctx, flat).await
                }
            })
            .build();
        Ok(action)
    }
}

async fn run_graph(ctx: ProcessCtx, flat: FlatGraph) -> anyhow::Result<ProcessOutcome> {
    let FlatGraph {
        topology,
        mut batches,
        total,
    } = flat;
    debug!(
        "meta-action {}: driving {} batches, {} leaf actions",
        ctx.action.id,
        batches.len(),
        total
    );

    let settled = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let mut indegree: HashMap<NodeIndex, usize> = topology
        .node_indices()
        .map(|ix| {
            (
                ix,
                topology.neighbors_directed(ix, Direction::Incoming).count(),
            )
        })
        .collect();

    let mut inflight: FuturesUnordered<BoxFuture<'static, NodeIndex>> = FuturesUnordered::new();
    for ix in topology.node_indices() {
        if indegree[&ix] == 0 {
            let actions = batches[topology[ix]].take().unwrap_or_default();
            inflight.push(run_batch(
                ctx.clone(),
                actions,
                settled.clone(),
                failed.clone(),
                total,
                ix,
            ));
        }
    }

    while let Some(done_ix) = inflight.next().await {
        if ctx.cancel_requested() {
            // drain what is running, schedule nothing new
            continue;
        }
        for successor in topology.neighbors_directed(done_ix, Direction::Outgoing) {
            let remaining = indegree.get_mut(&successor).expect("successor tracked");
            *remaining -= 1;
            if *remaining == 0 {
                let actions = batches[topology[successor]].take().unwrap_or_default();
                inflight.push(run_batch(
                    ctx.clone(),
                    actions,
                    settled.clone(),
                    failed.clone(),
                    total,
                    successor,
                ));
            }
        }
    }

    if ctx.cancel_requested() && settled.load(Ordering::SeqCst) < total {
        return Ok(ProcessOutcome::Cancelled);
    }

    let failed_count = failed.load(Ordering::SeqCst);
    if failed_count > 0 {
        // the walk runs to completion regardless; observers saw each
        // leaf failure on the event stream
        warn!(
            "meta-action {}: {} of {} leaf actions failed",
            ctx.action.id, failed_count, total
        );
    }
    Ok(ProcessOutcome::Complete)
}

/// Submit one batch and await every member's terminal state
fn run_batch(
    ctx: ProcessCtx,
    actions: Vec<Action>,
    settled: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    total: usize,
    ix: NodeIndex,
) -> BoxFuture<'static, NodeIndex> {
    Box::pin(async move {
        let mut waits = Vec::new();
        let mut child_ids = Vec::new();
        for action in actions {
            let child_id = action.id.clone();
            let completion = action.completion();
            if ctx.queue.add(action) {
                child_ids.push(child_id);
                waits.push(completion);
            } else {
                warn!(
                    "meta-action {}: child {} rejected by the queue",
                    ctx.action.id, child_id
                );
                failed.fetch_add(1, Ordering::SeqCst);
                bump_progress(&ctx, &settled, total);
            }
        }
        if !child_ids.is_empty() {
            let _ = ctx.queue.add_children(&ctx.action.id, &child_ids);
        }

        for mut completion in waits {
            let outcome = completion.wait().await;
            if !outcome.is_success() {
                failed.fetch_add(1, Ordering::SeqCst);
            }
            bump_progress(&ctx, &settled, total);
        }
        ix
    })
}

fn bump_progress(ctx: &ProcessCtx, settled: &AtomicUsize, total: usize) {
    let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.action.set_progress(done as f64 / total as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionState;
    use crate::world::Coord;

    fn leaf(id: &str, x: i32) -> Action {
        Action::builder(
            id,
            ActionKind::Mine,
            Identity::from_coord(Coord::new(x, 0)),
        )
        .build()
    }

    #[test]
    fn test_empty_graph_is_rejected() {
        let err = MetaAction::build(ActionGraph::batch(vec![])).unwrap_err();
        assert!(matches!(err, GridflowError::Configuration { .. }));
    }

    #[test]
    fn test_duplicate_leaf_ids_rejected() {
        let graph = ActionGraph::batch(vec![leaf("mine:0,0", 0), leaf("mine:0,0", 1)]);
        let err = MetaAction::build(graph).unwrap_err();
        assert!(matches!(err, GridflowError::Action { .. }));
    }

    #[test]
    fn test_meta_identity_is_stable_across_batch_order() {
        let a = MetaAction::build_with_id(
            "meta-1",
            ActionGraph::batch(vec![leaf("mine:0,0", 0)])
                .then(ActionGraph::batch(vec![leaf("mine:1,0", 1)])),
        )
        .unwrap();
        let b = MetaAction::build_with_id(
            "meta-2",
            ActionGraph::batch(vec![leaf("mine:1,0", 1)])
                .then(ActionGraph::batch(vec![leaf("mine:0,0", 0)])),
        )
        .unwrap();

        assert_eq!(a.identity, b.identity);
        assert!(a.ignore_concurrency);
        assert_eq!(a.state(), ActionState::Created);
    }
}
