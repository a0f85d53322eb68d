//! MetaAction scenarios: staged fan-out, progress aggregation, and the
//! walk-past-failures completion policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

use gridflow::{
    Action, ActionGraph, ActionKind, ActionQueue, ActionState, Coord, Identity, MetaAction,
    ProcessOutcome, QueueConfig, StaticBackend, StaticOutcome, WorldState,
};

fn fast_queue() -> Arc<ActionQueue> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ActionQueue::new(
        QueueConfig {
            poll_interval_ms: 10,
            poll_jitter: 0.0,
            grace_period_ms: 500,
            event_capacity: 256,
        },
        Arc::new(WorldState::new()),
        Arc::new(StaticBackend::new(StaticOutcome::Confirm)),
    )
    .unwrap()
}

fn gated_leaf(id: &str, x: i32, gate: Arc<Notify>) -> Action {
    Action::builder(id, ActionKind::Mine, Identity::from_coord(Coord::new(x, 0)))
        .process(move |_, _| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(ProcessOutcome::Complete)
            }
        })
        .build()
}

#[tokio::test]
async fn test_fan_out_waits_for_the_whole_batch() {
    let queue = fast_queue();

    let a_gate = Arc::new(Notify::new());
    let b_gate = Arc::new(Notify::new());
    let c_started = Arc::new(AtomicBool::new(false));
    let d_started = Arc::new(AtomicBool::new(false));
    let c_notify = Arc::new(Notify::new());
    let d_notify = Arc::new(Notify::new());

    // C and D each wait for the other to start: they can only complete
    // if the two continuations really run concurrently
    let c = {
        let started = c_started.clone();
        let mine = c_notify.clone();
        let other = d_notify.clone();
        Action::builder(
            "wall:2,0",
            ActionKind::Wall,
            Identity::from_coord(Coord::new(2, 0)),
        )
        .process(move |_, _| {
            let started = started.clone();
            let mine = mine.clone();
            let other = other.clone();
            async move {
                started.store(true, Ordering::SeqCst);
                mine.notify_one();
                other.notified().await;
                Ok(ProcessOutcome::Complete)
            }
        })
        .build()
    };
    let d = {
        let started = d_started.clone();
        let mine = d_notify.clone();
        let other = c_notify.clone();
        Action::builder(
            "wall:3,0",
            ActionKind::Wall,
            Identity::from_coord(Coord::new(3, 0)),
        )
        .process(move |_, _| {
            let started = started.clone();
            let mine = mine.clone();
            let other = other.clone();
            async move {
                started.store(true, Ordering::SeqCst);
                mine.notify_one();
                other.notified().await;
                Ok(ProcessOutcome::Complete)
            }
        })
        .build()
    };

    let graph = ActionGraph {
        actions: vec![
            gated_leaf("mine:0,0", 0, a_gate.clone()),
            gated_leaf("mine:1,0", 1, b_gate.clone()),
        ],
        next: vec![ActionGraph::batch(vec![c]), ActionGraph::batch(vec![d])],
    };

    let meta = MetaAction::build_with_id("meta:expand", graph).unwrap();
    let mut completion = meta.completion();
    assert!(queue.add(meta));

    // neither continuation may start while the first batch is pending
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!c_started.load(Ordering::SeqCst));
    assert!(!d_started.load(Ordering::SeqCst));

    // one of two leaves done is still not enough
    a_gate.notify_one();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!c_started.load(Ordering::SeqCst));
    assert!(!d_started.load(Ordering::SeqCst));

    b_gate.notify_one();
    let outcome = timeout(Duration::from_secs(5), completion.wait())
        .await
        .expect("meta-action did not settle");
    assert!(outcome.is_success());
    assert!(c_started.load(Ordering::SeqCst));
    assert!(d_started.load(Ordering::SeqCst));

    let meta_action = queue.get("meta:expand").unwrap();
    assert_eq!(meta_action.state(), ActionState::Done);
    assert_eq!(meta_action.progress(), 1.0);
}

#[tokio::test]
async fn test_children_are_exposed_as_a_tree() {
    let queue = fast_queue();
    let graph = ActionGraph::batch(vec![
        plain_leaf("mine:0,1", Coord::new(0, 1)),
        plain_leaf("mine:1,1", Coord::new(1, 1)),
    ])
    .then(ActionGraph::batch(vec![plain_leaf(
        "mine:2,1",
        Coord::new(2, 1),
    )]));

    let meta = MetaAction::build_with_id("meta:tree", graph).unwrap();
    let mut completion = meta.completion();
    assert!(queue.add(meta));
    timeout(Duration::from_secs(5), completion.wait())
        .await
        .expect("meta-action did not settle");

    let children = queue.children_of("meta:tree");
    let mut ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["mine:0,1", "mine:1,1", "mine:2,1"]);
    for child in children {
        assert_eq!(child.parent().as_deref(), Some("meta:tree"));
    }
}

fn plain_leaf(id: &str, coord: Coord) -> Action {
    Action::builder(id, ActionKind::Mine, Identity::from_coord(coord)).build()
}

#[tokio::test]
async fn test_failed_leaves_do_not_block_the_walk() {
    let queue = fast_queue();

    let reached_second_stage = Arc::new(AtomicBool::new(false));
    let probe = reached_second_stage.clone();
    let follow_up = Action::builder(
        "claim:0,2",
        ActionKind::Claim,
        Identity::from_coord(Coord::new(0, 2)),
    )
    .process(move |_, _| {
        let probe = probe.clone();
        async move {
            probe.store(true, Ordering::SeqCst);
            Ok(ProcessOutcome::Complete)
        }
    })
    .build();

    let failing = Action::builder(
        "mine:9,2",
        ActionKind::Mine,
        Identity::from_coord(Coord::new(9, 2)),
    )
    .process(|_, _| async { anyhow::bail!("submission rejected") })
    .build();
    let healthy = plain_leaf("mine:8,2", Coord::new(8, 2));

    let graph = ActionGraph::batch(vec![failing, healthy])
        .then(ActionGraph::batch(vec![follow_up]));
    let meta = MetaAction::build_with_id("meta:lossy", graph).unwrap();
    let mut completion = meta.completion();
    assert!(queue.add(meta));

    // the walk continues past the failed leaf and the parent resolves
    // success, with progress counting the failed leaf as settled
    let outcome = timeout(Duration::from_secs(5), completion.wait())
        .await
        .expect("meta-action did not settle");
    assert!(outcome.is_success());
    assert!(reached_second_stage.load(Ordering::SeqCst));

    let meta_action = queue.get("meta:lossy").unwrap();
    assert_eq!(meta_action.progress(), 1.0);
    assert_eq!(
        queue.get("mine:9,2").unwrap().state(),
        ActionState::Failed
    );
}

#[tokio::test]
async fn test_identity_collision_inside_a_batch_counts_as_failed() {
    let queue = fast_queue();

    // both leaves target the same tile; the queue admits only one
    let shared = Coord::new(4, 2);
    let graph = ActionGraph::batch(vec![
        Action::builder("mine:4,2", ActionKind::Mine, Identity::from_coord(shared)).build(),
        Action::builder("wall:4,2", ActionKind::Wall, Identity::from_coord(shared)).build(),
    ]);
    let meta = MetaAction::build_with_id("meta:collision", graph).unwrap();
    let mut completion = meta.completion();
    assert!(queue.add(meta));

    let outcome = timeout(Duration::from_secs(5), completion.wait())
        .await
        .expect("meta-action did not settle");
    assert!(outcome.is_success());
    assert_eq!(queue.get("meta:collision").unwrap().progress(), 1.0);
}
