//! The unit of deferred work: state machine, progress, completion signal.
//!
//! An `Action` is built by a caller factory, handed to the queue, and
//! owned by it from admission until it reaches a terminal state. The
//! queue is the only caller of [`Action::execute`].

use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::admission::{Admission, AdmissionPayload, RequirementFn};
use crate::backend::{ExecutionBackend, SubmitHooks};
use crate::codec::Identity;
use crate::core::errors::Result;
use crate::queue::{ActionQueue, EventKind};
use crate::world::{Coord, WorldState, WorldView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionState {
    Created,
    Queued,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Operation kinds the client issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Mine,
    ForceMine,
    Wall,
    Unwall,
    Claim,
    MoveUnits,
    Meta,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mine => "mine",
            Self::ForceMine => "force-mine",
            Self::Wall => "wall",
            Self::Unwall => "unwall",
            Self::Claim => "claim",
            Self::MoveUnits => "move",
            Self::Meta => "meta",
        };
        f.write_str(name)
    }
}

/// Conventional deterministic id for a tile-targeted action, so repeated
/// attempts on the same target collide
pub fn action_id(kind: ActionKind, coord: Coord) -> String {
    format!("{kind}:{},{}", coord.x, coord.y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    Energy,
    Ore,
    Stone,
}

/// Terminal value observers receive from the completion signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    Failed(String),
    Cancelled,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Handle on an action's completion signal.
///
/// Every clone observes the same terminal value; `wait` resolves exactly
/// once per handle.
#[derive(Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<ActionOutcome>>,
}

impl Completion {
    pub async fn wait(&mut self) -> ActionOutcome {
        match self.rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone().expect("completion observed without a value"),
            // sender dropped without resolving: the action was torn down
            Err(_) => ActionOutcome::Failed("action dropped before completing".to_string()),
        }
    }

    /// The terminal value, if the action already finished
    pub fn outcome(&self) -> Option<ActionOutcome> {
        self.rx.borrow().clone()
    }
}

/// What a process step reports back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Work confirmed and applied
    Complete,
    /// Re-validate the requirement before retrying, e.g. after a failed
    /// submission; takes the Processing -> Queued back-edge
    Requeue,
    /// The process observed a cancel request or an inaccessible
    /// admission and stopped without side effects
    Cancelled,
}

/// Context handed to a process step for exactly one execution
#[derive(Clone)]
pub struct ProcessCtx {
    pub world: Arc<WorldState>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub queue: Arc<ActionQueue>,
    pub action: Arc<Action>,
}

impl ProcessCtx {
    /// True once a cooperative cancel has been requested
    pub fn cancel_requested(&self) -> bool {
        self.action.is_cancel_requested()
    }

    /// Emit a submit/confirm telemetry sub-event for this action
    pub fn telemetry(&self, kind: EventKind) {
        self.queue.emit_telemetry(&self.action.id, kind);
    }

    /// Backend hooks wired to the queue's event stream
    pub fn telemetry_hooks(&self) -> SubmitHooks {
        let submitting = self.clone();
        let submitted = self.clone();
        let confirmed = self.clone();
        SubmitHooks {
            on_balance_too_low: None,
            on_submitting: Some(Box::new(move || submitting.telemetry(EventKind::Submitting))),
            on_submitted: Some(Box::new(move |_| submitted.telemetry(EventKind::Submitted))),
            on_confirmed: Some(Box::new(move |_| confirmed.telemetry(EventKind::Confirmed))),
        }
    }
}

pub type ProcessFn = Box<
    dyn Fn(ProcessCtx, AdmissionPayload) -> BoxFuture<'static, anyhow::Result<ProcessOutcome>>
        + Send
        + Sync,
>;
pub type StateChangeFn = Box<dyn Fn(&Action, ActionState) + Send + Sync>;
pub type SkipFn = Box<dyn Fn(&WorldView) -> bool + Send + Sync>;
pub type CancelFn = Box<dyn Fn() + Send + Sync>;

/// Box an async closure as a [`ProcessFn`]
pub fn process<F, Fut>(f: F) -> ProcessFn
where
    F: Fn(ProcessCtx, AdmissionPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProcessOutcome>> + Send + 'static,
{
    Box::new(move |ctx, payload| Box::pin(f(ctx, payload)))
}

/// A single unit of deferred, possibly remote-confirmed work
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    pub identity: Identity,
    pub ignore_concurrency: bool,
    pub created_at: NaiveDateTime,
    pub cost_by_resource: Option<HashMap<Resource, u64>>,
    parent: RwLock<Option<String>>,
    children: RwLock<Vec<String>>,
    state: RwLock<ActionState>,
    /// f64 bits; monotone while the action is live
    progress: AtomicU64,
    cancelled: AtomicBool,
    skip: Option<SkipFn>,
    requirement: Option<RequirementFn>,
    process: ProcessFn,
    on_state_change: Option<StateChangeFn>,
    on_cancel: Option<CancelFn>,
    completion_tx: watch::Sender<Option<ActionOutcome>>,
    completion_rx: watch::Receiver<Option<ActionOutcome>>,
}

impl Action {
    pub fn builder(id: impl Into<String>, kind: ActionKind, identity: Identity) -> ActionBuilder {
        ActionBuilder::new(id, kind, identity)
    }

    pub fn state(&self) -> ActionState {
        *self.state.read().expect("state lock poisoned")
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    /// Raise progress; values below the current one are ignored
    pub fn set_progress(&self, value: f64) {
        let clamped = value.clamp(0.0, 1.0);
        self.progress
            .fetch_max(clamped.to_bits(), Ordering::AcqRel);
    }

    pub fn parent(&self) -> Option<String> {
        self.parent.read().expect("parent lock poisoned").clone()
    }

    pub fn children(&self) -> Vec<String> {
        self.children.read().expect("children lock poisoned").clone()
    }

    /// Subscribe to the completion signal
    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.completion_rx.clone(),
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation and fire the cancel hook once
    pub(crate) fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            if let Some(hook) = &self.on_cancel {
                hook();
            }
        }
    }

    pub(crate) fn set_parent(&self, id: &str) {
        *self.parent.write().expect("parent lock poisoned") = Some(id.to_string());
    }

    pub(crate) fn add_child(&self, id: &str) {
        self.children
            .write()
            .expect("children lock poisoned")
            .push(id.to_string());
    }

    /// Compare-and-set state transition; terminal targets resolve the
    /// completion signal. Returns false when the action moved on.
    pub(crate) fn try_transition(&self, from: ActionState, to: ActionState) -> bool {
        self.transition_inner(from, to, None)
    }

    /// Transition to `Failed` carrying the error message
    pub(crate) fn try_fail(&self, from: ActionState, message: String) -> bool {
        self.transition_inner(from, ActionState::Failed, Some(message))
    }

    fn transition_inner(&self, from: ActionState, to: ActionState, failure: Option<String>) -> bool {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            if *state != from {
                return false;
            }
            *state = to;
        }
        match to {
            ActionState::Done => {
                self.set_progress(1.0);
                let _ = self.completion_tx.send(Some(ActionOutcome::Done));
            }
            ActionState::Failed => {
                let message = failure.unwrap_or_else(|| "execution failed".to_string());
                let _ = self.completion_tx.send(Some(ActionOutcome::Failed(message)));
            }
            ActionState::Cancelled => {
                let _ = self.completion_tx.send(Some(ActionOutcome::Cancelled));
            }
            _ => {}
        }
        if let Some(hook) = &self.on_state_change {
            hook(self, to);
        }
        true
    }

    pub(crate) fn should_skip(&self, view: &WorldView) -> bool {
        self.skip.as_ref().map(|f| f(view)).unwrap_or(false)
    }

    pub(crate) fn evaluate_requirement(&self, view: WorldView) -> BoxFuture<'static, Result<Admission>> {
        match &self.requirement {
            Some(requirement) => requirement(view),
            None => Box::pin(async { Ok(Admission::Granted(serde_json::Value::Null)) }),
        }
    }

    /// Run the process step. Only the queue calls this.
    pub(crate) async fn execute(
        &self,
        ctx: ProcessCtx,
        payload: AdmissionPayload,
    ) -> anyhow::Result<ProcessOutcome> {
        (self.process)(ctx, payload).await
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Action`]
pub struct ActionBuilder {
    id: String,
    kind: ActionKind,
    identity: Identity,
    ignore_concurrency: bool,
    cost_by_resource: Option<HashMap<Resource, u64>>,
    skip: Option<SkipFn>,
    requirement: Option<RequirementFn>,
    process: Option<ProcessFn>,
    on_state_change: Option<StateChangeFn>,
    on_cancel: Option<CancelFn>,
}

impl ActionBuilder {
    pub fn new(id: impl Into<String>, kind: ActionKind, identity: Identity) -> Self {
        Self {
            id: id.into(),
            kind,
            identity,
            ignore_concurrency: false,
            cost_by_resource: None,
            skip: None,
            requirement: None,
            process: None,
            on_state_change: None,
            on_cancel: None,
        }
    }

    /// Bypass identity-based single-flight for this action
    pub fn ignore_concurrency(mut self) -> Self {
        self.ignore_concurrency = true;
        self
    }

    /// Declare a resource cost preview; the engine never reads it
    pub fn cost(mut self, resource: Resource, amount: u64) -> Self {
        self.cost_by_resource
            .get_or_insert_with(HashMap::new)
            .insert(resource, amount);
        self
    }

    /// Complete without executing when the predicate already holds
    pub fn skip<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorldView) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(f));
        self
    }

    /// Admission requirement; actions without one admit immediately
    /// with a null payload
    pub fn requirement(mut self, requirement: RequirementFn) -> Self {
        self.requirement = Some(requirement);
        self
    }

    /// The effectful step run once admission succeeds
    pub fn process<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ProcessCtx, AdmissionPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ProcessOutcome>> + Send + 'static,
    {
        self.process = Some(process(f));
        self
    }

    /// Pre-boxed variant of [`Self::process`]
    pub fn process_fn(mut self, f: ProcessFn) -> Self {
        self.process = Some(f);
        self
    }

    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&Action, ActionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_cancel = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Action {
        let (completion_tx, completion_rx) = watch::channel(None);
        Action {
            id: self.id,
            kind: self.kind,
            identity: self.identity,
            ignore_concurrency: self.ignore_concurrency,
            created_at: chrono::Utc::now().naive_utc(),
            cost_by_resource: self.cost_by_resource,
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            state: RwLock::new(ActionState::Created),
            progress: AtomicU64::new(0f64.to_bits()),
            cancelled: AtomicBool::new(false),
            skip: self.skip,
            requirement: self.requirement,
            process: self
                .process
                .unwrap_or_else(|| process(|_, _| async { Ok(ProcessOutcome::Complete) })),
            on_state_change: self.on_state_change,
            on_cancel: self.on_cancel,
            completion_tx,
            completion_rx,
        }
    }
}
