//! The scheduler: admission polling, single-flight-per-identity
//! dispatch, cancellation, parent/child bookkeeping, event emission.
//!
//! One logical queue per client session. Every added action gets its own
//! poll task, so requirement evaluation for different actions never
//! blocks; the identity registry is what serializes conflicting work.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionState, ProcessCtx, ProcessOutcome};
use crate::admission::{Admission, AdmissionPayload};
use crate::backend::ExecutionBackend;
use crate::codec::Identity;
use crate::core::config::QueueConfig;
use crate::core::errors::{GridflowError, Result};
use crate::queue::events::{ActionEvent, EventChannel, EventKind};
use crate::world::{WorldState, WorldView};

/// Counts of tracked work, for diagnostics and UI badges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Actions tracked, terminal ones in their grace period included
    pub tracked: usize,
    pub queued: usize,
    pub processing: usize,
    /// Identity locks currently held
    pub active_identities: usize,
}

pub struct ActionQueue {
    config: QueueConfig,
    world: Arc<WorldState>,
    backend: Arc<dyn ExecutionBackend>,
    /// id -> action, live and grace-period entries
    actions: DashMap<String, Arc<Action>>,
    /// identity -> id of the action holding the single-flight lock
    active: DashMap<Identity, String>,
    events: EventChannel,
}

impl ActionQueue {
    pub fn new(
        config: QueueConfig,
        world: Arc<WorldState>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            events: EventChannel::new(config.event_capacity),
            config,
            world,
            backend,
            actions: DashMap::new(),
            active: DashMap::new(),
        }))
    }

    pub fn with_defaults(world: Arc<WorldState>, backend: Arc<dyn ExecutionBackend>) -> Arc<Self> {
        Self::new(QueueConfig::default(), world, backend).expect("default config is valid")
    }

    pub fn subscribe(&self) -> async_broadcast::Receiver<ActionEvent> {
        self.events.subscribe()
    }

    pub fn world(&self) -> Arc<WorldState> {
        self.world.clone()
    }

    pub fn view(&self) -> WorldView {
        WorldView::new(self.world.clone())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Action>> {
        self.actions.get(id).map(|a| a.clone())
    }

    pub fn children_of(&self, id: &str) -> Vec<Arc<Action>> {
        let Some(action) = self.get(id) else {
            return Vec::new();
        };
        action
            .children()
            .iter()
            .filter_map(|child_id| self.get(child_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let mut queued = 0;
        let mut processing = 0;
        for entry in self.actions.iter() {
            match entry.state() {
                ActionState::Queued => queued += 1,
                ActionState::Processing => processing += 1,
                _ => {}
            }
        }
        QueueStats {
            tracked: self.actions.len(),
            queued,
            processing,
            active_identities: self.active.len(),
        }
    }

    /// Admit an action into the queue.
    ///
    /// Returns false when the identity lock is already held (and the
    /// action does not bypass concurrency), or when a live action with
    /// the same id exists. An id becomes reusable once its previous
    /// holder is terminal, grace period notwithstanding.
    pub fn add(self: &Arc<Self>, action: Action) -> bool {
        let action = Arc::new(action);
        let id = action.id.clone();

        if !action.ignore_concurrency {
            match self.active.entry(action.identity) {
                Entry::Occupied(occupied) => {
                    info!(
                        "rejecting {}: identity {} held by {}",
                        id,
                        action.identity,
                        occupied.get()
                    );
                    return false;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(id.clone());
                }
            }
        }

        let registered = match self.actions.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_terminal() {
                    occupied.insert(action.clone());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(action.clone());
                true
            }
        };
        if !registered {
            warn!("rejecting {}: a live action with this id exists", id);
            if !action.ignore_concurrency {
                self.active
                    .remove_if(&action.identity, |_, holder| holder == &id);
            }
            return false;
        }

        action.try_transition(ActionState::Created, ActionState::Queued);
        self.events.emit(&id, EventKind::Queued);
        debug!("queued {} ({:?})", id, action.kind);

        let queue = self.clone();
        tokio::spawn(async move {
            queue.drive(action).await;
        });
        true
    }

    /// Cancel an action by id.
    ///
    /// A queued action transitions straight to `Cancelled`; its process
    /// never runs. A processing action only receives a cooperative
    /// cancel request, and its identity lock stays held until the
    /// in-flight execution reaches a terminal state.
    pub fn cancel(self: &Arc<Self>, id: &str) -> bool {
        let Some(action) = self.get(id) else {
            return false;
        };

        if action.try_transition(ActionState::Queued, ActionState::Cancelled) {
            action.request_cancel();
            info!("cancelled {} while queued", id);
            self.finish(&action, EventKind::Cancelled);
            return true;
        }
        if action.state() == ActionState::Processing {
            debug!("cooperative cancel requested for {}", id);
            action.request_cancel();
            return true;
        }
        false
    }

    /// Register children under a tracked parent so observers can render
    /// the tree. Children are scheduled independently of their parent.
    pub fn add_children(&self, parent_id: &str, child_ids: &[String]) -> Result<()> {
        let parent = self
            .get(parent_id)
            .ok_or_else(|| GridflowError::action(parent_id, "unknown parent action"))?;
        for child_id in child_ids {
            let Some(child) = self.get(child_id) else {
                warn!("skipping unknown child {} of {}", child_id, parent_id);
                continue;
            };
            child.set_parent(parent_id);
            parent.add_child(child_id);
        }
        Ok(())
    }

    pub(crate) fn emit_telemetry(&self, id: &str, kind: EventKind) {
        self.events.emit(id, kind);
    }

    /// Poll loop for one action: evaluate admission until it grants,
    /// dispatch, and settle the terminal state.
    async fn drive(self: Arc<Self>, action: Arc<Action>) {
        let mut first_tick = true;
        loop {
            if !first_tick {
                sleep(self.config.jittered_poll_delay()).await;
            }
            first_tick = false;

            // cancelled (or otherwise settled) while we slept
            if action.state() != ActionState::Queued {
                break;
            }
            // a cancel requested mid-processing lands here after a requeue
            if action.is_cancel_requested() {
                if action.try_transition(ActionState::Queued, ActionState::Cancelled) {
                    self.finish(&action, EventKind::Cancelled);
                }
                break;
            }

            if action.should_skip(&self.view()) {
                if action.try_transition(ActionState::Queued, ActionState::Done) {
                    debug!("skipping {}: already satisfied", action.id);
                    self.finish(&action, EventKind::Done);
                }
                break;
            }

            let admission = match action.evaluate_requirement(self.view()).await {
                Ok(admission) => admission,
                Err(err) => {
                    // admission failures are deferred, never thrown
                    debug!("requirement for {} errored, retrying: {}", action.id, err);
                    continue;
                }
            };
            let payload = match admission {
                Admission::Deferred => continue,
                Admission::Granted(value) => AdmissionPayload::Ready(value),
                Admission::Inaccessible => AdmissionPayload::Inaccessible,
            };

            if !action.try_transition(ActionState::Queued, ActionState::Processing) {
                break; // lost the race against a cancellation
            }
            self.events.emit(&action.id, EventKind::Processing);

            let ctx = ProcessCtx {
                world: self.world.clone(),
                backend: self.backend.clone(),
                queue: self.clone(),
                action: action.clone(),
            };
            match action.execute(ctx, payload).await {
                Ok(ProcessOutcome::Complete) => {
                    if action.try_transition(ActionState::Processing, ActionState::Done) {
                        info!("action {} done", action.id);
                        self.finish(&action, EventKind::Done);
                    }
                    break;
                }
                Ok(ProcessOutcome::Requeue) => {
                    if !action.try_transition(ActionState::Processing, ActionState::Queued) {
                        break;
                    }
                    debug!("requeued {} for re-admission", action.id);
                    self.events.emit(&action.id, EventKind::Requeued);
                }
                Ok(ProcessOutcome::Cancelled) => {
                    if action.try_transition(ActionState::Processing, ActionState::Cancelled) {
                        info!("action {} stopped without side effects", action.id);
                        self.finish(&action, EventKind::Cancelled);
                    }
                    break;
                }
                Err(err) => {
                    error!("action {} failed: {:#}", action.id, err);
                    if action.try_fail(ActionState::Processing, format!("{err:#}")) {
                        self.finish(&action, EventKind::Failed);
                    }
                    break;
                }
            }
        }
    }

    /// Terminal housekeeping: emit the event, release the identity lock,
    /// and drop the entry after the observer grace period.
    fn finish(self: &Arc<Self>, action: &Arc<Action>, kind: EventKind) {
        self.events.emit(&action.id, kind);
        if !action.ignore_concurrency {
            self.active
                .remove_if(&action.identity, |_, holder| holder == &action.id);
        }

        let queue = self.clone();
        let retained = action.clone();
        let grace = self.config.grace_period();
        tokio::spawn(async move {
            sleep(grace).await;
            // the id may have been reused; only drop our own entry
            queue
                .actions
                .remove_if(&retained.id, |_, current| Arc::ptr_eq(current, &retained));
        });
    }
}
