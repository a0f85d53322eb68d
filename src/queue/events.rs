//! Lifecycle event stream.
//!
//! One event per action state transition, keyed by action id, plus
//! submit/confirm telemetry sub-events reported by process steps. The
//! channel is a bounded broadcast with overflow on: a slow observer
//! loses the oldest events rather than ever blocking the scheduler.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // lifecycle
    Queued,
    Processing,
    Requeued,
    Done,
    Failed,
    Cancelled,
    // submit/confirm telemetry
    Submitting,
    Submitted,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub id: String,
    pub kind: EventKind,
    pub at: NaiveDateTime,
}

#[derive(Clone)]
pub(crate) struct EventChannel {
    tx: async_broadcast::Sender<ActionEvent>,
    rx: async_broadcast::InactiveReceiver<ActionEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (mut tx, rx) = async_broadcast::broadcast(capacity);
        tx.set_overflow(true);
        tx.set_await_active(false);
        Self {
            tx,
            rx: rx.deactivate(),
        }
    }

    pub fn subscribe(&self) -> async_broadcast::Receiver<ActionEvent> {
        self.rx.activate_cloned()
    }

    pub fn emit(&self, id: &str, kind: EventKind) {
        let event = ActionEvent {
            id: id.to_string(),
            kind,
            at: chrono::Utc::now().naive_utc(),
        };
        trace!("event {:?} for {}", kind, id);
        // overflow mode keeps this from ever failing on a full buffer
        let _ = self.tx.try_broadcast(event);
    }
}
