//! Admission protocol: the requirement side of the action lifecycle.
//!
//! A requirement is evaluated repeatedly while its action sits in the
//! queue. It reads the world, never writes it, and answers one of three
//! ways: admission granted (with the computed payload), deferred, or
//! inaccessible (a time-boxed requirement ran out of wall clock).

pub mod requirements;
pub mod search;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::core::errors::Result;
use crate::world::WorldView;

/// Result of one requirement evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Preconditions hold; the payload is threaded verbatim into process
    Granted(Value),
    /// Not yet satisfiable; the queue keeps polling
    Deferred,
    /// A time-boxed requirement exceeded its bound. Dispatched to
    /// process, which must abort without side effects.
    Inaccessible,
}

impl Admission {
    /// Grant admission with a serializable payload
    pub fn granted<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self::Granted(serde_json::to_value(payload)?))
    }
}

/// What an admitted action's process step receives
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionPayload {
    Ready(Value),
    Inaccessible,
}

impl AdmissionPayload {
    /// The payload value, for processes that never see `Inaccessible`
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Inaccessible => None,
        }
    }
}

/// Boxed async requirement closure
pub type RequirementFn =
    Box<dyn Fn(WorldView) -> BoxFuture<'static, Result<Admission>> + Send + Sync>;

/// Box an async closure as a [`RequirementFn`]
pub fn requirement<F, Fut>(f: F) -> RequirementFn
where
    F: Fn(WorldView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Admission>> + Send + 'static,
{
    Box::new(move |view| Box::pin(f(view)))
}

/// Attach a wall-clock bound to a requirement.
///
/// The clock starts now. Once the bound elapses without admission,
/// every subsequent evaluation reports [`Admission::Inaccessible`]
/// instead of deferring further.
pub fn with_deadline(inner: RequirementFn, bound: Duration) -> RequirementFn {
    let deadline = Instant::now() + bound;
    Box::new(move |view| {
        if Instant::now() >= deadline {
            return Box::pin(async { Ok(Admission::Inaccessible) });
        }
        inner(view)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldState;
    use std::sync::Arc;

    fn view() -> WorldView {
        WorldView::new(Arc::new(WorldState::new()))
    }

    #[tokio::test]
    async fn test_deadline_defers_then_expires() {
        let inner = requirement(|_view| async { Ok(Admission::Deferred) });
        let bounded = with_deadline(inner, Duration::from_millis(30));

        assert_eq!(bounded(view()).await.unwrap(), Admission::Deferred);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bounded(view()).await.unwrap(), Admission::Inaccessible);
    }

    #[tokio::test]
    async fn test_deadline_passes_grants_through() {
        let inner = requirement(|_view| async { Admission::granted(&vec![1, 2, 3]) });
        let bounded = with_deadline(inner, Duration::from_secs(60));

        match bounded(view()).await.unwrap() {
            Admission::Granted(value) => assert_eq!(value, serde_json::json!([1, 2, 3])),
            other => panic!("expected granted, got {other:?}"),
        }
    }
}
