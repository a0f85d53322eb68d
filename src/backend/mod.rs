//! Execution backend adapter contract.
//!
//! The engine never talks to the chain directly; each action's process
//! step hands a [`SubmitRequest`] to an [`ExecutionBackend`] and awaits
//! the submitted/confirmed pair. Everything behind the trait (signing,
//! RPC transport, nonce management, funding recovery) is an external
//! collaborator.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::codec::{Identity, Word};
use crate::core::errors::{GridflowError, Result};

/// A remote operation ready for signing and submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Ledger entry point, e.g. "mineTiles"
    pub method: String,
    /// Encoded arguments, one 256-bit word each
    pub args: Vec<Word>,
    /// Sequence number this operation was generated for
    pub sequence: u64,
}

/// Handle returned once an operation is accepted for inclusion
#[derive(Debug, Clone)]
pub struct OperationHandle {
    pub op_id: String,
    pub submitted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Inclusion receipt; non-success must surface as a thrown "Reverted"
#[derive(Debug, Clone)]
pub struct Receipt {
    pub op_id: String,
    pub status: ReceiptStatus,
    pub info: Option<String>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Generates the operation for a given sequence number. Must be pure
/// given that input; the backend may call it again on re-submission.
pub type OperationGenerator = Box<dyn Fn(u64) -> Operation + Send + Sync>;

/// Timing telemetry and recovery hooks, all optional
#[derive(Default)]
pub struct SubmitHooks {
    /// Fired when the caller's funding is insufficient; recovery is
    /// delegated externally and failure to recover surfaces as an error
    pub on_balance_too_low: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_submitting: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_submitted: Option<Box<dyn Fn(Duration) + Send + Sync>>,
    pub on_confirmed: Option<Box<dyn Fn(Duration) + Send + Sync>>,
}

pub struct SubmitRequest {
    pub identity: Identity,
    pub gen_operation: OperationGenerator,
    pub hooks: SubmitHooks,
}

impl SubmitRequest {
    pub fn new(identity: Identity, gen_operation: OperationGenerator) -> Self {
        Self {
            identity,
            gen_operation,
            hooks: SubmitHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: SubmitHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// The submit/confirm future pair for one in-flight operation
pub struct SubmitHandle {
    pub submitted: oneshot::Receiver<OperationHandle>,
    pub confirmed: oneshot::Receiver<Receipt>,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit an operation for inclusion. Returning `Ok` means the
    /// request was accepted for processing, not that it will confirm.
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitHandle>;
}

/// Drive one submit/confirm round-trip to completion.
///
/// Maps a dropped future to an execution error and a non-success receipt
/// to [`GridflowError::Reverted`], which is the contract every process
/// step must honor.
pub async fn submit_and_confirm(
    backend: &dyn ExecutionBackend,
    request: SubmitRequest,
) -> Result<Receipt> {
    let identity = request.identity;
    let handle = backend.submit(request).await?;

    let op = handle.submitted.await.map_err(|_| {
        GridflowError::execution(identity.to_string(), "backend dropped the submit future")
    })?;
    debug!("operation {} submitted for {}", op.op_id, identity);

    let receipt = handle.confirmed.await.map_err(|_| {
        GridflowError::execution(identity.to_string(), "backend dropped the confirm future")
    })?;

    if receipt.is_success() {
        debug!("operation {} confirmed for {}", receipt.op_id, identity);
        Ok(receipt)
    } else {
        Err(GridflowError::Reverted {
            identity: identity.to_string(),
            operation: receipt.op_id.clone(),
            reason: receipt.info.clone(),
        })
    }
}

/// Outcome a [`StaticBackend`] resolves every request with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticOutcome {
    Confirm,
    Revert,
    BalanceTooLow,
}

/// In-process backend that resolves every submission immediately.
///
/// Useful for dry runs and tests; it assigns real sequence numbers,
/// invokes the telemetry hooks, and records generated operations.
pub struct StaticBackend {
    outcome: StaticOutcome,
    sequence: AtomicU64,
    operations: Mutex<Vec<Operation>>,
}

impl StaticBackend {
    pub fn new(outcome: StaticOutcome) -> Self {
        Self {
            outcome,
            sequence: AtomicU64::new(0),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// All operations generated so far, in submission order
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().expect("operations lock poisoned").clone()
    }
}

#[async_trait]
impl ExecutionBackend for StaticBackend {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitHandle> {
        if self.outcome == StaticOutcome::BalanceTooLow {
            if let Some(hook) = &request.hooks.on_balance_too_low {
                hook();
            }
            return Err(GridflowError::balance_too_low(request.identity.to_string()));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let operation = (request.gen_operation)(sequence);
        let op_id = format!("op-{sequence}");
        self.operations
            .lock()
            .expect("operations lock poisoned")
            .push(operation);

        if let Some(hook) = &request.hooks.on_submitting {
            hook();
        }

        let (submitted_tx, submitted) = oneshot::channel();
        let (confirmed_tx, confirmed) = oneshot::channel();

        let _ = submitted_tx.send(OperationHandle {
            op_id: op_id.clone(),
            submitted_at: chrono::Utc::now().naive_utc(),
        });
        if let Some(hook) = &request.hooks.on_submitted {
            hook(Duration::ZERO);
        }

        let status = match self.outcome {
            StaticOutcome::Confirm => ReceiptStatus::Success,
            StaticOutcome::Revert => ReceiptStatus::Reverted,
            StaticOutcome::BalanceTooLow => unreachable!(),
        };
        let _ = confirmed_tx.send(Receipt {
            op_id,
            status,
            info: None,
        });
        if let Some(hook) = &request.hooks.on_confirmed {
            hook(Duration::ZERO);
        }

        Ok(SubmitHandle {
            submitted,
            confirmed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Coord;

    fn request(backend_seq_probe: bool) -> SubmitRequest {
        let identity = Identity::from_coord(Coord::new(1, 2));
        SubmitRequest::new(
            identity,
            Box::new(move |sequence| Operation {
                method: "mineTiles".to_string(),
                args: vec![crate::codec::coord_to_id(Coord::new(1, 2))],
                sequence: if backend_seq_probe { sequence } else { 0 },
            }),
        )
    }

    #[tokio::test]
    async fn test_confirm_round_trip() {
        let backend = StaticBackend::new(StaticOutcome::Confirm);
        let receipt = submit_and_confirm(&backend, request(false)).await.unwrap();
        assert!(receipt.is_success());
        assert_eq!(backend.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_an_error() {
        let backend = StaticBackend::new(StaticOutcome::Revert);
        let err = submit_and_confirm(&backend, request(false)).await.unwrap_err();
        assert!(matches!(err, GridflowError::Reverted { .. }));
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let backend = StaticBackend::new(StaticOutcome::Confirm);
        for _ in 0..3 {
            submit_and_confirm(&backend, request(true)).await.unwrap();
        }
        let sequences: Vec<u64> = backend.operations().iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_balance_too_low_fires_hook() {
        let backend = StaticBackend::new(StaticOutcome::BalanceTooLow);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let probe = fired.clone();
        let mut req = request(false);
        req.hooks.on_balance_too_low = Some(Box::new(move || {
            probe.store(true, Ordering::SeqCst);
        }));

        let err = submit_and_confirm(&backend, req).await.unwrap_err();
        assert!(matches!(err, GridflowError::BalanceTooLow { .. }));
        assert!(fired.load(Ordering::SeqCst));
    }
}
