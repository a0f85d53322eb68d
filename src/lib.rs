//! Gridflow - the action lifecycle and scheduling engine for an
//! on-chain grid-world game client.
//!
//! Callers build [`Action`]s (a requirement gating admission plus a
//! process performing the submit/confirm round-trip), hand them to the
//! [`ActionQueue`], and observe lifecycle events and completion signals.
//! The queue polls admission until it grants, runs independent actions
//! concurrently while serializing per game-world identity, and
//! [`MetaAction`] composes DAGs of dependent action batches.

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

pub mod action;
pub mod admission;
pub mod backend;
pub mod codec;
pub mod queue;
pub mod world;

// Re-exports for convenience
pub use crate::core::config::QueueConfig;
pub use crate::core::errors::{GridflowError, Result};

pub use action::{
    action_id, process, Action, ActionBuilder, ActionGraph, ActionKind, ActionOutcome,
    ActionState, Completion, MetaAction, ProcessCtx, ProcessFn, ProcessOutcome, Resource,
};
pub use admission::{
    requirement, with_deadline, Admission, AdmissionPayload, RequirementFn,
};
pub use backend::{
    submit_and_confirm, ExecutionBackend, Operation, OperationHandle, Receipt, ReceiptStatus,
    StaticBackend, StaticOutcome, SubmitHandle, SubmitHooks, SubmitRequest,
};
pub use codec::{
    coord_to_id, id_to_coord, pack_coord_batch, pack_coord_list, unpack_coord_batch,
    unpack_coord_list, Identity, Word, PAD_COORD,
};
pub use queue::{ActionEvent, ActionQueue, EventKind, QueueStats};
pub use world::{
    Coord, ForceId, Region, RegionId, Terrain, Tile, Unit, UnitId, WorldState, WorldView,
    REGION_SIZE,
};
