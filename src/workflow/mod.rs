//! Durable Workflow Executor
//!
//! Replayable, idempotent workflow runs over a persistent step ledger.
//! Submission is idempotent per `(org, name, key)`; each step runs at most
//! once per instance; crashed runs are re-driven by the recovery worker.

pub mod db;
pub mod engine;
pub mod memory;
pub mod store;
pub mod types;
pub mod worker;

pub use db::PgWorkflowStore;
pub use engine::{StepCtx, WorkflowDriver, WorkflowEngine, WorkflowHandle};
pub use memory::MemoryWorkflowStore;
pub use store::{Submission, WorkflowStore};
pub use types::{
    EventKind, StatusEvent, StepRecord, WorkflowId, WorkflowInstance, WorkflowOutcome,
    WorkflowState,
};
pub use worker::{RecoveryWorker, WorkerConfig};
