//! Workflow Store Contract
//!
//! Persistence seam for the durable executor. Both backends (Postgres and
//! in-memory) must give the same guarantees:
//!
//! - `create_instance` is first-writer-wins on `(org_id, name, key)`
//! - `record_step` is first-writer-wins on `(workflow_id, step_name)` and
//!   always returns the winning record
//! - `set_terminal` only moves RUNNING instances; terminal states are frozen

use async_trait::async_trait;
use std::time::Duration;

use super::types::{EventKind, StatusEvent, StepRecord, WorkflowId, WorkflowInstance, WorkflowState};
use crate::error::CoreError;

/// Result of an idempotent instance submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub instance: WorkflowInstance,
    /// False when an instance with the same key already existed and the
    /// caller attached to it.
    pub created: bool,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new instance, or return the existing one for the same
    /// `(org_id, name, idempotency_key)`.
    async fn create_instance(
        &self,
        instance: WorkflowInstance,
    ) -> Result<Submission, CoreError>;

    async fn get_instance(&self, id: WorkflowId) -> Result<WorkflowInstance, CoreError>;

    /// Record a step's output. If the step was already recorded, the stored
    /// output is returned and `output` is discarded.
    async fn record_step(
        &self,
        workflow_id: WorkflowId,
        step_name: &str,
        output: serde_json::Value,
    ) -> Result<StepRecord, CoreError>;

    async fn get_step(
        &self,
        workflow_id: WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepRecord>, CoreError>;

    /// Append one status event; the store assigns the next `seq`.
    async fn append_event(
        &self,
        workflow_id: WorkflowId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<StatusEvent, CoreError>;

    /// Full status stream in `seq` order.
    async fn events(&self, workflow_id: WorkflowId) -> Result<Vec<StatusEvent>, CoreError>;

    /// Move a RUNNING instance to a terminal state. Returns false (and
    /// changes nothing) when the instance is already terminal.
    async fn set_terminal(
        &self,
        workflow_id: WorkflowId,
        state: WorkflowState,
        error: Option<String>,
    ) -> Result<bool, CoreError>;

    /// Bump `updated_at` and the retry counter before a recovery re-drive,
    /// so one scan cycle does not pick the instance up twice.
    async fn touch_for_retry(&self, workflow_id: WorkflowId) -> Result<i32, CoreError>;

    /// RUNNING instances whose `updated_at` is older than `threshold`.
    async fn find_stale(&self, threshold: Duration) -> Result<Vec<WorkflowInstance>, CoreError>;
}
