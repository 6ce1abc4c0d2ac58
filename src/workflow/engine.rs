//! Durable Step Executor
//!
//! Drives registered workflow drivers over a `WorkflowStore`. The executor
//! guarantees:
//!
//! - one instance per `(org_id, name, idempotency_key)`; a duplicate
//!   submission attaches to the existing run instead of starting a second one
//! - each named step executes at most once per instance; a re-drive replays
//!   recorded step outputs instead of re-running the work
//! - the first terminal result wins; a concurrent re-drive racing the
//!   original task cannot flip a recorded outcome
//!
//! Crash recovery is the RecoveryWorker's job: it finds RUNNING instances
//! whose heartbeat went stale and re-drives them through `resume`.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::store::WorkflowStore;
use super::types::{
    EventKind, StatusEvent, WorkflowId, WorkflowInstance, WorkflowOutcome, WorkflowState,
};
use crate::error::CoreError;
use crate::tenant::TenantContext;

/// A registered workflow implementation.
///
/// `run` receives the full step context and returns the workflow's result
/// payload. Errors are converted to a failed terminal outcome by the engine;
/// drivers only catch errors themselves for best-effort trailing steps.
pub trait WorkflowDriver: Send + Sync {
    /// Registry name, stored on every instance so recovery can find the
    /// driver again after a restart.
    fn name(&self) -> &'static str;

    fn run<'a>(&'a self, step: StepCtx) -> BoxFuture<'a, Result<serde_json::Value, CoreError>>;
}

/// Per-run context handed to a driver.
pub struct StepCtx {
    store: Arc<dyn WorkflowStore>,
    pub workflow_id: WorkflowId,
    pub tenant: TenantContext,
    pub input: serde_json::Value,
}

impl StepCtx {
    /// Execute a named step at most once.
    ///
    /// If the step was already recorded (an earlier run got this far before
    /// crashing, or a concurrent re-drive won), the recorded output is
    /// deserialized and returned and `op` never runs. Otherwise `op` runs,
    /// its output is recorded, and the *recorded* output is returned, so
    /// racing executors agree on one result.
    pub async fn run_step<T, F, Fut>(&self, step_name: &str, op: F) -> Result<T, CoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, CoreError>> + Send,
    {
        if let Some(record) = self.store.get_step(self.workflow_id, step_name).await? {
            info!(
                workflow_id = %self.workflow_id,
                step = step_name,
                "Replaying recorded step output"
            );
            return Ok(serde_json::from_value(record.output)?);
        }

        let output = op().await?;
        let record = self
            .store
            .record_step(self.workflow_id, step_name, serde_json::to_value(&output)?)
            .await?;
        Ok(serde_json::from_value(record.output)?)
    }

    /// Append a progress event to the instance's status stream.
    pub async fn progress(&self, payload: serde_json::Value) -> Result<StatusEvent, CoreError> {
        self.store
            .append_event(self.workflow_id, EventKind::Progress, payload)
            .await
    }

    /// Append an error event without failing the run. Used by best-effort
    /// steps that degrade instead of aborting.
    pub async fn note_error(&self, message: &str) -> Result<StatusEvent, CoreError> {
        self.store
            .append_event(
                self.workflow_id,
                EventKind::Error,
                serde_json::json!({"error": message}),
            )
            .await
    }
}

/// Handle to a submitted workflow instance.
pub struct WorkflowHandle {
    store: Arc<dyn WorkflowStore>,
    pub id: WorkflowId,
    /// False when this submission attached to an already-running instance.
    pub created: bool,
}

impl WorkflowHandle {
    /// Current instance state.
    pub async fn state(&self) -> Result<WorkflowState, CoreError> {
        Ok(self.store.get_instance(self.id).await?.state)
    }

    /// Full status stream so far.
    pub async fn events(&self) -> Result<Vec<StatusEvent>, CoreError> {
        self.store.events(self.id).await
    }

    /// Latest progress event, if any. Best-effort snapshot for callers
    /// polling a long run.
    pub async fn latest_status(&self) -> Result<Option<StatusEvent>, CoreError> {
        let events = self.store.events(self.id).await?;
        Ok(events
            .into_iter()
            .rev()
            .find(|event| event.kind == EventKind::Progress))
    }

    /// Latest error event, if any.
    pub async fn latest_error(&self) -> Result<Option<StatusEvent>, CoreError> {
        let events = self.store.events(self.id).await?;
        Ok(events
            .into_iter()
            .rev()
            .find(|event| event.kind == EventKind::Error))
    }

    /// Wait for the run to reach a terminal state and return its outcome.
    pub async fn result(&self) -> Result<WorkflowOutcome, CoreError> {
        loop {
            let instance = self.store.get_instance(self.id).await?;
            if instance.state.is_terminal() {
                return self.outcome_of(&instance).await;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn outcome_of(&self, instance: &WorkflowInstance) -> Result<WorkflowOutcome, CoreError> {
        let events = self.store.events(self.id).await?;
        if let Some(terminal) = events
            .iter()
            .rev()
            .find(|event| event.kind == EventKind::Terminal)
        {
            return Ok(serde_json::from_value(terminal.payload.clone())?);
        }
        // Terminal state without a terminal event means the process died
        // between the two writes; synthesize the outcome from the instance.
        Ok(WorkflowOutcome {
            success: instance.state == WorkflowState::Completed,
            error: instance.error.clone(),
            data: serde_json::Value::Null,
        })
    }
}

/// The workflow engine: driver registry plus instance lifecycle.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    registry: DashMap<String, Arc<dyn WorkflowDriver>>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            registry: DashMap::new(),
        }
    }

    pub fn register(&self, driver: Arc<dyn WorkflowDriver>) {
        self.registry.insert(driver.name().to_string(), driver);
    }

    pub fn store(&self) -> Arc<dyn WorkflowStore> {
        Arc::clone(&self.store)
    }

    /// Handle for an already-submitted instance, e.g. for a poller that only
    /// kept the id.
    pub fn handle(&self, id: WorkflowId) -> WorkflowHandle {
        WorkflowHandle {
            store: Arc::clone(&self.store),
            id,
            created: false,
        }
    }

    /// Submit a workflow run.
    ///
    /// A fresh `(org, name, key)` creates the instance and spawns the driver;
    /// a duplicate attaches to the existing instance without running anything
    /// in this call. An attached instance that crashed mid-run is re-driven
    /// by the recovery worker, never by re-submission.
    pub async fn submit(
        self: &Arc<Self>,
        ctx: &TenantContext,
        name: &str,
        idempotency_key: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowHandle, CoreError> {
        if !self.registry.contains_key(name) {
            return Err(CoreError::Validation(format!(
                "unknown workflow driver: {name}"
            )));
        }

        let instance =
            WorkflowInstance::new(ctx.org_id, ctx.acting_user, name, idempotency_key, input);
        let submission = self.store.create_instance(instance).await?;

        if submission.created {
            info!(
                workflow_id = %submission.instance.id,
                name,
                idempotency_key,
                "Workflow submitted"
            );
            let engine = Arc::clone(self);
            let instance = submission.instance.clone();
            tokio::spawn(async move {
                engine.drive(instance).await;
            });
        } else {
            info!(
                workflow_id = %submission.instance.id,
                name,
                idempotency_key,
                "Duplicate submission, attached to existing workflow"
            );
        }

        Ok(WorkflowHandle {
            store: Arc::clone(&self.store),
            id: submission.instance.id,
            created: submission.created,
        })
    }

    /// Re-drive an instance found stale by the recovery worker.
    ///
    /// Safe against the original task still being alive: steps replay from
    /// their records and the terminal CAS lets only one finisher through.
    pub async fn resume(self: &Arc<Self>, id: WorkflowId) -> Result<WorkflowState, CoreError> {
        let instance = self.store.get_instance(id).await?;
        if instance.state.is_terminal() {
            return Ok(instance.state);
        }

        let retry_count = self.store.touch_for_retry(id).await?;
        info!(workflow_id = %id, name = %instance.name, retry_count, "Resuming workflow");
        self.drive(instance).await;
        Ok(self.store.get_instance(id).await?.state)
    }

    /// Run the driver to completion and record the terminal outcome.
    async fn drive(&self, instance: WorkflowInstance) {
        let Some(driver) = self
            .registry
            .get(&instance.name)
            .map(|entry| Arc::clone(entry.value()))
        else {
            // Registry drift: instance persisted under a name no longer
            // registered. Leave it RUNNING for an operator; failing it would
            // discard work a redeploy could finish.
            error!(
                workflow_id = %instance.id,
                name = %instance.name,
                "No driver registered for persisted workflow"
            );
            return;
        };

        let step = StepCtx {
            store: Arc::clone(&self.store),
            workflow_id: instance.id,
            tenant: TenantContext::new(
                instance.org_id,
                instance.acting_user,
                format!("workflow:{}", instance.name),
            ),
            input: instance.input.clone(),
        };

        let outcome = match driver.run(step).await {
            Ok(data) => WorkflowOutcome::ok(data),
            Err(e) => {
                warn!(
                    workflow_id = %instance.id,
                    name = %instance.name,
                    error = %e,
                    "Workflow failed"
                );
                let _ = self
                    .store
                    .append_event(
                        instance.id,
                        EventKind::Error,
                        serde_json::json!({"code": e.code(), "error": e.to_string()}),
                    )
                    .await;
                WorkflowOutcome::failed(e.to_string())
            }
        };

        if let Err(e) = self.finish(&instance, outcome).await {
            // The instance stays RUNNING and the recovery worker will
            // re-drive it; every step will then replay from its record.
            error!(
                workflow_id = %instance.id,
                error = %e,
                "Failed to record workflow outcome"
            );
        }
    }

    async fn finish(
        &self,
        instance: &WorkflowInstance,
        outcome: WorkflowOutcome,
    ) -> Result<(), CoreError> {
        let moved = self
            .store
            .set_terminal(instance.id, outcome.state(), outcome.error.clone())
            .await?;
        if !moved {
            // A racing re-drive already finished this instance.
            return Ok(());
        }
        self.store
            .append_event(
                instance.id,
                EventKind::Terminal,
                serde_json::to_value(&outcome)?,
            )
            .await?;
        info!(
            workflow_id = %instance.id,
            name = %instance.name,
            state = %outcome.state(),
            "Workflow finished"
        );
        Ok(())
    }
}
