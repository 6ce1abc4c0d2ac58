//! In-Memory Workflow Store
//!
//! DashMap-backed store for tests and single-process dev mode. Mirrors the
//! Postgres backend's conflict semantics: entry-level locking makes instance
//! submission and step recording first-writer-wins.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::store::{Submission, WorkflowStore};
use super::types::{EventKind, StatusEvent, StepRecord, WorkflowId, WorkflowInstance, WorkflowState};
use crate::core_types::OrgId;
use crate::error::CoreError;

#[derive(Default)]
pub struct MemoryWorkflowStore {
    instances: DashMap<WorkflowId, WorkflowInstance>,
    /// `(org_id, name, idempotency_key)` -> instance id
    keys: DashMap<(OrgId, String, String), WorkflowId>,
    steps: DashMap<(WorkflowId, String), StepRecord>,
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn instance_not_found(id: WorkflowId) -> CoreError {
        CoreError::NotFound(format!("workflow {id} not found"))
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<Submission, CoreError> {
        let key = (
            instance.org_id,
            instance.name.clone(),
            instance.idempotency_key.clone(),
        );
        // The entry guard serializes racing submissions on the same key.
        match self.keys.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let id = *existing.get();
                let instance = self
                    .instances
                    .get(&id)
                    .map(|entry| entry.clone())
                    .ok_or_else(|| Self::instance_not_found(id))?;
                Ok(Submission {
                    instance,
                    created: false,
                })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(instance.id);
                self.instances.insert(instance.id, instance.clone());
                Ok(Submission {
                    instance,
                    created: true,
                })
            }
        }
    }

    async fn get_instance(&self, id: WorkflowId) -> Result<WorkflowInstance, CoreError> {
        self.instances
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Self::instance_not_found(id))
    }

    async fn record_step(
        &self,
        workflow_id: WorkflowId,
        step_name: &str,
        output: serde_json::Value,
    ) -> Result<StepRecord, CoreError> {
        if !self.instances.contains_key(&workflow_id) {
            return Err(Self::instance_not_found(workflow_id));
        }
        let record = self
            .steps
            .entry((workflow_id, step_name.to_string()))
            .or_insert_with(|| StepRecord {
                workflow_id,
                step_name: step_name.to_string(),
                output,
                recorded_at: Utc::now(),
            })
            .clone();
        Ok(record)
    }

    async fn get_step(
        &self,
        workflow_id: WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepRecord>, CoreError> {
        Ok(self
            .steps
            .get(&(workflow_id, step_name.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn append_event(
        &self,
        workflow_id: WorkflowId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<StatusEvent, CoreError> {
        if !self.instances.contains_key(&workflow_id) {
            return Err(Self::instance_not_found(workflow_id));
        }
        let mut events = self
            .events
            .lock()
            .map_err(|_| CoreError::Internal("workflow event log poisoned".into()))?;
        let seq = events
            .iter()
            .filter(|event| event.workflow_id == workflow_id)
            .map(|event| event.seq)
            .max()
            .unwrap_or(0)
            + 1;
        let event = StatusEvent {
            workflow_id,
            seq,
            kind,
            payload,
            recorded_at: Utc::now(),
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn events(&self, workflow_id: WorkflowId) -> Result<Vec<StatusEvent>, CoreError> {
        let events = self
            .events
            .lock()
            .map_err(|_| CoreError::Internal("workflow event log poisoned".into()))?;
        let mut stream: Vec<StatusEvent> = events
            .iter()
            .filter(|event| event.workflow_id == workflow_id)
            .cloned()
            .collect();
        stream.sort_by_key(|event| event.seq);
        Ok(stream)
    }

    async fn set_terminal(
        &self,
        workflow_id: WorkflowId,
        state: WorkflowState,
        error: Option<String>,
    ) -> Result<bool, CoreError> {
        if !state.is_terminal() {
            return Err(CoreError::Internal(format!(
                "set_terminal called with non-terminal state {state}"
            )));
        }
        let mut entry = self
            .instances
            .get_mut(&workflow_id)
            .ok_or_else(|| Self::instance_not_found(workflow_id))?;
        if entry.state.is_terminal() {
            return Ok(false);
        }
        entry.state = state;
        entry.error = error;
        entry.updated_at = Utc::now();
        Ok(true)
    }

    async fn touch_for_retry(&self, workflow_id: WorkflowId) -> Result<i32, CoreError> {
        let mut entry = self
            .instances
            .get_mut(&workflow_id)
            .ok_or_else(|| Self::instance_not_found(workflow_id))?;
        entry.retry_count += 1;
        entry.updated_at = Utc::now();
        Ok(entry.retry_count)
    }

    async fn find_stale(&self, threshold: Duration) -> Result<Vec<WorkflowInstance>, CoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| CoreError::Internal(format!("stale threshold out of range: {e}")))?;
        let mut stale: Vec<WorkflowInstance> = self
            .instances
            .iter()
            .filter(|entry| entry.state == WorkflowState::Running && entry.updated_at < cutoff)
            .map(|entry| entry.clone())
            .collect();
        stale.sort_by_key(|instance| instance.id);
        Ok(stale)
    }
}
