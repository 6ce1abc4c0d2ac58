//! Postgres Workflow Store
//!
//! Durable backend for the step executor. Instances span tenants (the
//! executor itself is platform infrastructure; tenant scoping happens inside
//! workflow steps), so this store binds the pool directly instead of going
//! through `TenantScope`.
//!
//! Idempotency lives in the schema:
//! - `workflow_instances` has a unique index on `(org_id, name, idempotency_key)`
//! - `workflow_steps` has primary key `(workflow_id, step_name)`
//!
//! Both inserts use `ON CONFLICT DO NOTHING` and then read the winning row,
//! so racing writers converge on one record.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use std::time::Duration;
use tracing::debug;

use super::store::{Submission, WorkflowStore};
use super::types::{
    EventKind, StatusEvent, StepRecord, WorkflowId, WorkflowInstance, WorkflowState,
};
use crate::error::CoreError;

pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_INSTANCE: &str = r#"
    SELECT id, org_id, acting_user, name, idempotency_key, input, state,
           error, retry_count, created_at, updated_at
    FROM workflow_instances
"#;

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::Database(format!("invalid workflow id: {raw}")))
}

fn row_to_instance(row: &PgRow) -> Result<WorkflowInstance, CoreError> {
    let id: String = row.get("id");
    let state_id: i16 = row.get("state");
    let state = WorkflowState::from_id(state_id)
        .ok_or_else(|| CoreError::Database(format!("invalid workflow state id: {state_id}")))?;
    Ok(WorkflowInstance {
        id: parse_workflow_id(&id)?,
        org_id: row.get("org_id"),
        acting_user: row.get("acting_user"),
        name: row.get("name"),
        idempotency_key: row.get("idempotency_key"),
        input: row.get("input"),
        state,
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_step(row: &PgRow) -> Result<StepRecord, CoreError> {
    let id: String = row.get("workflow_id");
    Ok(StepRecord {
        workflow_id: parse_workflow_id(&id)?,
        step_name: row.get("step_name"),
        output: row.get("output"),
        recorded_at: row.get("recorded_at"),
    })
}

fn row_to_event(row: &PgRow) -> Result<StatusEvent, CoreError> {
    let id: String = row.get("workflow_id");
    let kind_id: i16 = row.get("kind");
    let kind = EventKind::from_id(kind_id)
        .ok_or_else(|| CoreError::Database(format!("invalid event kind id: {kind_id}")))?;
    Ok(StatusEvent {
        workflow_id: parse_workflow_id(&id)?,
        seq: row.get("seq"),
        kind,
        payload: row.get("payload"),
        recorded_at: row.get("recorded_at"),
    })
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<Submission, CoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (id, org_id, acting_user, name, idempotency_key, input, state,
                 error, retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (org_id, name, idempotency_key) DO NOTHING
            "#,
        )
        .bind(instance.id.to_string())
        .bind(instance.org_id)
        .bind(instance.acting_user)
        .bind(&instance.name)
        .bind(&instance.idempotency_key)
        .bind(&instance.input)
        .bind(instance.state.id())
        .bind(&instance.error)
        .bind(instance.retry_count)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Submission {
                instance,
                created: true,
            });
        }

        debug!(
            name = %instance.name,
            idempotency_key = %instance.idempotency_key,
            "Duplicate workflow submission, attaching to existing instance"
        );
        let row = sqlx::query(&format!(
            "{SELECT_INSTANCE} WHERE org_id = $1 AND name = $2 AND idempotency_key = $3"
        ))
        .bind(instance.org_id)
        .bind(&instance.name)
        .bind(&instance.idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(Submission {
            instance: row_to_instance(&row)?,
            created: false,
        })
    }

    async fn get_instance(&self, id: WorkflowId) -> Result<WorkflowInstance, CoreError> {
        let row = sqlx::query(&format!("{SELECT_INSTANCE} WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {id} not found")))?;
        row_to_instance(&row)
    }

    async fn record_step(
        &self,
        workflow_id: WorkflowId,
        step_name: &str,
        output: serde_json::Value,
    ) -> Result<StepRecord, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (workflow_id, step_name, output, recorded_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workflow_id, step_name) DO NOTHING
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(step_name)
        .bind(&output)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        // Read back the winning row; a racing writer may have beaten us.
        let row = sqlx::query(
            r#"
            SELECT workflow_id, step_name, output, recorded_at
            FROM workflow_steps
            WHERE workflow_id = $1 AND step_name = $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(step_name)
        .fetch_one(&self.pool)
        .await?;
        row_to_step(&row)
    }

    async fn get_step(
        &self,
        workflow_id: WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepRecord>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, step_name, output, recorded_at
            FROM workflow_steps
            WHERE workflow_id = $1 AND step_name = $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_step).transpose()
    }

    async fn append_event(
        &self,
        workflow_id: WorkflowId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<StatusEvent, CoreError> {
        // seq is claimed in the insert itself; the unique (workflow_id, seq)
        // constraint turns a racing append into a retryable conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_events (workflow_id, seq, kind, payload, recorded_at)
            SELECT $1, COALESCE(MAX(seq), 0) + 1, $2, $3, $4
            FROM workflow_events
            WHERE workflow_id = $1
            RETURNING workflow_id, seq, kind, payload, recorded_at
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(kind.id())
        .bind(&payload)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                CoreError::ConcurrencyConflict(format!(
                    "concurrent event append on workflow {workflow_id}"
                ))
            }
            other => other.into(),
        })?;
        row_to_event(&row)
    }

    async fn events(&self, workflow_id: WorkflowId) -> Result<Vec<StatusEvent>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, seq, kind, payload, recorded_at
            FROM workflow_events
            WHERE workflow_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
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
        // CAS from RUNNING; an already-terminal instance is left untouched.
        let updated = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET state = $1, error = $2, updated_at = $3
            WHERE id = $4 AND state = $5
            "#,
        )
        .bind(state.id())
        .bind(&error)
        .bind(Utc::now())
        .bind(workflow_id.to_string())
        .bind(WorkflowState::Running.id())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "already terminal" from "no such instance".
        self.get_instance(workflow_id).await?;
        Ok(false)
    }

    async fn touch_for_retry(&self, workflow_id: WorkflowId) -> Result<i32, CoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET retry_count = retry_count + 1, updated_at = $1
            WHERE id = $2
            RETURNING retry_count
            "#,
        )
        .bind(Utc::now())
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id} not found")))?;
        Ok(row.get("retry_count"))
    }

    async fn find_stale(&self, threshold: Duration) -> Result<Vec<WorkflowInstance>, CoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| CoreError::Internal(format!("stale threshold out of range: {e}")))?;
        let rows = sqlx::query(&format!(
            "{SELECT_INSTANCE} WHERE state = $1 AND updated_at < $2 ORDER BY updated_at ASC"
        ))
        .bind(WorkflowState::Running.id())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_instance).collect()
    }
}
