//! Workflow Core Types
//!
//! Type definitions for durable workflow instances, recorded steps, and the
//! append-only status event stream.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{OrgId, UserId};

/// Workflow instance ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed (no machine_id)
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowId(ulid::Ulid);

impl WorkflowId {
    /// Generate a new unique WorkflowId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Instance execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum WorkflowState {
    Running = 0,
    Completed = 1,
    Failed = -1,
}

impl WorkflowState {
    /// Get numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WorkflowState::Running),
            1 => Some(WorkflowState::Completed),
            -1 => Some(WorkflowState::Failed),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Running => "RUNNING",
            WorkflowState::Completed => "COMPLETED",
            WorkflowState::Failed => "FAILED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowState::Running)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One durable workflow instance.
///
/// `(org_id, name, idempotency_key)` is unique: submitting the same key twice
/// attaches to the existing instance instead of creating a second run.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    pub org_id: OrgId,
    /// Acting user captured at submission, so recovery re-runs under the
    /// same identity.
    pub acting_user: UserId,
    /// Registered driver name, e.g. `"billing_run"`.
    pub name: String,
    pub idempotency_key: String,
    pub input: serde_json::Value,
    pub state: WorkflowState,
    /// Last error message (for debugging)
    pub error: Option<String>,
    /// Recovery attempt count
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new instance in RUNNING state
    pub fn new(
        org_id: OrgId,
        acting_user: UserId,
        name: impl Into<String>,
        idempotency_key: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            org_id,
            acting_user,
            name: name.into(),
            idempotency_key: idempotency_key.into(),
            input,
            state: WorkflowState::Running,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl fmt::Display for WorkflowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Workflow[{}] {} key={} org={} state={}",
            self.id, self.name, self.idempotency_key, self.org_id, self.state
        )
    }
}

/// A completed step's recorded output. Identity = `(workflow_id, step_name)`;
/// the first recorded output wins and all replays read it back.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub output: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Classification of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum EventKind {
    Progress = 1,
    Error = 2,
    Terminal = 3,
}

impl EventKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(EventKind::Progress),
            2 => Some(EventKind::Error),
            3 => Some(EventKind::Terminal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "PROGRESS",
            EventKind::Error => "ERROR",
            EventKind::Terminal => "TERMINAL",
        }
    }
}

/// One entry in an instance's append-only status stream. `seq` is assigned
/// by the store and strictly increases per instance.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub workflow_id: WorkflowId,
    pub seq: i64,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Final result of a workflow run, recorded as the terminal event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WorkflowOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: serde_json::Value::Null,
        }
    }

    pub fn state(&self) -> WorkflowState {
        if self.success {
            WorkflowState::Completed
        } else {
            WorkflowState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_workflow_state_roundtrip() {
        for state in [
            WorkflowState::Running,
            WorkflowState::Completed,
            WorkflowState::Failed,
        ] {
            assert_eq!(WorkflowState::from_id(state.id()), Some(state));
        }
        assert_eq!(WorkflowState::from_id(2), None);
        assert_eq!(WorkflowState::from_id(-2), None);
    }

    #[test]
    fn test_workflow_state_terminal() {
        assert!(!WorkflowState::Running.is_terminal());
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
    }

    #[test]
    fn test_event_kind_roundtrip() {
        for kind in [EventKind::Progress, EventKind::Error, EventKind::Terminal] {
            assert_eq!(EventKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(EventKind::from_id(0), None);
    }

    #[test]
    fn test_workflow_id_parse() {
        let id = WorkflowId::new();
        let parsed: WorkflowId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_instance_new() {
        let instance = WorkflowInstance::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "billing_run",
            "inv-2024-06",
            json!({"unit": 1}),
        );
        assert_eq!(instance.state, WorkflowState::Running);
        assert_eq!(instance.retry_count, 0);
        assert!(instance.error.is_none());
    }

    #[test]
    fn test_outcome_state() {
        assert_eq!(
            WorkflowOutcome::ok(json!({})).state(),
            WorkflowState::Completed
        );
        let failed = WorkflowOutcome::failed("boom");
        assert_eq!(failed.state(), WorkflowState::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_outcome_serde_omits_absent_error() {
        let value = serde_json::to_value(WorkflowOutcome::ok(json!({"n": 1}))).unwrap();
        assert_eq!(value, json!({"success": true, "data": {"n": 1}}));
    }
}
