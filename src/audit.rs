//! Audit and Collaborator Seams
//!
//! Every state transition and money movement emits one structured
//! [`ActivityEvent`]. The core calls the sink but does not own its storage —
//! production deployments plug in their activity-log writer; the default
//! sink emits structured tracing records.
//!
//! Notifications are best-effort trailing work: a failing
//! [`NotificationSink`] must never fail the workflow's primary outcome, so
//! callers wrap `queue` and degrade failures to warnings.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::core_types::{OrgId, UserId};
use crate::error::CoreError;

/// One structured activity record.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub org_id: OrgId,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub action: String,
    pub performed_by: UserId,
    pub previous_state: Option<String>,
    pub new_state: Option<String>,
}

/// External audit/event sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: ActivityEvent);
}

/// Default sink: structured tracing emission under the `audit` target.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: ActivityEvent) {
        tracing::info!(
            target: "audit",
            org_id = %event.org_id,
            entity_type = event.entity_type,
            entity_id = %event.entity_id,
            action = %event.action,
            performed_by = %event.performed_by,
            previous_state = event.previous_state.as_deref().unwrap_or("-"),
            new_state = event.new_state.as_deref().unwrap_or("-"),
            "activity"
        );
    }
}

/// Recording sink. Used by tests to assert on emitted events; also usable as
/// a buffer in embedded deployments.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: ActivityEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Best-effort notification collaborator.
///
/// Invoked as a trailing workflow step; errors are caught by the caller and
/// recorded as non-fatal warnings.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn queue(
        &self,
        org_id: OrgId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), CoreError>;
}

/// Default notification sink: logs the queued notification.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn queue(
        &self,
        org_id: OrgId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), CoreError> {
        tracing::info!(target: "notify", org_id = %org_id, kind, %payload, "notification queued");
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Notification sink that always fails. Verifies best-effort semantics.
    #[derive(Default)]
    pub struct FailingNotificationSink {
        pub attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for FailingNotificationSink {
        async fn queue(
            &self,
            _org_id: OrgId,
            kind: &str,
            _payload: serde_json::Value,
        ) -> Result<(), CoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Downstream(format!(
                "notification channel unavailable: {kind}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemoryAuditSink::new();
        sink.record(ActivityEvent {
            org_id: Uuid::new_v4(),
            entity_type: "work_order",
            entity_id: Uuid::new_v4().to_string(),
            action: "status_transition".into(),
            performed_by: Uuid::new_v4(),
            previous_state: Some("DISPATCHED".into()),
            new_state: Some("IN_PROGRESS".into()),
        })
        .await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "status_transition");
        assert_eq!(events[0].previous_state.as_deref(), Some("DISPATCHED"));
    }
}
