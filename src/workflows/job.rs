//! Job Workflow
//!
//! Drives a job through its lifecycle. Every action transitions the job,
//! pushes the mapped status onto the linked work order (when one exists),
//! and queues a best-effort notification that never fails the run.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::Services;
use crate::core_types::EntityId;
use crate::error::CoreError;
use crate::lifecycle::{EntityKind, EntityStatus, JobStatus};
use crate::syncmap::{SyncDirection, apply_sync};
use crate::workflow::{StepCtx, WorkflowDriver};

/// One variant per job action; each owns its own input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobAction {
    Schedule { job_id: EntityId },
    Dispatch { job_id: EntityId },
    Start { job_id: EntityId },
    Complete { job_id: EntityId, notes: Option<String> },
    Close { job_id: EntityId },
    Cancel { job_id: EntityId, notes: Option<String> },
}

impl JobAction {
    pub fn job_id(&self) -> EntityId {
        match self {
            JobAction::Schedule { job_id }
            | JobAction::Dispatch { job_id }
            | JobAction::Start { job_id }
            | JobAction::Complete { job_id, .. }
            | JobAction::Close { job_id }
            | JobAction::Cancel { job_id, .. } => *job_id,
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            JobAction::Schedule { .. } => JobStatus::Scheduled,
            JobAction::Dispatch { .. } => JobStatus::Dispatched,
            JobAction::Start { .. } => JobStatus::InProgress,
            JobAction::Complete { .. } => JobStatus::Completed,
            JobAction::Close { .. } => JobStatus::Closed,
            JobAction::Cancel { .. } => JobStatus::Cancelled,
        }
    }

    fn notes(&self) -> Option<String> {
        match self {
            JobAction::Complete { notes, .. } | JobAction::Cancel { notes, .. } => notes.clone(),
            _ => None,
        }
    }
}

/// Recorded output of the transition step. Carries the link so replayed runs
/// make the same sync decision as the first attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TransitionRecord {
    pub entity_id: EntityId,
    pub previous: String,
    pub current: String,
    pub changed: bool,
    pub linked_id: Option<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SyncRecord {
    pub secondary_id: EntityId,
    pub previous: String,
    pub current: String,
    pub changed: bool,
}

/// Recorded output of the best-effort notification step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NotifyRecord {
    pub queued: bool,
    pub warning: Option<String>,
}

/// Queue a notification without letting a sink failure poison the run. The
/// failure is recorded in the step output and as an error event, so the
/// primary outcome that already committed stays committed.
pub(crate) async fn notify_best_effort(
    step: &StepCtx,
    services: &Services,
    kind: &'static str,
    payload: serde_json::Value,
) -> Result<NotifyRecord, CoreError> {
    let record = step
        .run_step("queue_notification", || async {
            match services.notify.queue(step.tenant.org_id, kind, payload).await {
                Ok(()) => Ok(NotifyRecord {
                    queued: true,
                    warning: None,
                }),
                Err(e) => {
                    warn!(kind, error = %e, "Notification sink failed, continuing");
                    Ok(NotifyRecord {
                        queued: false,
                        warning: Some(e.to_string()),
                    })
                }
            }
        })
        .await?;
    if let Some(warning) = &record.warning {
        step.note_error(warning).await?;
    }
    Ok(record)
}

pub struct JobDriver {
    services: Services,
}

impl JobDriver {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

impl WorkflowDriver for JobDriver {
    fn name(&self) -> &'static str {
        "job"
    }

    fn run<'a>(&'a self, step: StepCtx) -> BoxFuture<'a, Result<serde_json::Value, CoreError>> {
        Box::pin(async move {
            let action: JobAction = serde_json::from_value(step.input.clone())?;
            let job_id = action.job_id();
            let target = EntityStatus::Job(action.target());

            let transition: TransitionRecord = step
                .run_step("transition", || async {
                    let outcome = self
                        .services
                        .entities
                        .transition(&step.tenant, EntityKind::Job, job_id, target, action.notes())
                        .await?;
                    Ok(TransitionRecord {
                        entity_id: outcome.entity.id,
                        previous: outcome.previous.as_str().to_string(),
                        current: outcome.entity.status.as_str().to_string(),
                        changed: outcome.changed,
                        linked_id: outcome.entity.link.as_ref().map(|link| link.id),
                    })
                })
                .await?;
            step.progress(json!({
                "step": "job_transitioned",
                "job_id": job_id,
                "status": transition.current,
                "changed": transition.changed,
            }))
            .await?;

            let sync = match transition.linked_id {
                Some(work_order_id) => Some(
                    step.run_step("sync_work_order", || async {
                        let outcome = apply_sync(
                            self.services.entities.as_ref(),
                            self.services.audit.as_ref(),
                            &step.tenant,
                            SyncDirection::JobToWorkOrder,
                            job_id,
                            work_order_id,
                        )
                        .await?;
                        Ok(SyncRecord {
                            secondary_id: work_order_id,
                            previous: outcome.previous.as_str().to_string(),
                            current: outcome.new.as_str().to_string(),
                            changed: outcome.changed,
                        })
                    })
                    .await?,
                ),
                None => None,
            };

            let notified = notify_best_effort(
                &step,
                &self.services,
                "job_status",
                json!({"job_id": job_id, "status": transition.current}),
            )
            .await?;

            Ok(json!({
                "job_id": job_id,
                "status": transition.current,
                "changed": transition.changed,
                "work_order": sync.map(|s| json!({
                    "id": s.secondary_id,
                    "status": s.current,
                    "changed": s.changed,
                })),
                "notification_queued": notified.queued,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::mock::FailingNotificationSink;
    use crate::audit::{MemoryAuditSink, TracingNotificationSink};
    use crate::billing::MemoryBillingStore;
    use crate::lifecycle::{EntityLink, MemoryEntityStore, NewEntity, WorkOrderStatus};
    use crate::tenant::TenantContext;
    use crate::workflow::{MemoryWorkflowStore, WorkflowEngine};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn services(notify: Arc<dyn crate::audit::NotificationSink>) -> Services {
        let audit = Arc::new(MemoryAuditSink::default());
        Services {
            entities: Arc::new(MemoryEntityStore::new(audit.clone())),
            billing: Arc::new(MemoryBillingStore::new(audit.clone())),
            audit,
            notify,
        }
    }

    fn engine(services: &Services) -> Arc<WorkflowEngine> {
        let engine = Arc::new(WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new())));
        super::super::register_all(&engine, services);
        engine
    }

    async fn seed_linked_job(
        services: &Services,
        ctx: &TenantContext,
    ) -> (EntityId, EntityId) {
        let work_order = services
            .entities
            .create(
                ctx,
                NewEntity {
                    kind: EntityKind::WorkOrder,
                    title: "fix fence".into(),
                    link: None,
                },
            )
            .await
            .unwrap();
        let job = services
            .entities
            .create(
                ctx,
                NewEntity {
                    kind: EntityKind::Job,
                    title: "fence job".into(),
                    link: Some(EntityLink {
                        kind: EntityKind::WorkOrder,
                        id: work_order.id,
                    }),
                },
            )
            .await
            .unwrap();
        services
            .entities
            .link(
                ctx,
                EntityKind::WorkOrder,
                work_order.id,
                EntityLink {
                    kind: EntityKind::Job,
                    id: job.id,
                },
            )
            .await
            .unwrap();
        (job.id, work_order.id)
    }

    #[tokio::test]
    async fn test_schedule_syncs_linked_work_order() {
        let services = services(Arc::new(TracingNotificationSink));
        let engine = engine(&services);
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        let (job_id, work_order_id) = seed_linked_job(&services, &ctx).await;

        let handle = engine
            .submit(
                &ctx,
                "job",
                "sched-1",
                serde_json::to_value(JobAction::Schedule { job_id }).unwrap(),
            )
            .await
            .unwrap();
        let outcome = handle.result().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.data["status"], "SCHEDULED");

        let job = services
            .entities
            .get(&ctx, EntityKind::Job, job_id)
            .await
            .unwrap();
        assert_eq!(job.status, EntityStatus::Job(JobStatus::Scheduled));
        // Scheduled maps to the work order's landing status.
        let work_order = services
            .entities
            .get(&ctx, EntityKind::WorkOrder, work_order_id)
            .await
            .unwrap();
        assert_eq!(
            work_order.status,
            EntityStatus::WorkOrder(WorkOrderStatus::Incoming)
        );
    }

    #[tokio::test]
    async fn test_dispatch_then_resubmit_is_single_run() {
        let services = services(Arc::new(TracingNotificationSink));
        let engine = engine(&services);
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        let (job_id, work_order_id) = seed_linked_job(&services, &ctx).await;

        let input = serde_json::to_value(JobAction::Schedule { job_id }).unwrap();
        engine
            .submit(&ctx, "job", "sched-1", input.clone())
            .await
            .unwrap()
            .result()
            .await
            .unwrap();

        let dispatch = serde_json::to_value(JobAction::Dispatch { job_id }).unwrap();
        let first = engine
            .submit(&ctx, "job", "dispatch-1", dispatch.clone())
            .await
            .unwrap();
        let second = engine
            .submit(&ctx, "job", "dispatch-1", dispatch)
            .await
            .unwrap();
        assert_eq!(first.result().await.unwrap().data["status"], "DISPATCHED");
        assert!(!second.created);

        // Exactly one transition plus one sync: one history row each.
        let job_history = services
            .entities
            .history(&ctx, EntityKind::Job, job_id)
            .await
            .unwrap();
        assert_eq!(
            job_history
                .iter()
                .filter(|row| row.to_status == EntityStatus::Job(JobStatus::Dispatched))
                .count(),
            1
        );
        let wo_history = services
            .entities
            .history(&ctx, EntityKind::WorkOrder, work_order_id)
            .await
            .unwrap();
        assert_eq!(
            wo_history
                .iter()
                .filter(|row| row.to_status == EntityStatus::WorkOrder(WorkOrderStatus::Dispatched))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_transition_fails_run() {
        let services = services(Arc::new(TracingNotificationSink));
        let engine = engine(&services);
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        let (job_id, _) = seed_linked_job(&services, &ctx).await;

        // Draft -> Closed is not in the transition table.
        let outcome = engine
            .submit(
                &ctx,
                "job",
                "close-1",
                serde_json::to_value(JobAction::Close { job_id }).unwrap(),
            )
            .await
            .unwrap()
            .result()
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("transition"));
        let job = services
            .entities
            .get(&ctx, EntityKind::Job, job_id)
            .await
            .unwrap();
        assert_eq!(job.status, EntityStatus::Job(JobStatus::Draft));
    }

    #[tokio::test]
    async fn test_notification_failure_is_non_fatal() {
        let failing = Arc::new(FailingNotificationSink::default());
        let services = services(failing.clone());
        let engine = engine(&services);
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        let (job_id, _) = seed_linked_job(&services, &ctx).await;

        let handle = engine
            .submit(
                &ctx,
                "job",
                "sched-1",
                serde_json::to_value(JobAction::Schedule { job_id }).unwrap(),
            )
            .await
            .unwrap();
        let outcome = handle.result().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.data["notification_queued"], false);
        assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
        // The failure is visible in the status stream.
        assert!(handle.latest_error().await.unwrap().is_some());
    }
}
