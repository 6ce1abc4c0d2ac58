//! Work Order Workflow
//!
//! Mirror of the job workflow driven from the work order side: the work
//! order transitions first, then the mapped status flows back to the linked
//! job. Sync runs in exactly one direction per invocation.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Services;
use super::job::{SyncRecord, TransitionRecord, notify_best_effort};
use crate::core_types::EntityId;
use crate::error::CoreError;
use crate::lifecycle::{EntityKind, EntityStatus, WorkOrderStatus};
use crate::syncmap::{SyncDirection, apply_sync};
use crate::workflow::{StepCtx, WorkflowDriver};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkOrderAction {
    Assign { work_order_id: EntityId },
    Dispatch { work_order_id: EntityId },
    Start { work_order_id: EntityId },
    Complete { work_order_id: EntityId, notes: Option<String> },
    Close { work_order_id: EntityId },
    Cancel { work_order_id: EntityId, notes: Option<String> },
}

impl WorkOrderAction {
    pub fn work_order_id(&self) -> EntityId {
        match self {
            WorkOrderAction::Assign { work_order_id }
            | WorkOrderAction::Dispatch { work_order_id }
            | WorkOrderAction::Start { work_order_id }
            | WorkOrderAction::Complete { work_order_id, .. }
            | WorkOrderAction::Close { work_order_id }
            | WorkOrderAction::Cancel { work_order_id, .. } => *work_order_id,
        }
    }

    pub fn target(&self) -> WorkOrderStatus {
        match self {
            WorkOrderAction::Assign { .. } => WorkOrderStatus::Assigned,
            WorkOrderAction::Dispatch { .. } => WorkOrderStatus::Dispatched,
            WorkOrderAction::Start { .. } => WorkOrderStatus::InProgress,
            WorkOrderAction::Complete { .. } => WorkOrderStatus::Completed,
            WorkOrderAction::Close { .. } => WorkOrderStatus::Closed,
            WorkOrderAction::Cancel { .. } => WorkOrderStatus::Cancelled,
        }
    }

    fn notes(&self) -> Option<String> {
        match self {
            WorkOrderAction::Complete { notes, .. } | WorkOrderAction::Cancel { notes, .. } => {
                notes.clone()
            }
            _ => None,
        }
    }
}

pub struct WorkOrderDriver {
    services: Services,
}

impl WorkOrderDriver {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

impl WorkflowDriver for WorkOrderDriver {
    fn name(&self) -> &'static str {
        "work_order"
    }

    fn run<'a>(&'a self, step: StepCtx) -> BoxFuture<'a, Result<serde_json::Value, CoreError>> {
        Box::pin(async move {
            let action: WorkOrderAction = serde_json::from_value(step.input.clone())?;
            let work_order_id = action.work_order_id();
            let target = EntityStatus::WorkOrder(action.target());

            let transition: TransitionRecord = step
                .run_step("transition", || async {
                    let outcome = self
                        .services
                        .entities
                        .transition(
                            &step.tenant,
                            EntityKind::WorkOrder,
                            work_order_id,
                            target,
                            action.notes(),
                        )
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
                "step": "work_order_transitioned",
                "work_order_id": work_order_id,
                "status": transition.current,
                "changed": transition.changed,
            }))
            .await?;

            let sync = match transition.linked_id {
                Some(job_id) => Some(
                    step.run_step("sync_job", || async {
                        let outcome = apply_sync(
                            self.services.entities.as_ref(),
                            self.services.audit.as_ref(),
                            &step.tenant,
                            SyncDirection::WorkOrderToJob,
                            work_order_id,
                            job_id,
                        )
                        .await?;
                        Ok(SyncRecord {
                            secondary_id: job_id,
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
                "work_order_status",
                json!({"work_order_id": work_order_id, "status": transition.current}),
            )
            .await?;

            Ok(json!({
                "work_order_id": work_order_id,
                "status": transition.current,
                "changed": transition.changed,
                "job": sync.map(|s| json!({
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
    use crate::audit::{MemoryAuditSink, TracingNotificationSink};
    use crate::billing::MemoryBillingStore;
    use crate::lifecycle::{EntityLink, JobStatus, MemoryEntityStore, NewEntity};
    use crate::tenant::TenantContext;
    use crate::workflow::{MemoryWorkflowStore, WorkflowEngine};
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup() -> (Services, Arc<WorkflowEngine>, TenantContext) {
        let audit = Arc::new(MemoryAuditSink::default());
        let services = Services {
            entities: Arc::new(MemoryEntityStore::new(audit.clone())),
            billing: Arc::new(MemoryBillingStore::new(audit.clone())),
            audit,
            notify: Arc::new(TracingNotificationSink),
        };
        let engine = Arc::new(WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new())));
        super::super::register_all(&engine, &services);
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        (services, engine, ctx)
    }

    async fn seed_linked_pair(services: &Services, ctx: &TenantContext) -> (EntityId, EntityId) {
        let job = services
            .entities
            .create(
                ctx,
                NewEntity {
                    kind: EntityKind::Job,
                    title: "roof job".into(),
                    link: None,
                },
            )
            .await
            .unwrap();
        let work_order = services
            .entities
            .create(
                ctx,
                NewEntity {
                    kind: EntityKind::WorkOrder,
                    title: "roof repair".into(),
                    link: Some(EntityLink {
                        kind: EntityKind::Job,
                        id: job.id,
                    }),
                },
            )
            .await
            .unwrap();
        services
            .entities
            .link(
                ctx,
                EntityKind::Job,
                job.id,
                EntityLink {
                    kind: EntityKind::WorkOrder,
                    id: work_order.id,
                },
            )
            .await
            .unwrap();
        (work_order.id, job.id)
    }

    async fn run_action(
        engine: &Arc<WorkflowEngine>,
        ctx: &TenantContext,
        key: &str,
        action: WorkOrderAction,
    ) -> crate::workflow::WorkflowOutcome {
        engine
            .submit(ctx, "work_order", key, serde_json::to_value(action).unwrap())
            .await
            .unwrap()
            .result()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_completion_flows_back_to_job() {
        let (services, engine, ctx) = setup();
        let (work_order_id, job_id) = seed_linked_pair(&services, &ctx).await;

        for (key, action) in [
            ("assign", WorkOrderAction::Assign { work_order_id }),
            ("dispatch", WorkOrderAction::Dispatch { work_order_id }),
            (
                "complete",
                WorkOrderAction::Complete {
                    work_order_id,
                    notes: Some("replaced shingles".into()),
                },
            ),
        ] {
            let outcome = run_action(&engine, &ctx, key, action).await;
            assert!(outcome.success, "{key} failed: {:?}", outcome.error);
        }

        let work_order = services
            .entities
            .get(&ctx, EntityKind::WorkOrder, work_order_id)
            .await
            .unwrap();
        assert_eq!(
            work_order.status,
            EntityStatus::WorkOrder(WorkOrderStatus::Completed)
        );
        assert!(work_order.completed_at.is_some());

        let job = services
            .entities
            .get(&ctx, EntityKind::Job, job_id)
            .await
            .unwrap();
        assert_eq!(job.status, EntityStatus::Job(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_unlinked_work_order_skips_sync() {
        let (services, engine, ctx) = setup();
        let work_order = services
            .entities
            .create(
                &ctx,
                NewEntity {
                    kind: EntityKind::WorkOrder,
                    title: "standalone".into(),
                    link: None,
                },
            )
            .await
            .unwrap();

        let outcome = run_action(
            &engine,
            &ctx,
            "assign",
            WorkOrderAction::Assign {
                work_order_id: work_order.id,
            },
        )
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.data["job"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_cancel_from_terminal_fails() {
        let (services, engine, ctx) = setup();
        let (work_order_id, _) = seed_linked_pair(&services, &ctx).await;

        let cancel = WorkOrderAction::Cancel {
            work_order_id,
            notes: None,
        };
        assert!(
            run_action(&engine, &ctx, "cancel-1", cancel.clone())
                .await
                .success
        );

        // Cancelled is terminal; a later assign must fail and leave it alone.
        let outcome = run_action(
            &engine,
            &ctx,
            "assign-after-cancel",
            WorkOrderAction::Assign { work_order_id },
        )
        .await;
        assert!(!outcome.success);
        let work_order = services
            .entities
            .get(&ctx, EntityKind::WorkOrder, work_order_id)
            .await
            .unwrap();
        assert_eq!(
            work_order.status,
            EntityStatus::WorkOrder(WorkOrderStatus::Cancelled)
        );
    }
}
