//! Entity Store
//!
//! Storage seam for lifecycle entities. Two backends: Postgres
//! ([`super::db::PgEntityStore`]) and the in-memory store below, which backs
//! tests and embedded dev mode. Every method takes the [`TenantContext`]
//! explicitly; rows belonging to another organization surface as `NotFound`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::entity::{
    EntityLink, LifecycleEntity, NewEntity, StatusHistory, TransitionOutcome, initial_status,
    stamp_on_enter,
};
use super::status::{EntityKind, EntityStatus, TransitionPlan, plan_transition};
use crate::audit::{ActivityEvent, AuditSink};
use crate::core_types::EntityId;
use crate::error::CoreError;
use crate::tenant::TenantContext;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create(
        &self,
        ctx: &TenantContext,
        new: NewEntity,
    ) -> Result<LifecycleEntity, CoreError>;

    async fn get(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<LifecycleEntity, CoreError>;

    /// Validated transition: consults the transition table against the
    /// current status re-read inside the store's transaction, stamps derived
    /// timestamps, writes one history row, emits one audit event. Returns
    /// `changed: false` if the entity is already at the target.
    async fn transition(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
        to: EntityStatus,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, CoreError>;

    /// Point this entity at its linked counterpart.
    async fn link(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
        link: EntityLink,
    ) -> Result<(), CoreError>;

    /// Soft delete. The row keeps its status; subsequent reads see NotFound.
    async fn archive(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<(), CoreError>;

    async fn history(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Vec<StatusHistory>, CoreError>;
}

fn not_found(kind: EntityKind, id: EntityId) -> CoreError {
    CoreError::NotFound(format!("{kind} {id} not found in tenant scope"))
}

/// In-memory backend. One lock over both tables so a transition's status
/// update and history row are atomic, mirroring the Postgres transaction.
pub struct MemoryEntityStore {
    inner: Mutex<Tables>,
    audit: Arc<dyn AuditSink>,
}

#[derive(Default)]
struct Tables {
    entities: HashMap<(EntityKind, EntityId), LifecycleEntity>,
    history: Vec<StatusHistory>,
}

impl MemoryEntityStore {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
            audit,
        }
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        new: NewEntity,
    ) -> Result<LifecycleEntity, CoreError> {
        if new.title.trim().is_empty() {
            return Err(CoreError::Validation("entity title is required".into()));
        }
        let now = Utc::now();
        let entity = LifecycleEntity {
            id: Uuid::new_v4(),
            org_id: ctx.org_id,
            kind: new.kind,
            title: new.title,
            status: initial_status(new.kind),
            link: new.link,
            dispatched_at: None,
            completed_at: None,
            closed_at: None,
            closed_by: None,
            cancelled_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .unwrap()
            .entities
            .insert((entity.kind, entity.id), entity.clone());

        self.audit
            .record(ActivityEvent {
                org_id: ctx.org_id,
                entity_type: entity.kind.as_str(),
                entity_id: entity.id.to_string(),
                action: "created".into(),
                performed_by: ctx.acting_user,
                previous_state: None,
                new_state: Some(entity.status.as_str().to_string()),
            })
            .await;

        Ok(entity)
    }

    async fn get(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<LifecycleEntity, CoreError> {
        let tables = self.inner.lock().unwrap();
        tables
            .entities
            .get(&(kind, id))
            .filter(|e| e.org_id == ctx.org_id && e.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| not_found(kind, id))
    }

    async fn transition(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
        to: EntityStatus,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, CoreError> {
        let (outcome, event) = {
            let mut tables = self.inner.lock().unwrap();
            let entity = tables
                .entities
                .get_mut(&(kind, id))
                .filter(|e| e.org_id == ctx.org_id && e.deleted_at.is_none())
                .ok_or_else(|| not_found(kind, id))?;

            // Current status is re-read under the lock, never trusted from a
            // value fetched before the call.
            let previous = entity.status;
            match plan_transition(previous, to)? {
                TransitionPlan::NoOp => {
                    let outcome = TransitionOutcome {
                        entity: entity.clone(),
                        previous,
                        changed: false,
                    };
                    (outcome, None)
                }
                TransitionPlan::Apply => {
                    let now = Utc::now();
                    entity.status = to;
                    stamp_on_enter(entity, to, ctx.acting_user, now);
                    let snapshot = entity.clone();

                    tables.history.push(StatusHistory {
                        id: Uuid::new_v4(),
                        org_id: ctx.org_id,
                        entity_kind: kind,
                        entity_id: id,
                        from_status: previous,
                        to_status: to,
                        changed_by: ctx.acting_user,
                        changed_at: now,
                        notes,
                    });

                    let event = ActivityEvent {
                        org_id: ctx.org_id,
                        entity_type: kind.as_str(),
                        entity_id: id.to_string(),
                        action: "status_transition".into(),
                        performed_by: ctx.acting_user,
                        previous_state: Some(previous.as_str().to_string()),
                        new_state: Some(to.as_str().to_string()),
                    };
                    let outcome = TransitionOutcome {
                        entity: snapshot,
                        previous,
                        changed: true,
                    };
                    (outcome, Some(event))
                }
            }
        };

        if let Some(event) = event {
            self.audit.record(event).await;
        }
        Ok(outcome)
    }

    async fn link(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
        link: EntityLink,
    ) -> Result<(), CoreError> {
        let mut tables = self.inner.lock().unwrap();
        let entity = tables
            .entities
            .get_mut(&(kind, id))
            .filter(|e| e.org_id == ctx.org_id && e.deleted_at.is_none())
            .ok_or_else(|| not_found(kind, id))?;
        entity.link = Some(link);
        entity.updated_at = Utc::now();
        Ok(())
    }

    async fn archive(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<(), CoreError> {
        let mut tables = self.inner.lock().unwrap();
        let entity = tables
            .entities
            .get_mut(&(kind, id))
            .filter(|e| e.org_id == ctx.org_id && e.deleted_at.is_none())
            .ok_or_else(|| not_found(kind, id))?;
        entity.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn history(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Vec<StatusHistory>, CoreError> {
        let tables = self.inner.lock().unwrap();
        Ok(tables
            .history
            .iter()
            .filter(|h| h.org_id == ctx.org_id && h.entity_kind == kind && h.entity_id == id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::lifecycle::status::{JobStatus, WorkOrderStatus};

    fn ctx() -> TenantContext {
        TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test")
    }

    fn store_with_sink() -> (MemoryEntityStore, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        (MemoryEntityStore::new(sink.clone()), sink)
    }

    async fn new_job(store: &MemoryEntityStore, ctx: &TenantContext) -> LifecycleEntity {
        store
            .create(
                ctx,
                NewEntity {
                    kind: EntityKind::Job,
                    title: "Fence repair".into(),
                    link: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_transition_writes_history_and_audit() {
        let (store, sink) = store_with_sink();
        let ctx = ctx();
        let job = new_job(&store, &ctx).await;

        let outcome = store
            .transition(
                &ctx,
                EntityKind::Job,
                job.id,
                EntityStatus::Job(JobStatus::Scheduled),
                Some("board approved".into()),
            )
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.previous, EntityStatus::Job(JobStatus::Draft));

        let history = store.history(&ctx, EntityKind::Job, job.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to_status, EntityStatus::Job(JobStatus::Scheduled));
        assert_eq!(history[0].notes.as_deref(), Some("board approved"));

        let events = sink.events();
        assert!(
            events
                .iter()
                .any(|e| e.action == "status_transition"
                    && e.new_state.as_deref() == Some("SCHEDULED"))
        );
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_status_unchanged() {
        let (store, _) = store_with_sink();
        let ctx = ctx();
        let job = new_job(&store, &ctx).await;

        let err = store
            .transition(
                &ctx,
                EntityKind::Job,
                job.id,
                EntityStatus::Job(JobStatus::Completed),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let reread = store.get(&ctx, EntityKind::Job, job.id).await.unwrap();
        assert_eq!(reread.status, EntityStatus::Job(JobStatus::Draft));
        assert!(store
            .history(&ctx, EntityKind::Job, job.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retry_same_transition_is_noop() {
        let (store, _) = store_with_sink();
        let ctx = ctx();
        let job = new_job(&store, &ctx).await;

        store
            .transition(
                &ctx,
                EntityKind::Job,
                job.id,
                EntityStatus::Job(JobStatus::Scheduled),
                None,
            )
            .await
            .unwrap();
        let retry = store
            .transition(
                &ctx,
                EntityKind::Job,
                job.id,
                EntityStatus::Job(JobStatus::Scheduled),
                None,
            )
            .await
            .unwrap();
        assert!(!retry.changed);
        // Only the first attempt wrote history.
        assert_eq!(
            store
                .history(&ctx, EntityKind::Job, job.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let (store, _) = store_with_sink();
        let owner = ctx();
        let intruder = ctx();
        let job = new_job(&store, &owner).await;

        let err = store.get(&intruder, EntityKind::Job, job.id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = store
            .transition(
                &intruder,
                EntityKind::Job,
                job.id,
                EntityStatus::Job(JobStatus::Scheduled),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_archive_hides_entity() {
        let (store, _) = store_with_sink();
        let ctx = ctx();
        let job = new_job(&store, &ctx).await;

        store.archive(&ctx, EntityKind::Job, job.id).await.unwrap();
        let err = store.get(&ctx, EntityKind::Job, job.id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_link_entities() {
        let (store, _) = store_with_sink();
        let ctx = ctx();
        let job = new_job(&store, &ctx).await;
        let wo = store
            .create(
                &ctx,
                NewEntity {
                    kind: EntityKind::WorkOrder,
                    title: "Fence repair WO".into(),
                    link: Some(EntityLink {
                        kind: EntityKind::Job,
                        id: job.id,
                    }),
                },
            )
            .await
            .unwrap();
        assert_eq!(wo.status, EntityStatus::WorkOrder(WorkOrderStatus::Incoming));

        store
            .link(
                &ctx,
                EntityKind::Job,
                job.id,
                EntityLink {
                    kind: EntityKind::WorkOrder,
                    id: wo.id,
                },
            )
            .await
            .unwrap();
        let job = store.get(&ctx, EntityKind::Job, job.id).await.unwrap();
        assert_eq!(job.link.map(|l| l.id), Some(wo.id));
    }
}
