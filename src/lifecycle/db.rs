//! Postgres Entity Store
//!
//! All reads and writes go through [`TenantScope`], so every statement runs
//! inside a tenant-marked transaction. Status updates are guarded twice:
//! the row is locked with `FOR UPDATE` and the `UPDATE` carries a CAS clause
//! on the expected status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::sync::Arc;
use uuid::Uuid;

use super::entity::{
    EntityLink, LifecycleEntity, NewEntity, StatusHistory, TransitionOutcome, initial_status,
    stamp_on_enter,
};
use super::status::{EntityKind, EntityStatus, TransitionPlan, plan_transition};
use super::store::EntityStore;
use crate::audit::{ActivityEvent, AuditSink};
use crate::core_types::EntityId;
use crate::error::CoreError;
use crate::tenant::{TenantContext, TenantScope};

pub struct PgEntityStore {
    scope: TenantScope,
    audit: Arc<dyn AuditSink>,
}

impl PgEntityStore {
    pub fn new(scope: TenantScope, audit: Arc<dyn AuditSink>) -> Self {
        Self { scope, audit }
    }
}

fn row_to_entity(row: &PgRow) -> Result<LifecycleEntity, CoreError> {
    let kind_id: i16 = row.get("kind");
    let kind = EntityKind::from_id(kind_id)
        .ok_or_else(|| CoreError::Database(format!("invalid entity kind id: {kind_id}")))?;

    let status_id: i16 = row.get("status");
    let status = EntityStatus::from_parts(kind, status_id).ok_or_else(|| {
        CoreError::Database(format!("invalid status id {status_id} for kind {kind}"))
    })?;

    let link = match (
        row.get::<Option<i16>, _>("link_kind"),
        row.get::<Option<Uuid>, _>("link_id"),
    ) {
        (Some(link_kind_id), Some(link_id)) => {
            let link_kind = EntityKind::from_id(link_kind_id).ok_or_else(|| {
                CoreError::Database(format!("invalid link kind id: {link_kind_id}"))
            })?;
            Some(EntityLink {
                kind: link_kind,
                id: link_id,
            })
        }
        _ => None,
    };

    Ok(LifecycleEntity {
        id: row.get("id"),
        org_id: row.get("org_id"),
        kind,
        title: row.get("title"),
        status,
        link,
        dispatched_at: row.get("dispatched_at"),
        completed_at: row.get("completed_at"),
        closed_at: row.get("closed_at"),
        closed_by: row.get("closed_by"),
        cancelled_at: row.get("cancelled_at"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const SELECT_ENTITY: &str = r#"
    SELECT id, org_id, kind, title, status, link_kind, link_id,
           dispatched_at, completed_at, closed_at, closed_by, cancelled_at,
           deleted_at, created_at, updated_at
    FROM lifecycle_entities
    WHERE id = $1 AND kind = $2 AND org_id = $3 AND deleted_at IS NULL
"#;

fn not_found(kind: EntityKind, id: EntityId) -> CoreError {
    CoreError::NotFound(format!("{kind} {id} not found in tenant scope"))
}

#[async_trait]
impl EntityStore for PgEntityStore {
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

        let inserted = entity.clone();
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT INTO lifecycle_entities
                            (id, org_id, kind, title, status, link_kind, link_id,
                             created_at, updated_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        "#,
                    )
                    .bind(inserted.id)
                    .bind(inserted.org_id)
                    .bind(inserted.kind.id())
                    .bind(&inserted.title)
                    .bind(inserted.status.id())
                    .bind(inserted.link.map(|l| l.kind.id()))
                    .bind(inserted.link.map(|l| l.id))
                    .bind(inserted.created_at)
                    .bind(inserted.updated_at)
                    .execute(tx.conn())
                    .await?;
                    Ok(())
                })
            })
            .await?;

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
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let row = sqlx::query(SELECT_ENTITY)
                        .bind(id)
                        .bind(kind.id())
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?;
                    match row {
                        Some(row) => row_to_entity(&row),
                        None => Err(not_found(kind, id)),
                    }
                })
            })
            .await
    }

    async fn transition(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
        to: EntityStatus,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, CoreError> {
        let org_id = ctx.org_id;
        let actor = ctx.acting_user;
        let outcome = self
            .scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    // Re-read and lock the row inside this transaction; the
                    // caller's earlier snapshot is never trusted.
                    let locked = format!("{SELECT_ENTITY} FOR UPDATE");
                    let row = sqlx::query(&locked)
                        .bind(id)
                        .bind(kind.id())
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?
                        .ok_or_else(|| not_found(kind, id))?;
                    let mut entity = row_to_entity(&row)?;
                    let previous = entity.status;

                    match plan_transition(previous, to)? {
                        TransitionPlan::NoOp => Ok(TransitionOutcome {
                            entity,
                            previous,
                            changed: false,
                        }),
                        TransitionPlan::Apply => {
                            let now = Utc::now();
                            entity.status = to;
                            stamp_on_enter(&mut entity, to, actor, now);

                            let updated = sqlx::query(
                                r#"
                                UPDATE lifecycle_entities
                                SET status = $1, dispatched_at = $2, completed_at = $3,
                                    closed_at = $4, closed_by = $5, cancelled_at = $6,
                                    updated_at = $7
                                WHERE id = $8 AND org_id = $9 AND status = $10
                                "#,
                            )
                            .bind(to.id())
                            .bind(entity.dispatched_at)
                            .bind(entity.completed_at)
                            .bind(entity.closed_at)
                            .bind(entity.closed_by)
                            .bind(entity.cancelled_at)
                            .bind(entity.updated_at)
                            .bind(id)
                            .bind(org_id)
                            .bind(previous.id())
                            .execute(tx.conn())
                            .await?;

                            if updated.rows_affected() == 0 {
                                return Err(CoreError::ConcurrencyConflict(format!(
                                    "{kind} {id} moved away from {previous} during transition"
                                )));
                            }

                            sqlx::query(
                                r#"
                                INSERT INTO status_history
                                    (id, org_id, entity_kind, entity_id, from_status,
                                     to_status, changed_by, changed_at, notes)
                                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                                "#,
                            )
                            .bind(Uuid::new_v4())
                            .bind(org_id)
                            .bind(kind.id())
                            .bind(id)
                            .bind(previous.id())
                            .bind(to.id())
                            .bind(actor)
                            .bind(now)
                            .bind(notes)
                            .execute(tx.conn())
                            .await?;

                            Ok(TransitionOutcome {
                                entity,
                                previous,
                                changed: true,
                            })
                        }
                    }
                })
            })
            .await?;

        if outcome.changed {
            self.audit
                .record(ActivityEvent {
                    org_id: ctx.org_id,
                    entity_type: kind.as_str(),
                    entity_id: id.to_string(),
                    action: "status_transition".into(),
                    performed_by: ctx.acting_user,
                    previous_state: Some(outcome.previous.as_str().to_string()),
                    new_state: Some(outcome.entity.status.as_str().to_string()),
                })
                .await;
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
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let updated = sqlx::query(
                        r#"
                        UPDATE lifecycle_entities
                        SET link_kind = $1, link_id = $2, updated_at = NOW()
                        WHERE id = $3 AND kind = $4 AND org_id = $5 AND deleted_at IS NULL
                        "#,
                    )
                    .bind(link.kind.id())
                    .bind(link.id)
                    .bind(id)
                    .bind(kind.id())
                    .bind(org_id)
                    .execute(tx.conn())
                    .await?;
                    if updated.rows_affected() == 0 {
                        return Err(not_found(kind, id));
                    }
                    Ok(())
                })
            })
            .await
    }

    async fn archive(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<(), CoreError> {
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let updated = sqlx::query(
                        r#"
                        UPDATE lifecycle_entities
                        SET deleted_at = NOW(), updated_at = NOW()
                        WHERE id = $1 AND kind = $2 AND org_id = $3 AND deleted_at IS NULL
                        "#,
                    )
                    .bind(id)
                    .bind(kind.id())
                    .bind(org_id)
                    .execute(tx.conn())
                    .await?;
                    if updated.rows_affected() == 0 {
                        return Err(not_found(kind, id));
                    }
                    Ok(())
                })
            })
            .await
    }

    async fn history(
        &self,
        ctx: &TenantContext,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Vec<StatusHistory>, CoreError> {
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        r#"
                        SELECT id, org_id, entity_kind, entity_id, from_status,
                               to_status, changed_by, changed_at, notes
                        FROM status_history
                        WHERE org_id = $1 AND entity_kind = $2 AND entity_id = $3
                        ORDER BY changed_at ASC
                        "#,
                    )
                    .bind(org_id)
                    .bind(kind.id())
                    .bind(id)
                    .fetch_all(tx.conn())
                    .await?;

                    let mut history = Vec::with_capacity(rows.len());
                    for row in rows {
                        let from_id: i16 = row.get("from_status");
                        let to_id: i16 = row.get("to_status");
                        let from_status =
                            EntityStatus::from_parts(kind, from_id).ok_or_else(|| {
                                CoreError::Database(format!("invalid history status: {from_id}"))
                            })?;
                        let to_status = EntityStatus::from_parts(kind, to_id).ok_or_else(|| {
                            CoreError::Database(format!("invalid history status: {to_id}"))
                        })?;
                        let changed_at: DateTime<Utc> = row.get("changed_at");
                        history.push(StatusHistory {
                            id: row.get("id"),
                            org_id: row.get("org_id"),
                            entity_kind: kind,
                            entity_id: row.get("entity_id"),
                            from_status,
                            to_status,
                            changed_by: row.get("changed_by"),
                            changed_at,
                            notes: row.get("notes"),
                        });
                    }
                    Ok(history)
                })
            })
            .await
    }
}
