//! Lifecycle Entity Records
//!
//! The persisted shape shared by every lifecycle entity type, plus the
//! status-specific timestamp stamping applied on transitions.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::status::{
    BidStatus, ContractStatus, DelegatedAuthorityStatus, EntityKind, EntityStatus, JobStatus,
    ResolutionStatus, WorkOrderStatus,
};
use crate::core_types::{EntityId, OrgId, UserId};

/// Link from one entity to another (Job↔WorkOrder and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLink {
    pub kind: EntityKind,
    pub id: EntityId,
}

/// One lifecycle entity row. Soft-deleted via `deleted_at`; workflow logic
/// never hard-deletes.
#[derive(Debug, Clone)]
pub struct LifecycleEntity {
    pub id: EntityId,
    pub org_id: OrgId,
    pub kind: EntityKind,
    pub title: String,
    pub status: EntityStatus,
    pub link: Option<EntityLink>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for entity creation. The initial status is fixed per kind.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub title: String,
    pub link: Option<EntityLink>,
}

/// The landing status each entity kind starts at.
pub fn initial_status(kind: EntityKind) -> EntityStatus {
    match kind {
        EntityKind::Job => EntityStatus::Job(JobStatus::Draft),
        EntityKind::WorkOrder => EntityStatus::WorkOrder(WorkOrderStatus::Incoming),
        EntityKind::Resolution => EntityStatus::Resolution(ResolutionStatus::Draft),
        EntityKind::Bid => EntityStatus::Bid(BidStatus::Draft),
        EntityKind::Contract => EntityStatus::Contract(ContractStatus::Draft),
        EntityKind::DelegatedAuthority => {
            EntityStatus::DelegatedAuthority(DelegatedAuthorityStatus::Requested)
        }
    }
}

/// Immutable per-transition history row.
#[derive(Debug, Clone)]
pub struct StatusHistory {
    pub id: Uuid,
    pub org_id: OrgId,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub from_status: EntityStatus,
    pub to_status: EntityStatus,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Result of a transition request.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub entity: LifecycleEntity,
    pub previous: EntityStatus,
    /// False when the entity was already at the target (retry no-op).
    pub changed: bool,
}

/// Stamp the derived lifecycle timestamp for the status being entered.
/// Timestamps are set once and never overwritten on re-entry.
pub fn stamp_on_enter(
    entity: &mut LifecycleEntity,
    to: EntityStatus,
    actor: UserId,
    now: DateTime<Utc>,
) {
    match to {
        EntityStatus::Job(JobStatus::Dispatched)
        | EntityStatus::WorkOrder(WorkOrderStatus::Dispatched) => {
            entity.dispatched_at.get_or_insert(now);
        }
        EntityStatus::Job(JobStatus::Completed)
        | EntityStatus::WorkOrder(WorkOrderStatus::Completed)
        | EntityStatus::Contract(ContractStatus::Completed) => {
            entity.completed_at.get_or_insert(now);
        }
        EntityStatus::Job(JobStatus::Closed) | EntityStatus::WorkOrder(WorkOrderStatus::Closed) => {
            entity.closed_at.get_or_insert(now);
            entity.closed_by.get_or_insert(actor);
        }
        EntityStatus::Job(JobStatus::Cancelled)
        | EntityStatus::WorkOrder(WorkOrderStatus::Cancelled)
        | EntityStatus::Contract(ContractStatus::Terminated)
        | EntityStatus::DelegatedAuthority(DelegatedAuthorityStatus::Revoked) => {
            entity.cancelled_at.get_or_insert(now);
        }
        _ => {}
    }
    entity.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity(kind: EntityKind) -> LifecycleEntity {
        let now = Utc::now();
        LifecycleEntity {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            kind,
            title: "test".into(),
            status: initial_status(kind),
            link: None,
            dispatched_at: None,
            completed_at: None,
            closed_at: None,
            closed_by: None,
            cancelled_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_dispatched_stamp_set_once() {
        let mut entity = sample_entity(EntityKind::Job);
        let actor = Uuid::new_v4();
        let first = Utc::now();
        stamp_on_enter(
            &mut entity,
            EntityStatus::Job(JobStatus::Dispatched),
            actor,
            first,
        );
        assert_eq!(entity.dispatched_at, Some(first));

        let later = first + chrono::Duration::hours(1);
        stamp_on_enter(
            &mut entity,
            EntityStatus::Job(JobStatus::Dispatched),
            actor,
            later,
        );
        // Not overwritten on re-entry
        assert_eq!(entity.dispatched_at, Some(first));
        assert_eq!(entity.updated_at, later);
    }

    #[test]
    fn test_closed_stamps_actor() {
        let mut entity = sample_entity(EntityKind::WorkOrder);
        let actor = Uuid::new_v4();
        let now = Utc::now();
        stamp_on_enter(
            &mut entity,
            EntityStatus::WorkOrder(WorkOrderStatus::Closed),
            actor,
            now,
        );
        assert_eq!(entity.closed_at, Some(now));
        assert_eq!(entity.closed_by, Some(actor));
    }

    #[test]
    fn test_initial_statuses() {
        assert_eq!(
            initial_status(EntityKind::WorkOrder),
            EntityStatus::WorkOrder(WorkOrderStatus::Incoming)
        );
        assert_eq!(
            initial_status(EntityKind::DelegatedAuthority),
            EntityStatus::DelegatedAuthority(DelegatedAuthorityStatus::Requested)
        );
    }
}
