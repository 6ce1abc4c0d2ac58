//! Cross-Domain Status Synchronizer
//!
//! Deterministic translation between the status machines of linked entities.
//! Every mapping is a total function over the primary's status domain:
//! statuses without a meaningful counterpart land on the secondary's
//! incoming/default status instead of erroring.
//!
//! Synchronization is one-directional per invocation. A call never triggers
//! the reverse sync, so one status change produces exactly one downstream
//! write. If a caller invokes both directions in sequence for the same
//! change, the result is two independent audited transitions with no cycle
//! detection; that sequence is a caller bug, not a supported pattern.

use crate::audit::{ActivityEvent, AuditSink};
use crate::core_types::EntityId;
use crate::error::CoreError;
use crate::lifecycle::status::{EntityKind, EntityStatus, JobStatus, WorkOrderStatus};
use crate::lifecycle::store::EntityStore;
use crate::tenant::TenantContext;

/// Violation case status, as reported by the compliance domain.
/// Mapped one-way onto a remediation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationStatus {
    Reported,
    NoticeSent,
    HearingScheduled,
    Cured,
    Escalated,
    Closed,
}

impl ViolationStatus {
    pub const ALL: &'static [Self] = &[
        ViolationStatus::Reported,
        ViolationStatus::NoticeSent,
        ViolationStatus::HearingScheduled,
        ViolationStatus::Cured,
        ViolationStatus::Escalated,
        ViolationStatus::Closed,
    ];
}

/// Architectural-review request status. Mapped one-way onto a work order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcRequestStatus {
    Submitted,
    UnderReview,
    Approved,
    Denied,
    Closed,
}

impl ArcRequestStatus {
    pub const ALL: &'static [Self] = &[
        ArcRequestStatus::Submitted,
        ArcRequestStatus::UnderReview,
        ArcRequestStatus::Approved,
        ArcRequestStatus::Denied,
        ArcRequestStatus::Closed,
    ];
}

/// Job → WorkOrder. Total over `JobStatus`; pre-dispatch statuses fall to
/// the work order's `Incoming` default.
pub fn work_order_status_for(job: JobStatus) -> WorkOrderStatus {
    match job {
        JobStatus::Draft | JobStatus::Scheduled => WorkOrderStatus::Incoming,
        JobStatus::Dispatched => WorkOrderStatus::Dispatched,
        JobStatus::InProgress => WorkOrderStatus::InProgress,
        JobStatus::Completed => WorkOrderStatus::Completed,
        JobStatus::Closed => WorkOrderStatus::Closed,
        JobStatus::Cancelled => WorkOrderStatus::Cancelled,
    }
}

/// WorkOrder → Job. Total over `WorkOrderStatus`; pre-dispatch work order
/// statuses map to a scheduled job.
pub fn job_status_for(work_order: WorkOrderStatus) -> JobStatus {
    match work_order {
        WorkOrderStatus::Incoming | WorkOrderStatus::Assigned => JobStatus::Scheduled,
        WorkOrderStatus::Dispatched => JobStatus::Dispatched,
        WorkOrderStatus::InProgress => JobStatus::InProgress,
        WorkOrderStatus::Completed => JobStatus::Completed,
        WorkOrderStatus::Closed => JobStatus::Closed,
        WorkOrderStatus::Cancelled => JobStatus::Cancelled,
    }
}

/// Violation → remediation Job, one-way. Only an escalated violation puts
/// the job in motion; everything else parks or cancels it.
pub fn job_status_for_violation(violation: ViolationStatus) -> JobStatus {
    match violation {
        ViolationStatus::Reported
        | ViolationStatus::NoticeSent
        | ViolationStatus::HearingScheduled => JobStatus::Draft,
        ViolationStatus::Escalated => JobStatus::Scheduled,
        ViolationStatus::Cured => JobStatus::Cancelled,
        ViolationStatus::Closed => JobStatus::Closed,
    }
}

/// ArcRequest → WorkOrder, one-way. An approved request dispatches the
/// work; denial cancels it.
pub fn work_order_status_for_arc(request: ArcRequestStatus) -> WorkOrderStatus {
    match request {
        ArcRequestStatus::Submitted | ArcRequestStatus::UnderReview => WorkOrderStatus::Incoming,
        ArcRequestStatus::Approved => WorkOrderStatus::Dispatched,
        ArcRequestStatus::Denied => WorkOrderStatus::Cancelled,
        ArcRequestStatus::Closed => WorkOrderStatus::Closed,
    }
}

/// Which domain drives the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    JobToWorkOrder,
    WorkOrderToJob,
    ViolationToJob,
    ArcRequestToWorkOrder,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::JobToWorkOrder => "job_to_work_order",
            SyncDirection::WorkOrderToJob => "work_order_to_job",
            SyncDirection::ViolationToJob => "violation_to_job",
            SyncDirection::ArcRequestToWorkOrder => "arc_request_to_work_order",
        }
    }
}

/// Result of one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub direction: SyncDirection,
    pub previous: EntityStatus,
    pub new: EntityStatus,
    pub changed: bool,
}

/// Read the primary's current status, map it, and transition the secondary
/// through the validated state machine. One downstream write per call; the
/// reverse direction is never triggered automatically.
pub async fn apply_sync(
    entities: &dyn EntityStore,
    audit: &dyn AuditSink,
    ctx: &TenantContext,
    direction: SyncDirection,
    primary_id: EntityId,
    secondary_id: EntityId,
) -> Result<SyncOutcome, CoreError> {
    let (secondary_kind, mapped) = match direction {
        SyncDirection::JobToWorkOrder => {
            let job = entities.get(ctx, EntityKind::Job, primary_id).await?;
            let EntityStatus::Job(job_status) = job.status else {
                return Err(CoreError::Internal(format!(
                    "job {primary_id} carries non-job status"
                )));
            };
            (
                EntityKind::WorkOrder,
                EntityStatus::WorkOrder(work_order_status_for(job_status)),
            )
        }
        SyncDirection::WorkOrderToJob => {
            let work_order = entities.get(ctx, EntityKind::WorkOrder, primary_id).await?;
            let EntityStatus::WorkOrder(wo_status) = work_order.status else {
                return Err(CoreError::Internal(format!(
                    "work order {primary_id} carries non-work-order status"
                )));
            };
            (
                EntityKind::Job,
                EntityStatus::Job(job_status_for(wo_status)),
            )
        }
        SyncDirection::ViolationToJob | SyncDirection::ArcRequestToWorkOrder => {
            // External primaries are not stored entities; their status comes
            // in through apply_violation_sync / apply_arc_request_sync.
            return Err(CoreError::Validation(format!(
                "{} sync requires the external status, not a stored primary",
                direction.as_str()
            )));
        }
    };

    sync_secondary(entities, audit, ctx, direction, secondary_kind, secondary_id, mapped).await
}

/// Push an externally-reported violation status onto its remediation job.
/// The violation lives in the compliance domain, so the caller supplies its
/// status directly instead of reading a stored primary.
pub async fn apply_violation_sync(
    entities: &dyn EntityStore,
    audit: &dyn AuditSink,
    ctx: &TenantContext,
    violation: ViolationStatus,
    job_id: EntityId,
) -> Result<SyncOutcome, CoreError> {
    let mapped = EntityStatus::Job(job_status_for_violation(violation));
    sync_secondary(
        entities,
        audit,
        ctx,
        SyncDirection::ViolationToJob,
        EntityKind::Job,
        job_id,
        mapped,
    )
    .await
}

/// Push an architectural-review request status onto its work order.
pub async fn apply_arc_request_sync(
    entities: &dyn EntityStore,
    audit: &dyn AuditSink,
    ctx: &TenantContext,
    request: ArcRequestStatus,
    work_order_id: EntityId,
) -> Result<SyncOutcome, CoreError> {
    let mapped = EntityStatus::WorkOrder(work_order_status_for_arc(request));
    sync_secondary(
        entities,
        audit,
        ctx,
        SyncDirection::ArcRequestToWorkOrder,
        EntityKind::WorkOrder,
        work_order_id,
        mapped,
    )
    .await
}

async fn sync_secondary(
    entities: &dyn EntityStore,
    audit: &dyn AuditSink,
    ctx: &TenantContext,
    direction: SyncDirection,
    secondary_kind: EntityKind,
    secondary_id: EntityId,
    mapped: EntityStatus,
) -> Result<SyncOutcome, CoreError> {
    let outcome = entities
        .transition(
            ctx,
            secondary_kind,
            secondary_id,
            mapped,
            Some(format!("sync: {}", direction.as_str())),
        )
        .await?;

    if outcome.changed {
        audit
            .record(ActivityEvent {
                org_id: ctx.org_id,
                entity_type: secondary_kind.as_str(),
                entity_id: secondary_id.to_string(),
                action: format!("status_sync:{}", direction.as_str()),
                performed_by: ctx.acting_user,
                previous_state: Some(outcome.previous.as_str().to_string()),
                new_state: Some(mapped.as_str().to_string()),
            })
            .await;
    }

    Ok(SyncOutcome {
        direction,
        previous: outcome.previous,
        new: outcome.entity.status,
        changed: outcome.changed,
    })
}
