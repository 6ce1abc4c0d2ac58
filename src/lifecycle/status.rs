//! Lifecycle Status Definitions
//!
//! One status enum per entity type. Status ids are stored as SMALLINT;
//! negative ids mark abandoned branches. Each enum owns its transition table
//! as data (`targets()`), consulted before any mutation — terminal statuses
//! have an empty target set.

use std::fmt;

use crate::error::CoreError;

/// Common surface over every entity status enum.
pub trait LifecycleStatus: Copy + Eq + fmt::Debug + Sized + 'static {
    fn id(&self) -> i16;
    fn from_id(id: i16) -> Option<Self>;
    fn as_str(&self) -> &'static str;
    /// Allowed transition targets from this status. Empty means terminal.
    fn targets(&self) -> &'static [Self];
    /// Every value of the enum, for table-totality tests.
    fn all() -> &'static [Self];

    fn is_terminal(&self) -> bool {
        self.targets().is_empty()
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum JobStatus {
    Draft = 1,
    Scheduled = 2,
    Dispatched = 3,
    InProgress = 4,
    Completed = 5,
    /// Terminal
    Closed = 6,
    /// Terminal
    Cancelled = -1,
}

impl LifecycleStatus for JobStatus {
    fn id(&self) -> i16 {
        *self as i16
    }

    fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(JobStatus::Draft),
            2 => Some(JobStatus::Scheduled),
            3 => Some(JobStatus::Dispatched),
            4 => Some(JobStatus::InProgress),
            5 => Some(JobStatus::Completed),
            6 => Some(JobStatus::Closed),
            -1 => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "DRAFT",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Dispatched => "DISPATCHED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Closed => "CLOSED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    fn targets(&self) -> &'static [Self] {
        match self {
            JobStatus::Draft => &[JobStatus::Scheduled, JobStatus::Cancelled],
            JobStatus::Scheduled => &[JobStatus::Dispatched, JobStatus::Cancelled],
            JobStatus::Dispatched => &[
                JobStatus::InProgress,
                JobStatus::Completed,
                JobStatus::Cancelled,
            ],
            JobStatus::InProgress => &[JobStatus::Completed, JobStatus::Cancelled],
            JobStatus::Completed => &[JobStatus::Closed],
            JobStatus::Closed => &[],
            JobStatus::Cancelled => &[],
        }
    }

    fn all() -> &'static [Self] {
        &[
            JobStatus::Draft,
            JobStatus::Scheduled,
            JobStatus::Dispatched,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Closed,
            JobStatus::Cancelled,
        ]
    }
}

/// Work order lifecycle. `Incoming` is the default landing status for
/// cross-domain sync fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum WorkOrderStatus {
    Incoming = 1,
    Assigned = 2,
    Dispatched = 3,
    InProgress = 4,
    Completed = 5,
    /// Terminal
    Closed = 6,
    /// Terminal
    Cancelled = -1,
}

impl LifecycleStatus for WorkOrderStatus {
    fn id(&self) -> i16 {
        *self as i16
    }

    fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WorkOrderStatus::Incoming),
            2 => Some(WorkOrderStatus::Assigned),
            3 => Some(WorkOrderStatus::Dispatched),
            4 => Some(WorkOrderStatus::InProgress),
            5 => Some(WorkOrderStatus::Completed),
            6 => Some(WorkOrderStatus::Closed),
            -1 => Some(WorkOrderStatus::Cancelled),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Incoming => "INCOMING",
            WorkOrderStatus::Assigned => "ASSIGNED",
            WorkOrderStatus::Dispatched => "DISPATCHED",
            WorkOrderStatus::InProgress => "IN_PROGRESS",
            WorkOrderStatus::Completed => "COMPLETED",
            WorkOrderStatus::Closed => "CLOSED",
            WorkOrderStatus::Cancelled => "CANCELLED",
        }
    }

    fn targets(&self) -> &'static [Self] {
        match self {
            WorkOrderStatus::Incoming => &[
                WorkOrderStatus::Assigned,
                WorkOrderStatus::Dispatched,
                WorkOrderStatus::Cancelled,
            ],
            WorkOrderStatus::Assigned => &[WorkOrderStatus::Dispatched, WorkOrderStatus::Cancelled],
            WorkOrderStatus::Dispatched => &[
                WorkOrderStatus::InProgress,
                WorkOrderStatus::Completed,
                WorkOrderStatus::Cancelled,
            ],
            WorkOrderStatus::InProgress => {
                &[WorkOrderStatus::Completed, WorkOrderStatus::Cancelled]
            }
            WorkOrderStatus::Completed => &[WorkOrderStatus::Closed],
            WorkOrderStatus::Closed => &[],
            WorkOrderStatus::Cancelled => &[],
        }
    }

    fn all() -> &'static [Self] {
        &[
            WorkOrderStatus::Incoming,
            WorkOrderStatus::Assigned,
            WorkOrderStatus::Dispatched,
            WorkOrderStatus::InProgress,
            WorkOrderStatus::Completed,
            WorkOrderStatus::Closed,
            WorkOrderStatus::Cancelled,
        ]
    }
}

/// Governance resolution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ResolutionStatus {
    Draft = 1,
    Proposed = 2,
    VotingOpen = 3,
    Adopted = 4,
    Rejected = 5,
    /// Terminal
    Archived = -2,
}

impl LifecycleStatus for ResolutionStatus {
    fn id(&self) -> i16 {
        *self as i16
    }

    fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ResolutionStatus::Draft),
            2 => Some(ResolutionStatus::Proposed),
            3 => Some(ResolutionStatus::VotingOpen),
            4 => Some(ResolutionStatus::Adopted),
            5 => Some(ResolutionStatus::Rejected),
            -2 => Some(ResolutionStatus::Archived),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Draft => "DRAFT",
            ResolutionStatus::Proposed => "PROPOSED",
            ResolutionStatus::VotingOpen => "VOTING_OPEN",
            ResolutionStatus::Adopted => "ADOPTED",
            ResolutionStatus::Rejected => "REJECTED",
            ResolutionStatus::Archived => "ARCHIVED",
        }
    }

    fn targets(&self) -> &'static [Self] {
        match self {
            ResolutionStatus::Draft => &[ResolutionStatus::Proposed, ResolutionStatus::Archived],
            ResolutionStatus::Proposed => {
                &[ResolutionStatus::VotingOpen, ResolutionStatus::Archived]
            }
            ResolutionStatus::VotingOpen => {
                &[ResolutionStatus::Adopted, ResolutionStatus::Rejected]
            }
            ResolutionStatus::Adopted => &[ResolutionStatus::Archived],
            ResolutionStatus::Rejected => &[ResolutionStatus::Archived],
            ResolutionStatus::Archived => &[],
        }
    }

    fn all() -> &'static [Self] {
        &[
            ResolutionStatus::Draft,
            ResolutionStatus::Proposed,
            ResolutionStatus::VotingOpen,
            ResolutionStatus::Adopted,
            ResolutionStatus::Rejected,
            ResolutionStatus::Archived,
        ]
    }
}

/// Contractor bid lifecycle. Accepted bids hand over to a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum BidStatus {
    Draft = 1,
    Submitted = 2,
    UnderReview = 3,
    /// Terminal for the bid; the contract takes over
    Accepted = 4,
    /// Terminal
    Declined = -1,
    /// Terminal
    Withdrawn = -2,
}

impl LifecycleStatus for BidStatus {
    fn id(&self) -> i16 {
        *self as i16
    }

    fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BidStatus::Draft),
            2 => Some(BidStatus::Submitted),
            3 => Some(BidStatus::UnderReview),
            4 => Some(BidStatus::Accepted),
            -1 => Some(BidStatus::Declined),
            -2 => Some(BidStatus::Withdrawn),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Draft => "DRAFT",
            BidStatus::Submitted => "SUBMITTED",
            BidStatus::UnderReview => "UNDER_REVIEW",
            BidStatus::Accepted => "ACCEPTED",
            BidStatus::Declined => "DECLINED",
            BidStatus::Withdrawn => "WITHDRAWN",
        }
    }

    fn targets(&self) -> &'static [Self] {
        match self {
            BidStatus::Draft => &[BidStatus::Submitted, BidStatus::Withdrawn],
            BidStatus::Submitted => &[BidStatus::UnderReview, BidStatus::Withdrawn],
            BidStatus::UnderReview => &[BidStatus::Accepted, BidStatus::Declined],
            BidStatus::Accepted => &[],
            BidStatus::Declined => &[],
            BidStatus::Withdrawn => &[],
        }
    }

    fn all() -> &'static [Self] {
        &[
            BidStatus::Draft,
            BidStatus::Submitted,
            BidStatus::UnderReview,
            BidStatus::Accepted,
            BidStatus::Declined,
            BidStatus::Withdrawn,
        ]
    }
}

/// Contract lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ContractStatus {
    Draft = 1,
    PendingSignature = 2,
    Active = 3,
    Suspended = 4,
    /// Terminal
    Completed = 5,
    /// Terminal
    Terminated = -1,
}

impl LifecycleStatus for ContractStatus {
    fn id(&self) -> i16 {
        *self as i16
    }

    fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ContractStatus::Draft),
            2 => Some(ContractStatus::PendingSignature),
            3 => Some(ContractStatus::Active),
            4 => Some(ContractStatus::Suspended),
            5 => Some(ContractStatus::Completed),
            -1 => Some(ContractStatus::Terminated),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "DRAFT",
            ContractStatus::PendingSignature => "PENDING_SIGNATURE",
            ContractStatus::Active => "ACTIVE",
            ContractStatus::Suspended => "SUSPENDED",
            ContractStatus::Completed => "COMPLETED",
            ContractStatus::Terminated => "TERMINATED",
        }
    }

    fn targets(&self) -> &'static [Self] {
        match self {
            ContractStatus::Draft => {
                &[ContractStatus::PendingSignature, ContractStatus::Terminated]
            }
            ContractStatus::PendingSignature => {
                &[ContractStatus::Active, ContractStatus::Terminated]
            }
            ContractStatus::Active => &[
                ContractStatus::Suspended,
                ContractStatus::Completed,
                ContractStatus::Terminated,
            ],
            ContractStatus::Suspended => &[ContractStatus::Active, ContractStatus::Terminated],
            ContractStatus::Completed => &[],
            ContractStatus::Terminated => &[],
        }
    }

    fn all() -> &'static [Self] {
        &[
            ContractStatus::Draft,
            ContractStatus::PendingSignature,
            ContractStatus::Active,
            ContractStatus::Suspended,
            ContractStatus::Completed,
            ContractStatus::Terminated,
        ]
    }
}

/// Delegated authority lifecycle (board delegating decision power)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum DelegatedAuthorityStatus {
    Requested = 1,
    Granted = 2,
    Suspended = 3,
    /// Terminal
    Revoked = -1,
    /// Terminal
    Expired = -2,
}

impl LifecycleStatus for DelegatedAuthorityStatus {
    fn id(&self) -> i16 {
        *self as i16
    }

    fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(DelegatedAuthorityStatus::Requested),
            2 => Some(DelegatedAuthorityStatus::Granted),
            3 => Some(DelegatedAuthorityStatus::Suspended),
            -1 => Some(DelegatedAuthorityStatus::Revoked),
            -2 => Some(DelegatedAuthorityStatus::Expired),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DelegatedAuthorityStatus::Requested => "REQUESTED",
            DelegatedAuthorityStatus::Granted => "GRANTED",
            DelegatedAuthorityStatus::Suspended => "SUSPENDED",
            DelegatedAuthorityStatus::Revoked => "REVOKED",
            DelegatedAuthorityStatus::Expired => "EXPIRED",
        }
    }

    fn targets(&self) -> &'static [Self] {
        match self {
            DelegatedAuthorityStatus::Requested => &[
                DelegatedAuthorityStatus::Granted,
                DelegatedAuthorityStatus::Revoked,
            ],
            DelegatedAuthorityStatus::Granted => &[
                DelegatedAuthorityStatus::Suspended,
                DelegatedAuthorityStatus::Revoked,
                DelegatedAuthorityStatus::Expired,
            ],
            DelegatedAuthorityStatus::Suspended => &[
                DelegatedAuthorityStatus::Granted,
                DelegatedAuthorityStatus::Revoked,
                DelegatedAuthorityStatus::Expired,
            ],
            DelegatedAuthorityStatus::Revoked => &[],
            DelegatedAuthorityStatus::Expired => &[],
        }
    }

    fn all() -> &'static [Self] {
        &[
            DelegatedAuthorityStatus::Requested,
            DelegatedAuthorityStatus::Granted,
            DelegatedAuthorityStatus::Suspended,
            DelegatedAuthorityStatus::Revoked,
            DelegatedAuthorityStatus::Expired,
        ]
    }
}

/// Entity type discriminator, stored as SMALLINT alongside the status id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum EntityKind {
    Job = 1,
    WorkOrder = 2,
    Resolution = 3,
    Bid = 4,
    Contract = 5,
    DelegatedAuthority = 6,
}

impl EntityKind {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(EntityKind::Job),
            2 => Some(EntityKind::WorkOrder),
            3 => Some(EntityKind::Resolution),
            4 => Some(EntityKind::Bid),
            5 => Some(EntityKind::Contract),
            6 => Some(EntityKind::DelegatedAuthority),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::WorkOrder => "work_order",
            EntityKind::Resolution => "resolution",
            EntityKind::Bid => "bid",
            EntityKind::Contract => "contract",
            EntityKind::DelegatedAuthority => "delegated_authority",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A status value tagged with its entity kind. This is what stores persist
/// and what the generic transition machinery operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    Job(JobStatus),
    WorkOrder(WorkOrderStatus),
    Resolution(ResolutionStatus),
    Bid(BidStatus),
    Contract(ContractStatus),
    DelegatedAuthority(DelegatedAuthorityStatus),
}

impl EntityStatus {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityStatus::Job(_) => EntityKind::Job,
            EntityStatus::WorkOrder(_) => EntityKind::WorkOrder,
            EntityStatus::Resolution(_) => EntityKind::Resolution,
            EntityStatus::Bid(_) => EntityKind::Bid,
            EntityStatus::Contract(_) => EntityKind::Contract,
            EntityStatus::DelegatedAuthority(_) => EntityKind::DelegatedAuthority,
        }
    }

    pub fn id(&self) -> i16 {
        match self {
            EntityStatus::Job(s) => s.id(),
            EntityStatus::WorkOrder(s) => s.id(),
            EntityStatus::Resolution(s) => s.id(),
            EntityStatus::Bid(s) => s.id(),
            EntityStatus::Contract(s) => s.id(),
            EntityStatus::DelegatedAuthority(s) => s.id(),
        }
    }

    pub fn from_parts(kind: EntityKind, id: i16) -> Option<Self> {
        match kind {
            EntityKind::Job => JobStatus::from_id(id).map(EntityStatus::Job),
            EntityKind::WorkOrder => WorkOrderStatus::from_id(id).map(EntityStatus::WorkOrder),
            EntityKind::Resolution => ResolutionStatus::from_id(id).map(EntityStatus::Resolution),
            EntityKind::Bid => BidStatus::from_id(id).map(EntityStatus::Bid),
            EntityKind::Contract => ContractStatus::from_id(id).map(EntityStatus::Contract),
            EntityKind::DelegatedAuthority => {
                DelegatedAuthorityStatus::from_id(id).map(EntityStatus::DelegatedAuthority)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Job(s) => s.as_str(),
            EntityStatus::WorkOrder(s) => s.as_str(),
            EntityStatus::Resolution(s) => s.as_str(),
            EntityStatus::Bid(s) => s.as_str(),
            EntityStatus::Contract(s) => s.as_str(),
            EntityStatus::DelegatedAuthority(s) => s.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            EntityStatus::Job(s) => s.is_terminal(),
            EntityStatus::WorkOrder(s) => s.is_terminal(),
            EntityStatus::Resolution(s) => s.is_terminal(),
            EntityStatus::Bid(s) => s.is_terminal(),
            EntityStatus::Contract(s) => s.is_terminal(),
            EntityStatus::DelegatedAuthority(s) => s.is_terminal(),
        }
    }

    fn allows(&self, to: &EntityStatus) -> bool {
        match (self, to) {
            (EntityStatus::Job(from), EntityStatus::Job(t)) => from.targets().contains(t),
            (EntityStatus::WorkOrder(from), EntityStatus::WorkOrder(t)) => {
                from.targets().contains(t)
            }
            (EntityStatus::Resolution(from), EntityStatus::Resolution(t)) => {
                from.targets().contains(t)
            }
            (EntityStatus::Bid(from), EntityStatus::Bid(t)) => from.targets().contains(t),
            (EntityStatus::Contract(from), EntityStatus::Contract(t)) => {
                from.targets().contains(t)
            }
            (EntityStatus::DelegatedAuthority(from), EntityStatus::DelegatedAuthority(t)) => {
                from.targets().contains(t)
            }
            _ => false,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of consulting the transition table before mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Valid transition: mutate status, stamp timestamps, write history.
    Apply,
    /// Entity already at the target status. Success without mutation, so
    /// workflow step retries are tolerated.
    NoOp,
}

/// Consult the transition table. Fails with `Validation` for kind mismatches
/// and for (from, to) pairs outside the allowed set.
pub fn plan_transition(from: EntityStatus, to: EntityStatus) -> Result<TransitionPlan, CoreError> {
    if from.kind() != to.kind() {
        return Err(CoreError::Validation(format!(
            "status kind mismatch: {} vs {}",
            from.kind(),
            to.kind()
        )));
    }
    if from == to {
        return Ok(TransitionPlan::NoOp);
    }
    if from.allows(&to) {
        Ok(TransitionPlan::Apply)
    } else {
        Err(CoreError::Validation(format!(
            "invalid {} transition: {} -> {}",
            from.kind(),
            from,
            to
        )))
    }
}
