//! Entity Lifecycle State Machines
//!
//! Per-entity transition tables, validated transitions with derived
//! timestamps and immutable status history, and the storage seam they run
//! through.

pub mod db;
pub mod entity;
pub mod status;
pub mod store;

pub use db::PgEntityStore;
pub use entity::{
    EntityLink, LifecycleEntity, NewEntity, StatusHistory, TransitionOutcome, initial_status,
};
pub use status::{
    BidStatus, ContractStatus, DelegatedAuthorityStatus, EntityKind, EntityStatus, JobStatus,
    LifecycleStatus, ResolutionStatus, TransitionPlan, WorkOrderStatus, plan_transition,
};
pub use store::{EntityStore, MemoryEntityStore};
