//! propflow - Durable Workflow Core
//!
//! The workflow engine beneath a multi-tenant property/contractor-operations
//! platform: durable, idempotent, resumable business operations over a
//! shared relational store.
//!
//! # Modules
//!
//! - [`core_types`] - Core id type definitions (OrgId, EntityId, etc.)
//! - [`error`] - The error taxonomy shared by every component
//! - [`tenant`] - Tenant-scoped transaction boundary
//! - [`lifecycle`] - Entity status state machines and history
//! - [`syncmap`] - Cross-domain status mapping tables
//! - [`billing`] - Charges, payments, application/reversal
//! - [`workflow`] - Durable step executor and recovery worker
//! - [`workflows`] - The business workflow drivers
//! - [`audit`] - Activity event and notification sinks

// Core types - must be first!
pub mod core_types;

pub mod audit;
pub mod billing;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod schema;
pub mod syncmap;
pub mod tenant;
pub mod workflow;
pub mod workflows;

// Convenient re-exports at crate root
pub use core_types::{ChargeId, EntityId, OrgId, PaymentId, UnitId, UserId};
pub use error::CoreError;
pub use tenant::{TenantContext, TenantScope};
pub use workflow::{
    WorkflowEngine, WorkflowHandle, WorkflowId, WorkflowOutcome, WorkflowState,
};
pub use workflows::Services;
