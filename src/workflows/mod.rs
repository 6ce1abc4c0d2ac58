//! Business Workflows
//!
//! One driver per domain, one action enum per driver. Dispatch is an
//! exhaustive match on the action variant, so adding an action is a
//! compile-time-checked change, and each variant owns its own typed input.

pub mod billing_run;
pub mod job;
pub mod work_order;

use std::sync::Arc;

use crate::audit::{AuditSink, NotificationSink};
use crate::billing::BillingStore;
use crate::lifecycle::EntityStore;
use crate::workflow::WorkflowEngine;

pub use billing_run::{BillingAction, BillingRunDriver, ChargeSpec};
pub use job::{JobAction, JobDriver};
pub use work_order::{WorkOrderAction, WorkOrderDriver};

/// Collaborators shared by every driver.
#[derive(Clone)]
pub struct Services {
    pub entities: Arc<dyn EntityStore>,
    pub billing: Arc<dyn BillingStore>,
    pub audit: Arc<dyn AuditSink>,
    pub notify: Arc<dyn NotificationSink>,
}

/// Register every domain driver with the engine.
pub fn register_all(engine: &WorkflowEngine, services: &Services) {
    engine.register(Arc::new(JobDriver::new(services.clone())));
    engine.register(Arc::new(WorkOrderDriver::new(services.clone())));
    engine.register(Arc::new(BillingRunDriver::new(services.clone())));
}
