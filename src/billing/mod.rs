//! Billing: charges, payments, and the allocation ledger.
//!
//! A payment is applied to a unit's outstanding charges oldest-due-first;
//! every applied slice is recorded as a `PaymentApplication` so a later void
//! can reverse exactly what was applied and nothing else.

pub mod db;
pub mod engine;
pub mod store;
pub mod types;

pub use db::PgBillingStore;
pub use engine::{Allocation, plan_allocations, sort_for_allocation};
pub use store::{BillingStore, MemoryBillingStore};
pub use types::{
    Charge, ChargeStatus, NewCharge, NewPayment, Payment, PaymentApplication, PaymentReceipt,
    PaymentStatus,
};
