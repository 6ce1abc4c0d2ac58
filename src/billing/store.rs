//! Billing Store
//!
//! Storage seam for charges, payments, and applications. The apply/void
//! methods are coarse on purpose: one call is one business operation and one
//! transaction, so allocations, charge updates, and the payment update can
//! never half-commit. Both operations are idempotent so workflow step
//! retries re-running a body against current state stay safe.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::engine::{apply_to_charge, plan_allocations, reverse_from_charge, sort_for_allocation};
use super::types::{
    Charge, ChargeStatus, NewCharge, NewPayment, Payment, PaymentApplication, PaymentReceipt,
    PaymentStatus,
};
use crate::audit::{ActivityEvent, AuditSink};
use crate::core_types::{ChargeId, PaymentId, UnitId};
use crate::error::CoreError;
use crate::tenant::TenantContext;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn create_charge(&self, ctx: &TenantContext, new: NewCharge) -> Result<Charge, CoreError>;

    async fn get_charge(&self, ctx: &TenantContext, id: ChargeId) -> Result<Charge, CoreError>;

    /// Unpaid and partially paid charges for a unit, oldest due date first.
    async fn outstanding_charges(
        &self,
        ctx: &TenantContext,
        unit_id: UnitId,
    ) -> Result<Vec<Charge>, CoreError>;

    /// Add a late fee to an unsettled charge and recompute its balance.
    async fn assess_late_fee(
        &self,
        ctx: &TenantContext,
        charge_id: ChargeId,
        fee: Decimal,
    ) -> Result<Charge, CoreError>;

    async fn create_payment(
        &self,
        ctx: &TenantContext,
        new: NewPayment,
    ) -> Result<Payment, CoreError>;

    async fn get_payment(&self, ctx: &TenantContext, id: PaymentId) -> Result<Payment, CoreError>;

    async fn applications(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentApplication>, CoreError>;

    /// Allocate the payment across the unit's outstanding charges, oldest
    /// due first. Idempotent: a payment that already carries applications
    /// returns them unchanged.
    async fn apply_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReceipt, CoreError>;

    /// Exactly reverse a prior apply and void the payment. Idempotent: a
    /// voided payment returns its (empty) receipt.
    async fn void_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReceipt, CoreError>;
}

/// In-memory backend. One lock over all three tables keeps apply/void atomic.
pub struct MemoryBillingStore {
    inner: Mutex<Tables>,
    audit: Arc<dyn AuditSink>,
}

#[derive(Default)]
struct Tables {
    charges: HashMap<ChargeId, Charge>,
    payments: HashMap<PaymentId, Payment>,
    applications: Vec<PaymentApplication>,
}

impl MemoryBillingStore {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
            audit,
        }
    }
}

fn charge_not_found(id: ChargeId) -> CoreError {
    CoreError::NotFound(format!("charge {id} not found in tenant scope"))
}

fn payment_not_found(id: PaymentId) -> CoreError {
    CoreError::NotFound(format!("payment {id} not found in tenant scope"))
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn create_charge(
        &self,
        ctx: &TenantContext,
        new: NewCharge,
    ) -> Result<Charge, CoreError> {
        if new.amount <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "charge amount must be positive".into(),
            ));
        }
        let now = Utc::now();
        let mut charge = Charge {
            id: Uuid::new_v4(),
            org_id: ctx.org_id,
            unit_id: new.unit_id,
            description: new.description,
            amount: new.amount,
            late_fee_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            balance_due: Decimal::ZERO,
            status: ChargeStatus::Billed,
            due_date: new.due_date,
            created_at: now,
            updated_at: now,
        };
        charge.recompute();
        self.inner
            .lock()
            .unwrap()
            .charges
            .insert(charge.id, charge.clone());

        self.audit
            .record(ActivityEvent {
                org_id: ctx.org_id,
                entity_type: "charge",
                entity_id: charge.id.to_string(),
                action: "charge_created".into(),
                performed_by: ctx.acting_user,
                previous_state: None,
                new_state: Some(charge.status.as_str().to_string()),
            })
            .await;

        Ok(charge)
    }

    async fn get_charge(&self, ctx: &TenantContext, id: ChargeId) -> Result<Charge, CoreError> {
        self.inner
            .lock()
            .unwrap()
            .charges
            .get(&id)
            .filter(|c| c.org_id == ctx.org_id)
            .cloned()
            .ok_or_else(|| charge_not_found(id))
    }

    async fn outstanding_charges(
        &self,
        ctx: &TenantContext,
        unit_id: UnitId,
    ) -> Result<Vec<Charge>, CoreError> {
        let tables = self.inner.lock().unwrap();
        let mut charges: Vec<Charge> = tables
            .charges
            .values()
            .filter(|c| {
                c.org_id == ctx.org_id && c.unit_id == unit_id && c.balance_due > Decimal::ZERO
            })
            .cloned()
            .collect();
        sort_for_allocation(&mut charges);
        Ok(charges)
    }

    async fn assess_late_fee(
        &self,
        ctx: &TenantContext,
        charge_id: ChargeId,
        fee: Decimal,
    ) -> Result<Charge, CoreError> {
        if fee <= Decimal::ZERO {
            return Err(CoreError::Validation("late fee must be positive".into()));
        }
        let mut tables = self.inner.lock().unwrap();
        let charge = tables
            .charges
            .get_mut(&charge_id)
            .filter(|c| c.org_id == ctx.org_id)
            .ok_or_else(|| charge_not_found(charge_id))?;
        if charge.balance_due <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "cannot assess a late fee on a settled charge".into(),
            ));
        }
        charge.late_fee_amount += fee;
        charge.recompute();
        charge.updated_at = Utc::now();
        Ok(charge.clone())
    }

    async fn create_payment(
        &self,
        ctx: &TenantContext,
        new: NewPayment,
    ) -> Result<Payment, CoreError> {
        if new.amount <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "payment amount must be positive".into(),
            ));
        }
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            org_id: ctx.org_id,
            unit_id: new.unit_id,
            amount: new.amount,
            applied_amount: Decimal::ZERO,
            unapplied_amount: new.amount,
            status: PaymentStatus::Pending,
            received_at: new.received_at,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .unwrap()
            .payments
            .insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, ctx: &TenantContext, id: PaymentId) -> Result<Payment, CoreError> {
        self.inner
            .lock()
            .unwrap()
            .payments
            .get(&id)
            .filter(|p| p.org_id == ctx.org_id)
            .cloned()
            .ok_or_else(|| payment_not_found(id))
    }

    async fn applications(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentApplication>, CoreError> {
        let tables = self.inner.lock().unwrap();
        tables
            .payments
            .get(&payment_id)
            .filter(|p| p.org_id == ctx.org_id)
            .ok_or_else(|| payment_not_found(payment_id))?;
        Ok(tables
            .applications
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn apply_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReceipt, CoreError> {
        let (receipt, event) = {
            let mut tables = self.inner.lock().unwrap();
            let payment = tables
                .payments
                .get(&payment_id)
                .filter(|p| p.org_id == ctx.org_id)
                .cloned()
                .ok_or_else(|| payment_not_found(payment_id))?;

            if payment.status == PaymentStatus::Voided {
                return Err(CoreError::Validation(
                    "cannot apply a voided payment".into(),
                ));
            }

            let existing: Vec<PaymentApplication> = tables
                .applications
                .iter()
                .filter(|a| a.payment_id == payment_id)
                .cloned()
                .collect();
            if !existing.is_empty() {
                // Already applied; step retry replays the same receipt.
                return Ok(PaymentReceipt {
                    payment,
                    applications: existing,
                });
            }

            let mut charges: Vec<Charge> = tables
                .charges
                .values()
                .filter(|c| {
                    c.org_id == ctx.org_id
                        && c.unit_id == payment.unit_id
                        && c.balance_due > Decimal::ZERO
                })
                .cloned()
                .collect();
            sort_for_allocation(&mut charges);

            let allocations = plan_allocations(payment.amount, &charges);
            let now = Utc::now();
            let mut applications = Vec::with_capacity(allocations.len());
            let mut applied_total = Decimal::ZERO;

            for allocation in &allocations {
                let charge = tables
                    .charges
                    .get_mut(&allocation.charge_id)
                    .ok_or_else(|| charge_not_found(allocation.charge_id))?;
                apply_to_charge(charge, allocation.amount);
                charge.updated_at = now;
                applied_total += allocation.amount;
                applications.push(PaymentApplication {
                    payment_id,
                    charge_id: allocation.charge_id,
                    amount: allocation.amount,
                    applied_at: now,
                });
            }

            tables.applications.extend(applications.iter().cloned());

            let payment = tables
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| payment_not_found(payment_id))?;
            payment.applied_amount = applied_total;
            payment.unapplied_amount = payment.amount - applied_total;
            payment.updated_at = now;
            let snapshot = payment.clone();

            let event = ActivityEvent {
                org_id: ctx.org_id,
                entity_type: "payment",
                entity_id: payment_id.to_string(),
                action: "payment_applied".into(),
                performed_by: ctx.acting_user,
                previous_state: Some(format!("applied=0/{}", snapshot.amount)),
                new_state: Some(format!("applied={}/{}", applied_total, snapshot.amount)),
            };
            (
                PaymentReceipt {
                    payment: snapshot,
                    applications,
                },
                event,
            )
        };

        self.audit.record(event).await;
        Ok(receipt)
    }

    async fn void_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReceipt, CoreError> {
        let (receipt, event) = {
            let mut tables = self.inner.lock().unwrap();
            let payment = tables
                .payments
                .get(&payment_id)
                .filter(|p| p.org_id == ctx.org_id)
                .cloned()
                .ok_or_else(|| payment_not_found(payment_id))?;

            if payment.status == PaymentStatus::Voided {
                return Ok(PaymentReceipt {
                    payment,
                    applications: Vec::new(),
                });
            }

            let applications: Vec<PaymentApplication> = tables
                .applications
                .iter()
                .filter(|a| a.payment_id == payment_id)
                .cloned()
                .collect();

            let now = Utc::now();
            for application in &applications {
                let charge = tables
                    .charges
                    .get_mut(&application.charge_id)
                    .ok_or_else(|| charge_not_found(application.charge_id))?;
                reverse_from_charge(charge, application);
                charge.updated_at = now;
            }
            tables.applications.retain(|a| a.payment_id != payment_id);

            let payment = tables
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| payment_not_found(payment_id))?;
            let previous_applied = payment.applied_amount;
            payment.status = PaymentStatus::Voided;
            payment.applied_amount = Decimal::ZERO;
            payment.unapplied_amount = payment.amount;
            payment.updated_at = now;
            let snapshot = payment.clone();

            let event = ActivityEvent {
                org_id: ctx.org_id,
                entity_type: "payment",
                entity_id: payment_id.to_string(),
                action: "payment_voided".into(),
                performed_by: ctx.acting_user,
                previous_state: Some(format!("applied={previous_applied}")),
                new_state: Some("VOIDED".into()),
            };
            (
                PaymentReceipt {
                    payment: snapshot,
                    applications: Vec::new(),
                },
                event,
            )
        };

        self.audit.record(event).await;
        Ok(receipt)
    }
}
