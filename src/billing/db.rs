//! Postgres Billing Store
//!
//! Apply and void each run inside a single tenant-scoped transaction with
//! `FOR UPDATE` locks on the payment and charge rows, so concurrent
//! applications against the same unit serialize at the row level and the
//! balance invariants hold.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::sync::Arc;
use uuid::Uuid;

use super::engine::{apply_to_charge, plan_allocations, reverse_from_charge};
use super::store::BillingStore;
use super::types::{
    Charge, ChargeStatus, NewCharge, NewPayment, Payment, PaymentApplication, PaymentReceipt,
    PaymentStatus,
};
use crate::audit::{ActivityEvent, AuditSink};
use crate::core_types::{ChargeId, PaymentId, UnitId};
use crate::error::CoreError;
use crate::tenant::{TenantContext, TenantScope, TenantTx};

pub struct PgBillingStore {
    scope: TenantScope,
    audit: Arc<dyn AuditSink>,
}

impl PgBillingStore {
    pub fn new(scope: TenantScope, audit: Arc<dyn AuditSink>) -> Self {
        Self { scope, audit }
    }
}

fn row_to_charge(row: &PgRow) -> Result<Charge, CoreError> {
    let status_id: i16 = row.get("status");
    let status = ChargeStatus::from_id(status_id)
        .ok_or_else(|| CoreError::Database(format!("invalid charge status id: {status_id}")))?;
    Ok(Charge {
        id: row.get("id"),
        org_id: row.get("org_id"),
        unit_id: row.get("unit_id"),
        description: row.get("description"),
        amount: row.get("amount"),
        late_fee_amount: row.get("late_fee_amount"),
        total_amount: row.get("total_amount"),
        paid_amount: row.get("paid_amount"),
        balance_due: row.get("balance_due"),
        status,
        due_date: row.get("due_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment, CoreError> {
    let status_id: i16 = row.get("status");
    let status = PaymentStatus::from_id(status_id)
        .ok_or_else(|| CoreError::Database(format!("invalid payment status id: {status_id}")))?;
    Ok(Payment {
        id: row.get("id"),
        org_id: row.get("org_id"),
        unit_id: row.get("unit_id"),
        amount: row.get("amount"),
        applied_amount: row.get("applied_amount"),
        unapplied_amount: row.get("unapplied_amount"),
        status,
        received_at: row.get("received_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_application(row: &PgRow) -> PaymentApplication {
    PaymentApplication {
        payment_id: row.get("payment_id"),
        charge_id: row.get("charge_id"),
        amount: row.get("amount"),
        applied_at: row.get("applied_at"),
    }
}

const SELECT_CHARGE: &str = r#"
    SELECT id, org_id, unit_id, description, amount, late_fee_amount,
           total_amount, paid_amount, balance_due, status, due_date,
           created_at, updated_at
    FROM charges
    WHERE id = $1 AND org_id = $2
"#;

const SELECT_PAYMENT: &str = r#"
    SELECT id, org_id, unit_id, amount, applied_amount, unapplied_amount,
           status, received_at, created_at, updated_at
    FROM payments
    WHERE id = $1 AND org_id = $2
"#;

fn charge_not_found(id: ChargeId) -> CoreError {
    CoreError::NotFound(format!("charge {id} not found in tenant scope"))
}

fn payment_not_found(id: PaymentId) -> CoreError {
    CoreError::NotFound(format!("payment {id} not found in tenant scope"))
}

async fn update_charge(tx: &mut TenantTx, charge: &Charge) -> Result<(), CoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE charges
        SET late_fee_amount = $1, total_amount = $2, paid_amount = $3,
            balance_due = $4, status = $5, updated_at = $6
        WHERE id = $7 AND org_id = $8
        "#,
    )
    .bind(charge.late_fee_amount)
    .bind(charge.total_amount)
    .bind(charge.paid_amount)
    .bind(charge.balance_due)
    .bind(charge.status.id())
    .bind(charge.updated_at)
    .bind(charge.id)
    .bind(charge.org_id)
    .execute(tx.conn())
    .await?;
    if updated.rows_affected() == 0 {
        return Err(CoreError::ConcurrencyConflict(format!(
            "charge {} vanished during update",
            charge.id
        )));
    }
    Ok(())
}

#[async_trait]
impl BillingStore for PgBillingStore {
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

        let inserted = charge.clone();
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT INTO charges
                            (id, org_id, unit_id, description, amount, late_fee_amount,
                             total_amount, paid_amount, balance_due, status, due_date,
                             created_at, updated_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                        "#,
                    )
                    .bind(inserted.id)
                    .bind(inserted.org_id)
                    .bind(inserted.unit_id)
                    .bind(&inserted.description)
                    .bind(inserted.amount)
                    .bind(inserted.late_fee_amount)
                    .bind(inserted.total_amount)
                    .bind(inserted.paid_amount)
                    .bind(inserted.balance_due)
                    .bind(inserted.status.id())
                    .bind(inserted.due_date)
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
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let row = sqlx::query(SELECT_CHARGE)
                        .bind(id)
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?;
                    match row {
                        Some(row) => row_to_charge(&row),
                        None => Err(charge_not_found(id)),
                    }
                })
            })
            .await
    }

    async fn outstanding_charges(
        &self,
        ctx: &TenantContext,
        unit_id: UnitId,
    ) -> Result<Vec<Charge>, CoreError> {
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        r#"
                        SELECT id, org_id, unit_id, description, amount, late_fee_amount,
                               total_amount, paid_amount, balance_due, status, due_date,
                               created_at, updated_at
                        FROM charges
                        WHERE org_id = $1 AND unit_id = $2 AND balance_due > 0
                        ORDER BY due_date ASC, created_at ASC, id ASC
                        "#,
                    )
                    .bind(org_id)
                    .bind(unit_id)
                    .fetch_all(tx.conn())
                    .await?;
                    rows.iter().map(row_to_charge).collect()
                })
            })
            .await
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
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let locked = format!("{SELECT_CHARGE} FOR UPDATE");
                    let row = sqlx::query(&locked)
                        .bind(charge_id)
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?
                        .ok_or_else(|| charge_not_found(charge_id))?;
                    let mut charge = row_to_charge(&row)?;
                    if charge.balance_due <= Decimal::ZERO {
                        return Err(CoreError::Validation(
                            "cannot assess a late fee on a settled charge".into(),
                        ));
                    }
                    charge.late_fee_amount += fee;
                    charge.recompute();
                    charge.updated_at = Utc::now();
                    update_charge(tx, &charge).await?;
                    Ok(charge)
                })
            })
            .await
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

        let inserted = payment.clone();
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT INTO payments
                            (id, org_id, unit_id, amount, applied_amount, unapplied_amount,
                             status, received_at, created_at, updated_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        "#,
                    )
                    .bind(inserted.id)
                    .bind(inserted.org_id)
                    .bind(inserted.unit_id)
                    .bind(inserted.amount)
                    .bind(inserted.applied_amount)
                    .bind(inserted.unapplied_amount)
                    .bind(inserted.status.id())
                    .bind(inserted.received_at)
                    .bind(inserted.created_at)
                    .bind(inserted.updated_at)
                    .execute(tx.conn())
                    .await?;
                    Ok(())
                })
            })
            .await?;

        Ok(payment)
    }

    async fn get_payment(&self, ctx: &TenantContext, id: PaymentId) -> Result<Payment, CoreError> {
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let row = sqlx::query(SELECT_PAYMENT)
                        .bind(id)
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?;
                    match row {
                        Some(row) => row_to_payment(&row),
                        None => Err(payment_not_found(id)),
                    }
                })
            })
            .await
    }

    async fn applications(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentApplication>, CoreError> {
        let org_id = ctx.org_id;
        self.scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    // Existence check keeps cross-tenant probes on NotFound.
                    sqlx::query(SELECT_PAYMENT)
                        .bind(payment_id)
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?
                        .ok_or_else(|| payment_not_found(payment_id))?;

                    let rows = sqlx::query(
                        r#"
                        SELECT payment_id, charge_id, amount, applied_at
                        FROM payment_applications
                        WHERE payment_id = $1
                        ORDER BY applied_at ASC, charge_id ASC
                        "#,
                    )
                    .bind(payment_id)
                    .fetch_all(tx.conn())
                    .await?;
                    Ok(rows.iter().map(row_to_application).collect())
                })
            })
            .await
    }

    async fn apply_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReceipt, CoreError> {
        let org_id = ctx.org_id;
        let receipt = self
            .scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let locked_payment = format!("{SELECT_PAYMENT} FOR UPDATE");
                    let row = sqlx::query(&locked_payment)
                        .bind(payment_id)
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?
                        .ok_or_else(|| payment_not_found(payment_id))?;
                    let payment = row_to_payment(&row)?;

                    if payment.status == PaymentStatus::Voided {
                        return Err(CoreError::Validation(
                            "cannot apply a voided payment".into(),
                        ));
                    }

                    let existing = sqlx::query(
                        r#"
                        SELECT payment_id, charge_id, amount, applied_at
                        FROM payment_applications
                        WHERE payment_id = $1
                        ORDER BY applied_at ASC, charge_id ASC
                        "#,
                    )
                    .bind(payment_id)
                    .fetch_all(tx.conn())
                    .await?;
                    if !existing.is_empty() {
                        return Ok(PaymentReceipt {
                            payment,
                            applications: existing.iter().map(row_to_application).collect(),
                        });
                    }

                    // Lock the unit's open charges in allocation order; the
                    // allocation runs against this locked snapshot.
                    let rows = sqlx::query(
                        r#"
                        SELECT id, org_id, unit_id, description, amount, late_fee_amount,
                               total_amount, paid_amount, balance_due, status, due_date,
                               created_at, updated_at
                        FROM charges
                        WHERE org_id = $1 AND unit_id = $2 AND balance_due > 0
                        ORDER BY due_date ASC, created_at ASC, id ASC
                        FOR UPDATE
                        "#,
                    )
                    .bind(org_id)
                    .bind(payment.unit_id)
                    .fetch_all(tx.conn())
                    .await?;
                    let mut charges = rows
                        .iter()
                        .map(row_to_charge)
                        .collect::<Result<Vec<_>, _>>()?;

                    let allocations = plan_allocations(payment.amount, &charges);
                    let now = Utc::now();
                    let mut applications = Vec::with_capacity(allocations.len());
                    let mut applied_total = Decimal::ZERO;

                    for allocation in &allocations {
                        let charge = charges
                            .iter_mut()
                            .find(|c| c.id == allocation.charge_id)
                            .ok_or_else(|| charge_not_found(allocation.charge_id))?;
                        apply_to_charge(charge, allocation.amount);
                        charge.updated_at = now;
                        update_charge(tx, charge).await?;

                        sqlx::query(
                            r#"
                            INSERT INTO payment_applications
                                (payment_id, charge_id, amount, applied_at)
                            VALUES ($1, $2, $3, $4)
                            "#,
                        )
                        .bind(payment_id)
                        .bind(allocation.charge_id)
                        .bind(allocation.amount)
                        .bind(now)
                        .execute(tx.conn())
                        .await?;

                        applied_total += allocation.amount;
                        applications.push(PaymentApplication {
                            payment_id,
                            charge_id: allocation.charge_id,
                            amount: allocation.amount,
                            applied_at: now,
                        });
                    }

                    let mut payment = payment;
                    payment.applied_amount = applied_total;
                    payment.unapplied_amount = payment.amount - applied_total;
                    payment.updated_at = now;
                    sqlx::query(
                        r#"
                        UPDATE payments
                        SET applied_amount = $1, unapplied_amount = $2, updated_at = $3
                        WHERE id = $4 AND org_id = $5
                        "#,
                    )
                    .bind(payment.applied_amount)
                    .bind(payment.unapplied_amount)
                    .bind(payment.updated_at)
                    .bind(payment_id)
                    .bind(org_id)
                    .execute(tx.conn())
                    .await?;

                    Ok(PaymentReceipt {
                        payment,
                        applications,
                    })
                })
            })
            .await?;

        self.audit
            .record(ActivityEvent {
                org_id: ctx.org_id,
                entity_type: "payment",
                entity_id: payment_id.to_string(),
                action: "payment_applied".into(),
                performed_by: ctx.acting_user,
                previous_state: Some(format!("applied=0/{}", receipt.payment.amount)),
                new_state: Some(format!(
                    "applied={}/{}",
                    receipt.payment.applied_amount, receipt.payment.amount
                )),
            })
            .await;

        Ok(receipt)
    }

    async fn void_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> Result<PaymentReceipt, CoreError> {
        let org_id = ctx.org_id;
        let receipt = self
            .scope
            .with_scope(ctx, |tx| {
                Box::pin(async move {
                    let locked_payment = format!("{SELECT_PAYMENT} FOR UPDATE");
                    let row = sqlx::query(&locked_payment)
                        .bind(payment_id)
                        .bind(org_id)
                        .fetch_optional(tx.conn())
                        .await?
                        .ok_or_else(|| payment_not_found(payment_id))?;
                    let payment = row_to_payment(&row)?;

                    if payment.status == PaymentStatus::Voided {
                        return Ok(PaymentReceipt {
                            payment,
                            applications: Vec::new(),
                        });
                    }

                    let application_rows = sqlx::query(
                        r#"
                        SELECT payment_id, charge_id, amount, applied_at
                        FROM payment_applications
                        WHERE payment_id = $1
                        "#,
                    )
                    .bind(payment_id)
                    .fetch_all(tx.conn())
                    .await?;
                    let applications: Vec<PaymentApplication> =
                        application_rows.iter().map(row_to_application).collect();

                    let now = Utc::now();
                    for application in &applications {
                        let locked_charge = format!("{SELECT_CHARGE} FOR UPDATE");
                        let row = sqlx::query(&locked_charge)
                            .bind(application.charge_id)
                            .bind(org_id)
                            .fetch_optional(tx.conn())
                            .await?
                            .ok_or_else(|| charge_not_found(application.charge_id))?;
                        let mut charge = row_to_charge(&row)?;
                        reverse_from_charge(&mut charge, application);
                        charge.updated_at = now;
                        update_charge(tx, &charge).await?;
                    }

                    sqlx::query("DELETE FROM payment_applications WHERE payment_id = $1")
                        .bind(payment_id)
                        .execute(tx.conn())
                        .await?;

                    // CAS on status so a racing void observes the idempotent
                    // path instead of double-reversing.
                    let updated = sqlx::query(
                        r#"
                        UPDATE payments
                        SET status = $1, applied_amount = 0, unapplied_amount = amount,
                            updated_at = $2
                        WHERE id = $3 AND org_id = $4 AND status = $5
                        "#,
                    )
                    .bind(PaymentStatus::Voided.id())
                    .bind(now)
                    .bind(payment_id)
                    .bind(org_id)
                    .bind(PaymentStatus::Pending.id())
                    .execute(tx.conn())
                    .await?;
                    if updated.rows_affected() == 0 {
                        return Err(CoreError::ConcurrencyConflict(format!(
                            "payment {payment_id} changed status during void"
                        )));
                    }

                    let mut payment = payment;
                    payment.status = PaymentStatus::Voided;
                    payment.applied_amount = Decimal::ZERO;
                    payment.unapplied_amount = payment.amount;
                    payment.updated_at = now;

                    Ok(PaymentReceipt {
                        payment,
                        applications: Vec::new(),
                    })
                })
            })
            .await?;

        self.audit
            .record(ActivityEvent {
                org_id: ctx.org_id,
                entity_type: "payment",
                entity_id: payment_id.to_string(),
                action: "payment_voided".into(),
                performed_by: ctx.acting_user,
                previous_state: Some(PaymentStatus::Pending.as_str().to_string()),
                new_state: Some(PaymentStatus::Voided.as_str().to_string()),
            })
            .await;

        Ok(receipt)
    }
}
