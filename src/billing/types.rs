//! Billing Core Types
//!
//! Charges, payments, and the application rows linking them. All amounts are
//! `rust_decimal::Decimal`; derived fields (`total_amount`, `balance_due`,
//! charge status) are always recomputed from their inputs, never set
//! independently.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::{ChargeId, OrgId, PaymentId, UnitId};

/// Charge status, stored as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ChargeStatus {
    /// Billed, nothing paid yet
    Billed = 1,
    PartiallyPaid = 2,
    Paid = 3,
}

impl ChargeStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ChargeStatus::Billed),
            2 => Some(ChargeStatus::PartiallyPaid),
            3 => Some(ChargeStatus::Paid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Billed => "BILLED",
            ChargeStatus::PartiallyPaid => "PARTIALLY_PAID",
            ChargeStatus::Paid => "PAID",
        }
    }
}

/// Payment status, stored as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum PaymentStatus {
    Pending = 1,
    Voided = 2,
}

impl PaymentStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(PaymentStatus::Pending),
            2 => Some(PaymentStatus::Voided),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Voided => "VOIDED",
        }
    }
}

/// One assessment charge against a unit.
#[derive(Debug, Clone)]
pub struct Charge {
    pub id: ChargeId,
    pub org_id: OrgId,
    pub unit_id: UnitId,
    pub description: String,
    pub amount: Decimal,
    pub late_fee_amount: Decimal,
    /// Always `amount + late_fee_amount`.
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    /// Always `total_amount - paid_amount`.
    pub balance_due: Decimal,
    pub status: ChargeStatus,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Charge {
    /// Recompute the derived fields from amount/late fee/paid.
    /// This is the only way status and balance change.
    pub fn recompute(&mut self) {
        self.total_amount = self.amount + self.late_fee_amount;
        self.balance_due = self.total_amount - self.paid_amount;
        self.status = if self.balance_due <= Decimal::ZERO {
            ChargeStatus::Paid
        } else if self.paid_amount > Decimal::ZERO {
            ChargeStatus::PartiallyPaid
        } else {
            ChargeStatus::Billed
        };
    }
}

/// Input for charge creation.
#[derive(Debug, Clone)]
pub struct NewCharge {
    pub unit_id: UnitId,
    pub description: String,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
}

/// An incoming payment from a unit.
#[derive(Debug, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub org_id: OrgId,
    pub unit_id: UnitId,
    pub amount: Decimal,
    pub applied_amount: Decimal,
    /// Always `amount - applied_amount`.
    pub unapplied_amount: Decimal,
    pub status: PaymentStatus,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for payment creation.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub unit_id: UnitId,
    pub amount: Decimal,
    pub received_at: DateTime<Utc>,
}

/// One applied slice of a payment. Identity = (payment_id, charge_id).
#[derive(Debug, Clone)]
pub struct PaymentApplication {
    pub payment_id: PaymentId,
    pub charge_id: ChargeId,
    pub amount: Decimal,
    pub applied_at: DateTime<Utc>,
}

/// Result of an apply or void operation.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub applications: Vec<PaymentApplication>,
}
