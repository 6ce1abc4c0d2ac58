//! Payment Allocation Engine
//!
//! Pure functions. The forward pass walks outstanding charges oldest due
//! date first and applies `min(remaining, balance_due)` to each; the reverse
//! pass undoes one application exactly. Stores run these against row-locked
//! current state so the computation is reproducible for a given snapshot.

use rust_decimal::Decimal;

use super::types::{Charge, PaymentApplication};
use crate::core_types::ChargeId;

/// One planned slice of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub charge_id: ChargeId,
    pub amount: Decimal,
}

/// Deterministic ordering for allocation: due date ascending, then creation
/// time, then id as the final tie-break.
pub fn sort_for_allocation(charges: &mut [Charge]) {
    charges.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Greedy oldest-due-first allocation. Charges must already be in allocation
/// order; charges without an outstanding balance are skipped.
pub fn plan_allocations(available: Decimal, charges: &[Charge]) -> Vec<Allocation> {
    let mut remaining = available;
    let mut allocations = Vec::new();

    for charge in charges {
        if remaining <= Decimal::ZERO {
            break;
        }
        if charge.balance_due <= Decimal::ZERO {
            continue;
        }
        let slice = remaining.min(charge.balance_due);
        allocations.push(Allocation {
            charge_id: charge.id,
            amount: slice,
        });
        remaining -= slice;
    }

    allocations
}

/// Forward: apply one allocation slice to a charge.
pub fn apply_to_charge(charge: &mut Charge, amount: Decimal) {
    charge.paid_amount += amount;
    charge.recompute();
}

/// Reverse: subtract one prior application from a charge, floored at zero.
/// `recompute` restores balance and status exactly as they were before the
/// application (pre-existing partial payments survive).
pub fn reverse_from_charge(charge: &mut Charge, application: &PaymentApplication) {
    charge.paid_amount = (charge.paid_amount - application.amount).max(Decimal::ZERO);
    charge.recompute();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::types::ChargeStatus;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str_exact(value).unwrap()
    }

    fn charge_due_in(days: i64, amount: &str) -> Charge {
        let now = Utc::now();
        let mut charge = Charge {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            description: "assessment".into(),
            amount: dec(amount),
            late_fee_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            balance_due: Decimal::ZERO,
            status: ChargeStatus::Billed,
            due_date: now + Duration::days(days),
            created_at: now,
            updated_at: now,
        };
        charge.recompute();
        charge
    }

    #[test]
    fn test_allocation_is_oldest_first() {
        let mut charges = vec![
            charge_due_in(30, "50"),
            charge_due_in(1, "100"),
            charge_due_in(15, "75"),
        ];
        sort_for_allocation(&mut charges);

        let allocations = plan_allocations(dec("120"), &charges);
        assert_eq!(allocations.len(), 2);
        // Oldest (day 1) fully covered, then day 15 partially.
        assert_eq!(allocations[0].charge_id, charges[0].id);
        assert_eq!(allocations[0].amount, dec("100"));
        assert_eq!(allocations[1].charge_id, charges[1].id);
        assert_eq!(allocations[1].amount, dec("20"));
    }

    #[test]
    fn test_allocation_skips_settled_charges() {
        let mut paid = charge_due_in(1, "40");
        apply_to_charge(&mut paid, dec("40"));
        let open = charge_due_in(2, "60");
        let charges = vec![paid, open.clone()];

        let allocations = plan_allocations(dec("50"), &charges);
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].charge_id, open.id);
        assert_eq!(allocations[0].amount, dec("50"));
    }

    #[test]
    fn test_allocation_exhausts_payment_or_charges() {
        let charges = vec![charge_due_in(1, "30"), charge_due_in(2, "30")];

        // Payment larger than all balances: both fully covered, 40 left over.
        let allocations = plan_allocations(dec("100"), &charges);
        let applied: Decimal = allocations.iter().map(|a| a.amount).sum();
        assert_eq!(applied, dec("60"));

        // Zero payment allocates nothing.
        assert!(plan_allocations(Decimal::ZERO, &charges).is_empty());
    }

    #[test]
    fn test_allocation_is_reproducible() {
        let mut charges = vec![
            charge_due_in(3, "10"),
            charge_due_in(2, "20"),
            charge_due_in(1, "30"),
        ];
        sort_for_allocation(&mut charges);
        let first = plan_allocations(dec("45"), &charges);
        let second = plan_allocations(dec("45"), &charges);
        assert_eq!(first, second);
    }

    #[test]
    fn test_apply_then_reverse_restores_charge_exactly() {
        let mut charge = charge_due_in(1, "100");
        // Pre-existing partial payment.
        apply_to_charge(&mut charge, dec("25"));
        let before = charge.clone();

        apply_to_charge(&mut charge, dec("75"));
        assert_eq!(charge.status, ChargeStatus::Paid);
        assert_eq!(charge.balance_due, Decimal::ZERO);

        let application = PaymentApplication {
            payment_id: Uuid::new_v4(),
            charge_id: charge.id,
            amount: dec("75"),
            applied_at: Utc::now(),
        };
        reverse_from_charge(&mut charge, &application);

        assert_eq!(charge.paid_amount, before.paid_amount);
        assert_eq!(charge.balance_due, before.balance_due);
        assert_eq!(charge.status, before.status);
        assert_eq!(charge.status, ChargeStatus::PartiallyPaid);
    }

    #[test]
    fn test_reverse_floors_at_zero() {
        let mut charge = charge_due_in(1, "50");
        apply_to_charge(&mut charge, dec("20"));
        let application = PaymentApplication {
            payment_id: Uuid::new_v4(),
            charge_id: charge.id,
            amount: dec("30"),
            applied_at: Utc::now(),
        };
        reverse_from_charge(&mut charge, &application);
        assert_eq!(charge.paid_amount, Decimal::ZERO);
        assert_eq!(charge.status, ChargeStatus::Billed);
    }
}
