//! Billing Workflow
//!
//! Charge creation, payment application, and payment void as durable runs.
//! Money-moving steps fail loudly so a bad attempt is never recorded; only
//! the trailing notification degrades.

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Services;
use super::job::notify_best_effort;
use crate::billing::{NewCharge, PaymentReceipt};
use crate::core_types::{ChargeId, PaymentId, UnitId};
use crate::error::CoreError;
use crate::workflow::{StepCtx, WorkflowDriver};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeSpec {
    pub description: String,
    pub amount: Decimal,
    pub due_date: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BillingAction {
    CreateCharges {
        unit_id: UnitId,
        charges: Vec<ChargeSpec>,
    },
    AssessLateFee {
        charge_id: ChargeId,
        fee: Decimal,
    },
    ApplyPayment {
        payment_id: PaymentId,
    },
    VoidPayment {
        payment_id: PaymentId,
    },
}

/// Recorded summary of an apply or void, small enough to live in a step
/// record but complete enough to rebuild the caller-facing result.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReceiptSummary {
    payment_id: PaymentId,
    status: String,
    applied_amount: Decimal,
    unapplied_amount: Decimal,
    applications: Vec<AppliedSlice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppliedSlice {
    charge_id: ChargeId,
    amount: Decimal,
}

impl From<&PaymentReceipt> for ReceiptSummary {
    fn from(receipt: &PaymentReceipt) -> Self {
        Self {
            payment_id: receipt.payment.id,
            status: receipt.payment.status.as_str().to_string(),
            applied_amount: receipt.payment.applied_amount,
            unapplied_amount: receipt.payment.unapplied_amount,
            applications: receipt
                .applications
                .iter()
                .map(|application| AppliedSlice {
                    charge_id: application.charge_id,
                    amount: application.amount,
                })
                .collect(),
        }
    }
}

pub struct BillingRunDriver {
    services: Services,
}

impl BillingRunDriver {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn create_charges(
        &self,
        step: &StepCtx,
        unit_id: UnitId,
        charges: &[ChargeSpec],
    ) -> Result<serde_json::Value, CoreError> {
        if charges.is_empty() {
            return Err(CoreError::Validation(
                "create_charges requires at least one charge".into(),
            ));
        }

        // One durable step per charge; a resume after a crash re-creates
        // only the charges that were never recorded.
        let mut charge_ids: Vec<ChargeId> = Vec::with_capacity(charges.len());
        for (index, spec) in charges.iter().enumerate() {
            let step_name = format!("create_charge_{index}");
            let charge_id: ChargeId = step
                .run_step(&step_name, || async {
                    let charge = self
                        .services
                        .billing
                        .create_charge(
                            &step.tenant,
                            NewCharge {
                                unit_id,
                                description: spec.description.clone(),
                                amount: spec.amount,
                                due_date: spec.due_date,
                            },
                        )
                        .await?;
                    Ok(charge.id)
                })
                .await?;
            charge_ids.push(charge_id);
        }

        step.progress(json!({"step": "charges_created", "count": charge_ids.len()}))
            .await?;

        let notified = notify_best_effort(
            step,
            &self.services,
            "charges_created",
            json!({"unit_id": unit_id, "count": charge_ids.len()}),
        )
        .await?;

        Ok(json!({
            "unit_id": unit_id,
            "charge_ids": charge_ids,
            "notification_queued": notified.queued,
        }))
    }

    async fn assess_late_fee(
        &self,
        step: &StepCtx,
        charge_id: ChargeId,
        fee: Decimal,
    ) -> Result<serde_json::Value, CoreError> {
        let balance: Decimal = step
            .run_step("assess_late_fee", || async {
                let charge = self
                    .services
                    .billing
                    .assess_late_fee(&step.tenant, charge_id, fee)
                    .await?;
                Ok(charge.balance_due)
            })
            .await?;
        step.progress(json!({"step": "late_fee_assessed", "charge_id": charge_id}))
            .await?;
        Ok(json!({"charge_id": charge_id, "balance_due": balance}))
    }

    async fn apply_payment(
        &self,
        step: &StepCtx,
        payment_id: PaymentId,
    ) -> Result<serde_json::Value, CoreError> {
        let summary: ReceiptSummary = step
            .run_step("apply_payment", || async {
                let receipt = self
                    .services
                    .billing
                    .apply_payment(&step.tenant, payment_id)
                    .await?;
                Ok(ReceiptSummary::from(&receipt))
            })
            .await?;
        step.progress(json!({
            "step": "payment_applied",
            "payment_id": payment_id,
            "applied": summary.applied_amount,
            "charges": summary.applications.len(),
        }))
        .await?;

        let notified = notify_best_effort(
            step,
            &self.services,
            "payment_applied",
            json!({"payment_id": payment_id, "applied": summary.applied_amount}),
        )
        .await?;

        let mut result = serde_json::to_value(&summary)?;
        result["notification_queued"] = json!(notified.queued);
        Ok(result)
    }

    async fn void_payment(
        &self,
        step: &StepCtx,
        payment_id: PaymentId,
    ) -> Result<serde_json::Value, CoreError> {
        let summary: ReceiptSummary = step
            .run_step("void_payment", || async {
                let receipt = self
                    .services
                    .billing
                    .void_payment(&step.tenant, payment_id)
                    .await?;
                Ok(ReceiptSummary::from(&receipt))
            })
            .await?;
        step.progress(json!({"step": "payment_voided", "payment_id": payment_id}))
            .await?;

        let notified = notify_best_effort(
            step,
            &self.services,
            "payment_voided",
            json!({"payment_id": payment_id}),
        )
        .await?;

        let mut result = serde_json::to_value(&summary)?;
        result["notification_queued"] = json!(notified.queued);
        Ok(result)
    }
}

impl WorkflowDriver for BillingRunDriver {
    fn name(&self) -> &'static str {
        "billing_run"
    }

    fn run<'a>(&'a self, step: StepCtx) -> BoxFuture<'a, Result<serde_json::Value, CoreError>> {
        Box::pin(async move {
            let action: BillingAction = serde_json::from_value(step.input.clone())?;
            match action {
                BillingAction::CreateCharges { unit_id, charges } => {
                    self.create_charges(&step, unit_id, &charges).await
                }
                BillingAction::AssessLateFee { charge_id, fee } => {
                    self.assess_late_fee(&step, charge_id, fee).await
                }
                BillingAction::ApplyPayment { payment_id } => {
                    self.apply_payment(&step, payment_id).await
                }
                BillingAction::VoidPayment { payment_id } => {
                    self.void_payment(&step, payment_id).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemoryAuditSink, TracingNotificationSink};
    use crate::billing::{BillingStore, ChargeStatus, MemoryBillingStore, NewPayment, PaymentStatus};
    use crate::lifecycle::MemoryEntityStore;
    use crate::tenant::TenantContext;
    use crate::workflow::{MemoryWorkflowStore, WorkflowEngine};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;
    use uuid::Uuid;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn setup() -> (Services, Arc<WorkflowEngine>, TenantContext) {
        let audit = Arc::new(MemoryAuditSink::default());
        let services = Services {
            entities: Arc::new(MemoryEntityStore::new(audit.clone())),
            billing: Arc::new(MemoryBillingStore::new(audit.clone())),
            audit,
            notify: Arc::new(TracingNotificationSink),
        };
        let engine = Arc::new(WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new())));
        super::super::register_all(&engine, &services);
        let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "test");
        (services, engine, ctx)
    }

    #[tokio::test]
    async fn test_create_charges_reports_count() {
        let (_, engine, ctx) = setup();
        let unit_id = Uuid::new_v4();
        let input = serde_json::to_value(BillingAction::CreateCharges {
            unit_id,
            charges: vec![
                ChargeSpec {
                    description: "June assessment".into(),
                    amount: dec("100"),
                    due_date: Utc::now(),
                },
                ChargeSpec {
                    description: "July assessment".into(),
                    amount: dec("100"),
                    due_date: Utc::now() + Duration::days(30),
                },
            ],
        })
        .unwrap();

        let handle = engine
            .submit(&ctx, "billing_run", "charges-2024-06", input)
            .await
            .unwrap();
        let outcome = handle.result().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.data["charge_ids"].as_array().unwrap().len(), 2);

        let progress = handle.latest_status().await.unwrap().unwrap();
        assert_eq!(progress.payload["step"], "charges_created");
        assert_eq!(progress.payload["count"], 2);
    }

    #[tokio::test]
    async fn test_apply_then_void_round_trip_through_workflow() {
        let (services, engine, ctx) = setup();
        let unit_id = Uuid::new_v4();

        let c1 = services
            .billing
            .create_charge(
                &ctx,
                crate::billing::NewCharge {
                    unit_id,
                    description: "May assessment".into(),
                    amount: dec("100"),
                    due_date: Utc::now() - Duration::days(30),
                },
            )
            .await
            .unwrap();
        let c2 = services
            .billing
            .create_charge(
                &ctx,
                crate::billing::NewCharge {
                    unit_id,
                    description: "June assessment".into(),
                    amount: dec("50"),
                    due_date: Utc::now(),
                },
            )
            .await
            .unwrap();
        let payment = services
            .billing
            .create_payment(
                &ctx,
                NewPayment {
                    unit_id,
                    amount: dec("120"),
                    received_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let apply = engine
            .submit(
                &ctx,
                "billing_run",
                "apply-1",
                serde_json::to_value(BillingAction::ApplyPayment {
                    payment_id: payment.id,
                })
                .unwrap(),
            )
            .await
            .unwrap()
            .result()
            .await
            .unwrap();
        assert!(apply.success);
        assert_eq!(apply.data["applied_amount"], json!(dec("120")));

        let paid_c1 = services.billing.get_charge(&ctx, c1.id).await.unwrap();
        assert_eq!(paid_c1.status, ChargeStatus::Paid);
        let partial_c2 = services.billing.get_charge(&ctx, c2.id).await.unwrap();
        assert_eq!(partial_c2.balance_due, dec("30"));

        let void = engine
            .submit(
                &ctx,
                "billing_run",
                "void-1",
                serde_json::to_value(BillingAction::VoidPayment {
                    payment_id: payment.id,
                })
                .unwrap(),
            )
            .await
            .unwrap()
            .result()
            .await
            .unwrap();
        assert!(void.success);

        let restored_c1 = services.billing.get_charge(&ctx, c1.id).await.unwrap();
        assert_eq!(restored_c1.balance_due, dec("100"));
        assert_eq!(restored_c1.status, ChargeStatus::Billed);
        let restored_c2 = services.billing.get_charge(&ctx, c2.id).await.unwrap();
        assert_eq!(restored_c2.balance_due, dec("50"));
        let voided = services.billing.get_payment(&ctx, payment.id).await.unwrap();
        assert_eq!(voided.status, PaymentStatus::Voided);
    }

    #[tokio::test]
    async fn test_duplicate_apply_submission_applies_once() {
        let (services, engine, ctx) = setup();
        let unit_id = Uuid::new_v4();
        services
            .billing
            .create_charge(
                &ctx,
                crate::billing::NewCharge {
                    unit_id,
                    description: "assessment".into(),
                    amount: dec("100"),
                    due_date: Utc::now(),
                },
            )
            .await
            .unwrap();
        let payment = services
            .billing
            .create_payment(
                &ctx,
                NewPayment {
                    unit_id,
                    amount: dec("60"),
                    received_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let input = serde_json::to_value(BillingAction::ApplyPayment {
            payment_id: payment.id,
        })
        .unwrap();
        let first = engine
            .submit(&ctx, "billing_run", "apply-1", input.clone())
            .await
            .unwrap()
            .result()
            .await
            .unwrap();
        let second = engine
            .submit(&ctx, "billing_run", "apply-1", input)
            .await
            .unwrap()
            .result()
            .await
            .unwrap();

        assert_eq!(first.data["applied_amount"], second.data["applied_amount"]);
        let fetched = services.billing.get_payment(&ctx, payment.id).await.unwrap();
        assert_eq!(fetched.applied_amount, dec("60"));
    }

    #[tokio::test]
    async fn test_void_unknown_payment_fails_cleanly() {
        let (_, engine, ctx) = setup();
        let outcome = engine
            .submit(
                &ctx,
                "billing_run",
                "void-missing",
                serde_json::to_value(BillingAction::VoidPayment {
                    payment_id: Uuid::new_v4(),
                })
                .unwrap(),
            )
            .await
            .unwrap()
            .result()
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("not found"));
    }
}
