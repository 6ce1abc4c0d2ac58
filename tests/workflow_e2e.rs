//! End-to-end workflow tests over the in-memory backends.
//!
//! Exercises the full path a caller sees: submit with an idempotency key,
//! poll the handle, observe the status stream, and verify the domain stores
//! afterwards.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use propflow::audit::{MemoryAuditSink, TracingNotificationSink};
use propflow::billing::{
    BillingStore, ChargeStatus, MemoryBillingStore, NewCharge, NewPayment, PaymentStatus,
};
use propflow::lifecycle::{
    EntityKind, EntityLink, EntityStatus, EntityStore, JobStatus, MemoryEntityStore, NewEntity,
    WorkOrderStatus,
};
use propflow::tenant::TenantContext;
use propflow::workflow::{MemoryWorkflowStore, WorkflowEngine, WorkflowState};
use propflow::workflows::{BillingAction, JobAction, Services, register_all};
use propflow::workflows::billing_run::ChargeSpec;

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

struct Harness {
    services: Services,
    engine: Arc<WorkflowEngine>,
    ctx: TenantContext,
}

fn harness() -> Harness {
    let audit = Arc::new(MemoryAuditSink::default());
    let services = Services {
        entities: Arc::new(MemoryEntityStore::new(audit.clone())),
        billing: Arc::new(MemoryBillingStore::new(audit.clone())),
        audit,
        notify: Arc::new(TracingNotificationSink),
    };
    let engine = Arc::new(WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new())));
    register_all(&engine, &services);
    Harness {
        services,
        engine,
        ctx: TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "e2e"),
    }
}

#[tokio::test]
async fn billing_cycle_end_to_end() {
    let h = harness();
    let unit_id = Uuid::new_v4();

    // Bill the unit through a workflow.
    let create = h
        .engine
        .submit(
            &h.ctx,
            "billing_run",
            "bill-2026-08",
            serde_json::to_value(BillingAction::CreateCharges {
                unit_id,
                charges: vec![
                    ChargeSpec {
                        description: "July assessment".into(),
                        amount: dec("100"),
                        due_date: Utc::now() - Duration::days(31),
                    },
                    ChargeSpec {
                        description: "August assessment".into(),
                        amount: dec("50"),
                        due_date: Utc::now() - Duration::days(1),
                    },
                ],
            })
            .unwrap(),
        )
        .await
        .unwrap()
        .result()
        .await
        .unwrap();
    assert!(create.success);

    // Receive and apply a payment covering the older charge plus part of
    // the newer one.
    let payment = h
        .services
        .billing
        .create_payment(
            &h.ctx,
            NewPayment {
                unit_id,
                amount: dec("120"),
                received_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    let apply = h
        .engine
        .submit(
            &h.ctx,
            "billing_run",
            "pay-0001",
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
    assert_eq!(apply.data["applications"].as_array().unwrap().len(), 2);

    let outstanding = h
        .services
        .billing
        .outstanding_charges(&h.ctx, unit_id)
        .await
        .unwrap();
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].balance_due, dec("30"));
    assert_eq!(outstanding[0].status, ChargeStatus::PartiallyPaid);

    // Void through a workflow and verify the exact restore.
    let void = h
        .engine
        .submit(
            &h.ctx,
            "billing_run",
            "void-0001",
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

    let restored = h
        .services
        .billing
        .outstanding_charges(&h.ctx, unit_id)
        .await
        .unwrap();
    assert_eq!(restored.len(), 2);
    assert!(restored.iter().all(|c| c.status == ChargeStatus::Billed));
    assert_eq!(
        restored.iter().map(|c| c.balance_due).sum::<Decimal>(),
        dec("150")
    );
    let voided = h
        .services
        .billing
        .get_payment(&h.ctx, payment.id)
        .await
        .unwrap();
    assert_eq!(voided.status, PaymentStatus::Voided);
    assert_eq!(voided.unapplied_amount, dec("120"));
}

#[tokio::test]
async fn duplicate_submission_returns_same_terminal_result() {
    let h = harness();
    let unit_id = Uuid::new_v4();
    h.services
        .billing
        .create_charge(
            &h.ctx,
            NewCharge {
                unit_id,
                description: "assessment".into(),
                amount: dec("80"),
                due_date: Utc::now(),
            },
        )
        .await
        .unwrap();
    let payment = h
        .services
        .billing
        .create_payment(
            &h.ctx,
            NewPayment {
                unit_id,
                amount: dec("80"),
                received_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let input = serde_json::to_value(BillingAction::ApplyPayment {
        payment_id: payment.id,
    })
    .unwrap();

    let first = h
        .engine
        .submit(&h.ctx, "billing_run", "pay-xyz", input.clone())
        .await
        .unwrap();
    let first_outcome = first.result().await.unwrap();

    // Resubmission after completion attaches and reads the same result.
    let second = h
        .engine
        .submit(&h.ctx, "billing_run", "pay-xyz", input)
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.id, first.id);
    let second_outcome = second.result().await.unwrap();
    assert_eq!(first_outcome.data, second_outcome.data);

    let fetched = h
        .services
        .billing
        .get_payment(&h.ctx, payment.id)
        .await
        .unwrap();
    assert_eq!(fetched.applied_amount, dec("80"));
}

#[tokio::test]
async fn job_lifecycle_keeps_linked_work_order_in_step() {
    let h = harness();

    let work_order = h
        .services
        .entities
        .create(
            &h.ctx,
            NewEntity {
                kind: EntityKind::WorkOrder,
                title: "repaint lobby".into(),
                link: None,
            },
        )
        .await
        .unwrap();
    let job = h
        .services
        .entities
        .create(
            &h.ctx,
            NewEntity {
                kind: EntityKind::Job,
                title: "lobby job".into(),
                link: Some(EntityLink {
                    kind: EntityKind::WorkOrder,
                    id: work_order.id,
                }),
            },
        )
        .await
        .unwrap();

    for (key, action) in [
        ("schedule", JobAction::Schedule { job_id: job.id }),
        ("dispatch", JobAction::Dispatch { job_id: job.id }),
        ("start", JobAction::Start { job_id: job.id }),
        (
            "complete",
            JobAction::Complete {
                job_id: job.id,
                notes: Some("done".into()),
            },
        ),
    ] {
        let outcome = h
            .engine
            .submit(
                &h.ctx,
                "job",
                key,
                serde_json::to_value(action).unwrap(),
            )
            .await
            .unwrap()
            .result()
            .await
            .unwrap();
        assert!(outcome.success, "{key}: {:?}", outcome.error);
    }

    let job = h
        .services
        .entities
        .get(&h.ctx, EntityKind::Job, job.id)
        .await
        .unwrap();
    assert_eq!(job.status, EntityStatus::Job(JobStatus::Completed));
    assert!(job.completed_at.is_some());

    let work_order = h
        .services
        .entities
        .get(&h.ctx, EntityKind::WorkOrder, work_order.id)
        .await
        .unwrap();
    assert_eq!(
        work_order.status,
        EntityStatus::WorkOrder(WorkOrderStatus::Completed)
    );
}

#[tokio::test]
async fn failed_run_reports_error_and_state() {
    let h = harness();

    let handle = h
        .engine
        .submit(
            &h.ctx,
            "billing_run",
            "void-ghost",
            serde_json::to_value(BillingAction::VoidPayment {
                payment_id: Uuid::new_v4(),
            })
            .unwrap(),
        )
        .await
        .unwrap();
    let outcome = handle.result().await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert_eq!(handle.state().await.unwrap(), WorkflowState::Failed);
    let error_event = handle.latest_error().await.unwrap().unwrap();
    assert_eq!(error_event.payload["code"], "NOT_FOUND");
}
