//! Postgres schema bootstrap
//!
//! Creates every table the core touches, idempotently, at startup. Column
//! types mirror what the store layers bind: smallint status ids, numeric
//! money, jsonb payloads, text ULIDs for workflow ids.

use sqlx::PgPool;
use tracing::info;

use crate::error::CoreError;

const CREATE_LIFECYCLE_ENTITIES: &str = r#"
    CREATE TABLE IF NOT EXISTS lifecycle_entities (
        id              UUID PRIMARY KEY,
        org_id          UUID NOT NULL,
        kind            SMALLINT NOT NULL,
        title           TEXT NOT NULL,
        status          SMALLINT NOT NULL,
        link_kind       SMALLINT,
        link_id         UUID,
        dispatched_at   TIMESTAMPTZ,
        completed_at    TIMESTAMPTZ,
        closed_at       TIMESTAMPTZ,
        closed_by       UUID,
        cancelled_at    TIMESTAMPTZ,
        deleted_at      TIMESTAMPTZ,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_STATUS_HISTORY: &str = r#"
    CREATE TABLE IF NOT EXISTS status_history (
        id              UUID PRIMARY KEY,
        org_id          UUID NOT NULL,
        entity_kind     SMALLINT NOT NULL,
        entity_id       UUID NOT NULL,
        from_status     SMALLINT NOT NULL,
        to_status       SMALLINT NOT NULL,
        changed_by      UUID NOT NULL,
        changed_at      TIMESTAMPTZ NOT NULL,
        notes           TEXT
    )
"#;

const CREATE_CHARGES: &str = r#"
    CREATE TABLE IF NOT EXISTS charges (
        id              UUID PRIMARY KEY,
        org_id          UUID NOT NULL,
        unit_id         UUID NOT NULL,
        description     TEXT NOT NULL,
        amount          NUMERIC NOT NULL,
        late_fee_amount NUMERIC NOT NULL,
        total_amount    NUMERIC NOT NULL,
        paid_amount     NUMERIC NOT NULL,
        balance_due     NUMERIC NOT NULL,
        status          SMALLINT NOT NULL,
        due_date        TIMESTAMPTZ NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_PAYMENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS payments (
        id               UUID PRIMARY KEY,
        org_id           UUID NOT NULL,
        unit_id          UUID NOT NULL,
        amount           NUMERIC NOT NULL,
        applied_amount   NUMERIC NOT NULL,
        unapplied_amount NUMERIC NOT NULL,
        status           SMALLINT NOT NULL,
        received_at      TIMESTAMPTZ NOT NULL,
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_PAYMENT_APPLICATIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS payment_applications (
        payment_id  UUID NOT NULL,
        charge_id   UUID NOT NULL,
        amount      NUMERIC NOT NULL,
        applied_at  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (payment_id, charge_id)
    )
"#;

const CREATE_WORKFLOW_INSTANCES: &str = r#"
    CREATE TABLE IF NOT EXISTS workflow_instances (
        id              TEXT PRIMARY KEY,
        org_id          UUID NOT NULL,
        acting_user     UUID NOT NULL,
        name            TEXT NOT NULL,
        idempotency_key TEXT NOT NULL,
        input           JSONB NOT NULL,
        state           SMALLINT NOT NULL,
        error           TEXT,
        retry_count     INT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        UNIQUE (org_id, name, idempotency_key)
    )
"#;

const CREATE_WORKFLOW_STEPS: &str = r#"
    CREATE TABLE IF NOT EXISTS workflow_steps (
        workflow_id TEXT NOT NULL,
        step_name   TEXT NOT NULL,
        output      JSONB NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (workflow_id, step_name)
    )
"#;

const CREATE_WORKFLOW_EVENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS workflow_events (
        workflow_id TEXT NOT NULL,
        seq         BIGINT NOT NULL,
        kind        SMALLINT NOT NULL,
        payload     JSONB NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (workflow_id, seq)
    )
"#;

/// Create all core tables if they do not exist.
pub async fn init_schema(pool: &PgPool) -> Result<(), CoreError> {
    info!("Initializing PostgreSQL schema");
    for statement in [
        CREATE_LIFECYCLE_ENTITIES,
        CREATE_STATUS_HISTORY,
        CREATE_CHARGES,
        CREATE_PAYMENTS,
        CREATE_PAYMENT_APPLICATIONS,
        CREATE_WORKFLOW_INSTANCES,
        CREATE_WORKFLOW_STEPS,
        CREATE_WORKFLOW_EVENTS,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Schema ready");
    Ok(())
}
