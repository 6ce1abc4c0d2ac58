//! propflow service entrypoint
//!
//! Wires config, logging, stores, the workflow engine, and the recovery
//! worker, then parks on ctrl-c. With `postgres_url` (or `DATABASE_URL`)
//! set, everything runs against Postgres; without it the service runs on
//! the in-memory backends for local development.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use propflow::audit::{AuditSink, NotificationSink, TracingAuditSink, TracingNotificationSink};
use propflow::billing::{MemoryBillingStore, PgBillingStore};
use propflow::config::AppConfig;
use propflow::lifecycle::{MemoryEntityStore, PgEntityStore};
use propflow::logging::init_logging;
use propflow::tenant::TenantScope;
use propflow::workflow::{
    MemoryWorkflowStore, PgWorkflowStore, RecoveryWorker, WorkerConfig, WorkflowEngine,
    WorkflowStore,
};
use propflow::workflows::{Services, register_all};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("config/propflow.yaml")?;
    let _guard = init_logging(&config);

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let notify: Arc<dyn NotificationSink> = Arc::new(TracingNotificationSink);

    let (workflow_store, services): (Arc<dyn WorkflowStore>, Services) =
        match &config.postgres_url {
            Some(url) => {
                let pool = PgPoolOptions::new().max_connections(16).connect(url).await?;
                info!("Connected to PostgreSQL");
                propflow::schema::init_schema(&pool).await?;
                let scope = TenantScope::new(pool.clone());
                (
                    Arc::new(PgWorkflowStore::new(pool)),
                    Services {
                        entities: Arc::new(PgEntityStore::new(scope.clone(), audit.clone())),
                        billing: Arc::new(PgBillingStore::new(scope, audit.clone())),
                        audit,
                        notify,
                    },
                )
            }
            None => {
                warn!("No postgres_url configured, running on in-memory stores");
                (
                    Arc::new(MemoryWorkflowStore::new()),
                    Services {
                        entities: Arc::new(MemoryEntityStore::new(audit.clone())),
                        billing: Arc::new(MemoryBillingStore::new(audit.clone())),
                        audit,
                        notify,
                    },
                )
            }
        };

    let engine = Arc::new(WorkflowEngine::new(workflow_store));
    register_all(&engine, &services);

    let worker = RecoveryWorker::new(Arc::clone(&engine), WorkerConfig::from(&config.recovery));
    tokio::spawn(async move {
        worker.run().await;
    });

    info!("propflow core ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
