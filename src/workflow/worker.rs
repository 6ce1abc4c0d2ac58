//! Recovery Worker
//!
//! Background worker that scans for and resumes stuck workflow instances.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::engine::WorkflowEngine;
use crate::config::RecoveryConfig;
use crate::error::CoreError;

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale instances
    pub scan_interval: Duration,
    /// How long an instance must be stuck to be considered stale
    pub stale_threshold: Duration,
    /// Maximum instances to re-drive per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&RecoveryConfig> for WorkerConfig {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            stale_threshold: Duration::from_secs(config.stale_threshold_secs),
            batch_size: config.batch_size,
        }
    }
}

/// Recovery Worker
///
/// Periodically scans for RUNNING instances whose heartbeat went stale
/// (process crash, lost task) and re-drives them through the engine.
/// Re-driving is safe against a still-live original: recorded steps replay
/// and the terminal CAS admits one finisher.
pub struct RecoveryWorker {
    engine: Arc<WorkflowEngine>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(engine: Arc<WorkflowEngine>, config: WorkerConfig) -> Self {
        Self { engine, config }
    }

    pub fn with_defaults(engine: Arc<WorkflowEngine>) -> Self {
        Self::new(engine, WorkerConfig::default())
    }

    /// Run the recovery worker loop
    ///
    /// This method runs forever, periodically scanning for and resuming
    /// stale instances.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan and recovery cycle
    pub async fn scan_and_recover(&self) -> Result<usize, CoreError> {
        let stale = self
            .engine
            .store()
            .find_stale(self.config.stale_threshold)
            .await?;

        if stale.is_empty() {
            debug!("No stale workflows found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale workflows to recover");

        let mut recovered = 0;

        for instance in stale.iter().take(self.config.batch_size) {
            debug!(
                workflow_id = %instance.id,
                name = %instance.name,
                retry_count = instance.retry_count,
                "Recovering workflow"
            );

            if instance.retry_count > 10 {
                warn!(
                    workflow_id = %instance.id,
                    name = %instance.name,
                    retry_count = instance.retry_count,
                    "Workflow stuck after many recovery attempts"
                );
            }

            match self.engine.resume(instance.id).await {
                Ok(state) => {
                    if state.is_terminal() {
                        info!(
                            workflow_id = %instance.id,
                            state = %state,
                            "Workflow recovered to terminal state"
                        );
                        recovered += 1;
                    }
                }
                Err(e) => {
                    error!(
                        workflow_id = %instance.id,
                        error = %e,
                        "Failed to recover workflow"
                    );
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered workflows this scan");
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::engine::{StepCtx, WorkflowDriver};
    use crate::workflow::memory::MemoryWorkflowStore;
    use crate::workflow::types::{WorkflowInstance, WorkflowState};
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct OneStepDriver {
        runs: AtomicUsize,
    }

    impl WorkflowDriver for OneStepDriver {
        fn name(&self) -> &'static str {
            "one_step"
        }

        fn run<'a>(&'a self, step: StepCtx) -> BoxFuture<'a, Result<serde_json::Value, CoreError>> {
            Box::pin(async move {
                let value: u64 = step
                    .run_step("only", || async {
                        self.runs.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                    .await?;
                Ok(json!({"value": value}))
            })
        }
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_scan_recovers_crashed_instance() {
        let engine = Arc::new(WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new())));
        let driver = Arc::new(OneStepDriver {
            runs: AtomicUsize::new(0),
        });
        engine.register(driver.clone());

        // A crashed run: persisted instance, no live task driving it.
        let store = engine.store();
        let instance = WorkflowInstance::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "one_step",
            "crashed",
            json!({}),
        );
        let id = store.create_instance(instance).await.unwrap().instance.id;

        let worker = RecoveryWorker::new(
            Arc::clone(&engine),
            WorkerConfig {
                stale_threshold: Duration::from_secs(0),
                ..WorkerConfig::default()
            },
        );

        let recovered = worker.scan_and_recover().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(driver.runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get_instance(id).await.unwrap().state,
            WorkflowState::Completed
        );

        // Second scan finds nothing left to do.
        assert_eq!(worker.scan_and_recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_noop_when_nothing_stale() {
        let engine = Arc::new(WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new())));
        let worker = RecoveryWorker::with_defaults(Arc::clone(&engine));
        assert_eq!(worker.scan_and_recover().await.unwrap(), 0);
    }
}
