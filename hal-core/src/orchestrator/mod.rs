//! Task orchestration
//!
//! Composes the pool, the task manager and the executor. `start_task`
//! is true fire-and-forget: the executor runs on its own tokio task
//! and reports only through the store and the event stream. `recover`
//! brings a restarted process back in sync with whatever the previous
//! one left behind.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::HalConfig;
use crate::credentials::Credentials;
use crate::error::HalError;
use crate::pool::{ReconcileReport, VmPool};
use crate::provider::Provider;
use crate::store::{Store, TaskRecord, TaskStatus, VmStatus};
use crate::tasks::TaskManager;
use crate::wrapper::{ExecOptions, TaskExecutor};

/// Database file name under the data root
pub const DB_FILE: &str = "hal9999.db";

/// What a recovery pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverReport {
    pub reconcile: ReconcileReport,
    /// In-flight tasks force-failed
    pub failed: usize,
    /// Running tasks picked back up for polling
    pub resumed: usize,
}

/// The top-level orchestrator
pub struct Orchestrator {
    store: Arc<Store>,
    pool: Arc<VmPool>,
    tasks: TaskManager,
    executor: Arc<TaskExecutor>,
}

impl Orchestrator {
    /// Compose an orchestrator over an existing store and pool
    pub fn new(
        store: Arc<Store>,
        pool: Arc<VmPool>,
        config: HalConfig,
        credentials: Credentials,
    ) -> Arc<Self> {
        let tasks = TaskManager::new(store.clone());
        let executor = Arc::new(TaskExecutor::new(
            pool.clone(),
            tasks.clone(),
            config,
            credentials,
        ));
        Arc::new(Self {
            store,
            pool,
            tasks,
            executor,
        })
    }

    /// Open the store under the configured data root and wire
    /// everything up
    pub fn open(
        config: HalConfig,
        providers: HashMap<String, Arc<dyn Provider>>,
        credentials: Credentials,
    ) -> Result<Arc<Self>, HalError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            HalError::Config(crate::error::ConfigError::Invalid {
                name: "data_dir".to_string(),
                reason: e.to_string(),
            })
        })?;
        let store = Arc::new(Store::open(config.data_dir.join(DB_FILE))?);
        let pool = VmPool::new(store.clone(), config.slots.clone(), providers);
        Ok(Self::new(store, pool, config, credentials))
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn pool(&self) -> &Arc<VmPool> {
        &self.pool
    }

    /// Create a task and execute it in the background; returns as soon
    /// as the row exists.
    pub fn start_task(
        &self,
        repo_url: &str,
        context: &str,
        opts: ExecOptions,
    ) -> Result<TaskRecord, HalError> {
        let task = self.tasks.create(repo_url, context)?;
        info!(task = %task.slug, repo = %repo_url, "task submitted");
        let executor = self.executor.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            executor.execute(&task_id, &opts).await;
        });
        Ok(task)
    }

    /// Create a task and wait for its terminal state
    pub async fn run_task(
        &self,
        repo_url: &str,
        context: &str,
        opts: ExecOptions,
    ) -> Result<TaskRecord, HalError> {
        let task = self.tasks.create(repo_url, context)?;
        info!(task = %task.slug, repo = %repo_url, "task submitted (awaited)");
        self.executor.execute(&task.id, &opts).await;
        Ok(self.tasks.get(&task.id)?.unwrap_or(task))
    }

    /// Recover in-flight work after a process restart.
    ///
    /// Reconcile first (which also force-fails stale tasks and frees
    /// their VMs), then sweep what is left in flight: tasks that died
    /// in setup are failed, running tasks with a live VM resume
    /// polling, running tasks without one are failed. Per-task errors
    /// are reported, never fatal.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoverReport, HalError> {
        let reconcile = self.pool.reconcile().await?;
        let mut report = RecoverReport {
            reconcile,
            ..Default::default()
        };

        for task in self.tasks.in_flight()? {
            match task.status {
                TaskStatus::Assigned => {
                    // Setup never finished; the wrapper was never
                    // launched, so there is nothing to resume.
                    warn!(task = %task.slug, "failing task interrupted during setup");
                    let _ = self
                        .tasks
                        .fail(&task.id, "Setup interrupted (process died)", None);
                    if let Some(vm_id) = &task.vm_id {
                        if let Err(e) = self.pool.release_vm(vm_id).await {
                            warn!(vm = %vm_id, error = %e, "release failed during recovery");
                        }
                    }
                    report.failed += 1;
                }
                TaskStatus::Running => {
                    let vm = task
                        .vm_id
                        .as_deref()
                        .and_then(|id| self.store.get_vm(id).ok().flatten());
                    match vm {
                        Some(vm) if vm.status == VmStatus::Assigned && vm.ip.is_some() => {
                            info!(task = %task.slug, vm = %vm.short_id(), "resuming poll for running task");
                            let executor = self.executor.clone();
                            let task_id = task.id.clone();
                            tokio::spawn(async move {
                                executor.resume(&task_id, &ExecOptions::default()).await;
                            });
                            report.resumed += 1;
                        }
                        _ => {
                            warn!(task = %task.slug, "failing running task with no usable VM");
                            let _ = self.tasks.fail(
                                &task.id,
                                "VM lost while task was running (process died)",
                                None,
                            );
                            report.failed += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        info!(
            failed = report.failed,
            resumed = report.resumed,
            updated = report.reconcile.updated,
            destroyed = report.reconcile.destroyed,
            "recovery pass complete"
        );
        Ok(report)
    }
}
