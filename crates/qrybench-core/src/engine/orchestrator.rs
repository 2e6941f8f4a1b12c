use crate::compare::{ComparisonEngine, ComparisonReport};
use crate::config::EngineConfig;
use crate::engine::executor::QueryExecutor;
use crate::errors::EngineError;
use crate::model::{ExecutionStatus, Query, RunSpec, RunStatus, TestRun};
use crate::progress::{ProgressHub, RunEvent};
use crate::storage::store::Store;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Drives test-run campaigns: accepts runs under the per-user ceiling,
/// fans executions out under a bounded-concurrency gate, records every
/// outcome, and finalizes rollups once the plan has drained.
#[derive(Clone)]
pub struct Engine {
    pub store: Store,
    pub executor: QueryExecutor,
    pub hub: ProgressHub,
    pub config: EngineConfig,
    active: ActiveRuns,
}

impl Engine {
    pub fn new(
        store: Store,
        executor: QueryExecutor,
        hub: ProgressHub,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            hub,
            config,
            active: ActiveRuns::default(),
        }
    }

    /// Creates a run in PENDING state after validating its parameters.
    pub fn create_run(
        &self,
        set_id: i64,
        user_id: i64,
        spec: RunSpec,
    ) -> Result<i64, EngineError> {
        if spec.iteration_count < 1 || spec.iteration_count > self.config.max_iterations {
            return Err(EngineError::validation(format!(
                "iteration count must be between 1 and {}",
                self.config.max_iterations
            )));
        }
        if spec.concurrency_limit < 1 || spec.concurrency_limit > self.config.max_concurrency {
            return Err(EngineError::validation(format!(
                "concurrency limit must be between 1 and {}",
                self.config.max_concurrency
            )));
        }
        if self.store.get_query_set(set_id)?.is_none() {
            return Err(EngineError::validation(format!(
                "query set {} not found",
                set_id
            )));
        }
        Ok(self.store.create_run(set_id, user_id, &spec)?)
    }

    /// Accepts a pending run and kicks off execution in the background.
    /// Returns as soon as the run is accepted; outcomes are observed via the
    /// progress hub or by polling run status. The returned handle joins the
    /// end-of-run barrier.
    pub async fn start_run(&self, run_id: i64) -> Result<JoinHandle<()>, EngineError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| EngineError::validation(format!("run {} not found", run_id)))?;
        if run.status != RunStatus::Pending {
            return Err(EngineError::validation(format!(
                "run {} is not pending (status: {})",
                run_id,
                run.status.as_str()
            )));
        }

        let queries = self.store.get_queries(run.set_id)?;
        if queries.is_empty() {
            return Err(EngineError::validation(format!(
                "query set {} has no queries",
                run.set_id
            )));
        }

        // Capacity is claimed before any state change and released on every
        // terminal path.
        let cancel_flag = self.active.try_acquire(
            run.user_id,
            run_id,
            self.config.max_concurrent_runs_per_user,
        )?;

        if !self
            .store
            .transition_run(run_id, &RunStatus::Pending, &RunStatus::Running)?
        {
            self.active.release(run_id);
            return Err(EngineError::validation(format!(
                "run {} was already started",
                run_id
            )));
        }
        self.hub.publish(
            run_id,
            RunEvent::StatusChanged {
                status: RunStatus::Running,
            },
        );

        tracing::info!(
            run_id,
            queries = queries.len(),
            iterations = run.iteration_count,
            concurrency = run.concurrency_limit,
            "starting test run"
        );

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.drive_run(&run, &queries, &cancel_flag).await {
                tracing::error!(run_id, error = %e, "test run failed");
                let failed = engine
                    .store
                    .transition_run(run_id, &RunStatus::Running, &RunStatus::Failed)
                    .unwrap_or(false);
                if failed {
                    engine.hub.publish(
                        run_id,
                        RunEvent::StatusChanged {
                            status: RunStatus::Failed,
                        },
                    );
                }
            }
            engine.active.release(run_id);
        });
        Ok(handle)
    }

    /// Best-effort cancellation: the run goes CANCELLED now, in-flight
    /// executions finish and are recorded, nothing further is dispatched.
    pub fn cancel_run(&self, run_id: i64) -> Result<(), EngineError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| EngineError::validation(format!("run {} not found", run_id)))?;

        // Halt dispatch before flipping the status so nothing new starts
        // once observers see CANCELLED.
        if let Some(flag) = self.active.cancel_flag(run_id) {
            flag.store(true, Ordering::SeqCst);
        }
        if !self
            .store
            .transition_run(run_id, &RunStatus::Running, &RunStatus::Cancelled)?
        {
            return Err(EngineError::validation(format!(
                "run {} is not currently running (status: {})",
                run_id,
                run.status.as_str()
            )));
        }
        self.hub.publish(
            run_id,
            RunEvent::StatusChanged {
                status: RunStatus::Cancelled,
            },
        );
        tracing::info!(run_id, "test run cancelled");
        Ok(())
    }

    pub fn compare(
        &self,
        baseline_run_id: i64,
        comparison_run_id: i64,
        deviation_threshold: Option<f64>,
    ) -> Result<ComparisonReport, EngineError> {
        let threshold =
            deviation_threshold.unwrap_or(self.config.default_deviation_threshold);
        ComparisonEngine::new(self.store.clone()).compare(
            baseline_run_id,
            comparison_run_id,
            threshold,
        )
    }

    pub fn reanalyze_comparison(
        &self,
        comparison_id: i64,
        deviation_threshold: Option<f64>,
    ) -> Result<ComparisonReport, EngineError> {
        ComparisonEngine::new(self.store.clone()).reanalyze(comparison_id, deviation_threshold)
    }

    /// Currently running runs for a user, as accounted by the capacity gate.
    pub fn running_runs_for_user(&self, user_id: i64) -> usize {
        self.active.running_for_user(user_id)
    }

    /// The full plan is `queries x iterations`, dispatched query-major under
    /// a semaphore sized to the run's concurrency limit. Completion order is
    /// unordered; rollups are only finalized at the join barrier below.
    async fn drive_run(
        &self,
        run: &TestRun,
        queries: &[Query],
        cancel_flag: &Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let run_id = run.id;
        let total = queries.len() as u64 * run.iteration_count as u64;
        let sem = Arc::new(Semaphore::new(run.concurrency_limit as usize));
        let completed = Arc::new(AtomicU64::new(0));
        let mut handles: Vec<(i64, JoinHandle<()>)> = Vec::new();

        'dispatch: for query in queries {
            for iteration in 1..=run.iteration_count {
                if cancel_flag.load(Ordering::SeqCst) {
                    break 'dispatch;
                }
                let permit = sem.clone().acquire_owned().await?;
                // Re-check after waiting for a slot; cancellation may have
                // landed while we were parked.
                if cancel_flag.load(Ordering::SeqCst) {
                    break 'dispatch;
                }

                let execution_id = self.store.create_execution(run_id, query.id, iteration)?;
                self.hub.publish(
                    run_id,
                    RunEvent::ExecutionDispatched {
                        execution_id,
                        query_id: query.id,
                        iteration,
                    },
                );

                let store = self.store.clone();
                let hub = self.hub.clone();
                let executor = self.executor.clone();
                let sql = query.sql_text.clone();
                let query_id = query.id;
                let completed = completed.clone();

                let h = tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = executor.execute_once(&sql).await;
                    if let Err(e) = store.complete_execution(
                        execution_id,
                        &outcome.status,
                        outcome.duration_ms,
                        outcome.rows_affected,
                        outcome.error.as_deref(),
                    ) {
                        tracing::warn!(execution_id, error = %e, "failed to record execution outcome");
                    }
                    if outcome.status == ExecutionStatus::Failed {
                        tracing::debug!(
                            execution_id,
                            query_id,
                            iteration,
                            error = outcome.error.as_deref().unwrap_or(""),
                            "execution failed"
                        );
                    }
                    hub.publish(
                        run_id,
                        RunEvent::ExecutionCompleted {
                            execution_id,
                            query_id,
                            iteration,
                            status: outcome.status.clone(),
                            duration_ms: outcome.duration_ms,
                        },
                    );
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    hub.publish(
                        run_id,
                        RunEvent::Progress {
                            completed: done,
                            total,
                        },
                    );
                });
                handles.push((execution_id, h));
            }
        }

        // Join barrier: every dispatched unit reaches a terminal state before
        // rollups are recomputed. A panicked unit is converted to a recorded
        // failure rather than taking the orchestrator down.
        for (execution_id, h) in handles {
            if let Err(e) = h.await {
                let _ = self.store.complete_execution(
                    execution_id,
                    &ExecutionStatus::Failed,
                    0,
                    None,
                    Some(&format!("task error: {}", e)),
                );
            }
        }

        let stats = self.store.run_statistics(run_id)?;
        self.store.update_run_statistics(run_id, &stats)?;

        // A cancelled run already moved to its terminal state; the guarded
        // transition leaves it untouched.
        if self
            .store
            .transition_run(run_id, &RunStatus::Running, &RunStatus::Completed)?
        {
            self.hub.publish(
                run_id,
                RunEvent::StatusChanged {
                    status: RunStatus::Completed,
                },
            );
        }

        tracing::info!(
            run_id,
            total = stats.total_executions,
            succeeded = stats.successful_executions,
            failed = stats.failed_executions,
            cancelled = cancel_flag.load(Ordering::SeqCst),
            "test run drained"
        );
        Ok(())
    }
}

/// The one piece of mutable state shared across runs: which runs are live
/// per user, plus each run's cancellation flag. Updated atomically under a
/// single lock so the ceiling can never be overshot by a race.
#[derive(Clone, Default)]
struct ActiveRuns {
    inner: Arc<Mutex<HashMap<i64, RunSlot>>>,
}

struct RunSlot {
    user_id: i64,
    cancelled: Arc<AtomicBool>,
}

impl ActiveRuns {
    fn try_acquire(
        &self,
        user_id: i64,
        run_id: i64,
        limit: usize,
    ) -> Result<Arc<AtomicBool>, EngineError> {
        let mut map = self.inner.lock().unwrap();
        let current = map.values().filter(|s| s.user_id == user_id).count();
        if current >= limit {
            return Err(EngineError::CapacityExceeded { user_id, limit });
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        map.insert(
            run_id,
            RunSlot {
                user_id,
                cancelled: cancelled.clone(),
            },
        );
        Ok(cancelled)
    }

    fn cancel_flag(&self, run_id: i64) -> Option<Arc<AtomicBool>> {
        self.inner
            .lock()
            .unwrap()
            .get(&run_id)
            .map(|s| s.cancelled.clone())
    }

    fn release(&self, run_id: i64) {
        self.inner.lock().unwrap().remove(&run_id);
    }

    fn running_for_user(&self, user_id: i64) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .count()
    }
}
