use qrybench_core::config::EngineConfig;
use qrybench_core::engine::executor::QueryExecutor;
use qrybench_core::engine::orchestrator::Engine;
use qrybench_core::errors::EngineError;
use qrybench_core::model::{ExecutionStatus, MetricsLevel, RunSpec, RunStatus};
use qrybench_core::progress::ProgressHub;
use qrybench_core::providers::backend::fake::FakeBackend;
use qrybench_core::providers::backend::ConnectionParams;
use qrybench_core::storage::store::Store;
use std::sync::Arc;
use std::time::Duration;

fn test_engine(backend: Arc<FakeBackend>, config: EngineConfig) -> anyhow::Result<Engine> {
    let store = Store::memory()?;
    store.init_schema()?;
    let executor = QueryExecutor::new(
        backend,
        ConnectionParams::default(),
        Duration::from_secs(5),
    );
    Ok(Engine::new(store, executor, ProgressHub::new(), config))
}

fn spec(iterations: u32, concurrency: u32) -> RunSpec {
    RunSpec {
        label: None,
        iteration_count: iterations,
        concurrency_limit: concurrency,
        metrics_level: MetricsLevel::Standard,
    }
}

#[tokio::test]
async fn test_run_completes_and_rollups_match_executions() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new().fail_when_contains("boom"));
    let engine = test_engine(backend, EngineConfig::default())?;

    let set_id = engine.store.create_query_set("smoke")?;
    engine.store.add_query(set_id, None, "SELECT 1 FROM t1")?;
    engine.store.add_query(set_id, None, "SELECT boom FROM t2")?;
    engine.store.add_query(set_id, None, "SELECT 3 FROM t3")?;

    let run_id = engine.create_run(set_id, 1, spec(2, 2))?;
    let handle = engine.start_run(run_id).await?;
    handle.await?;

    let run = engine.store.get_run(run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_executions, 6);
    assert_eq!(run.successful_executions, 4);
    assert_eq!(run.failed_executions, 2);

    // Persisted rollups always equal a fresh aggregation over the rows.
    let stats = engine.store.run_statistics(run_id)?;
    assert_eq!(stats.total_executions, run.total_executions);
    assert_eq!(stats.successful_executions, run.successful_executions);
    assert_eq!(stats.failed_executions, run.failed_executions);
    assert_eq!(stats.avg_duration_ms, run.avg_duration_ms);

    // Every execution reached a terminal state.
    let executions = engine.store.executions_for_run(run_id)?;
    assert_eq!(executions.len(), 6);
    assert!(executions
        .iter()
        .all(|e| e.status != ExecutionStatus::Running && e.completed_at.is_some()));
    Ok(())
}

#[tokio::test]
async fn test_concurrency_gate_is_never_exceeded() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new().with_latency(Duration::from_millis(20)));
    let engine = test_engine(backend.clone(), EngineConfig::default())?;

    let set_id = engine.store.create_query_set("gate")?;
    for i in 0..4 {
        engine
            .store
            .add_query(set_id, None, &format!("SELECT {} FROM t", i))?;
    }

    let run_id = engine.create_run(set_id, 1, spec(4, 3))?;
    let handle = engine.start_run(run_id).await?;
    handle.await?;

    assert_eq!(backend.calls(), 16);
    assert!(
        backend.max_in_flight() <= 3,
        "in-flight high-water mark {} exceeded the limit",
        backend.max_in_flight()
    );
    Ok(())
}

#[tokio::test]
async fn test_per_user_ceiling_rejects_excess_runs() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new().with_latency(Duration::from_millis(100)));
    let config = EngineConfig {
        max_concurrent_runs_per_user: 1,
        ..EngineConfig::default()
    };
    let engine = test_engine(backend, config)?;

    let set_id = engine.store.create_query_set("ceiling")?;
    engine.store.add_query(set_id, None, "SELECT 1 FROM t")?;

    let first = engine.create_run(set_id, 7, spec(2, 1))?;
    let second = engine.create_run(set_id, 7, spec(2, 1))?;

    let handle = engine.start_run(first).await?;

    let err = engine.start_run(second).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::CapacityExceeded { user_id: 7, limit: 1 }
    ));
    // Rejection performed no work: the run is still pending with no rows.
    let run = engine.store.get_run(second)?.unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert!(engine.store.executions_for_run(second)?.is_empty());

    // A different user is unaffected by user 7's ceiling.
    assert_eq!(engine.running_runs_for_user(7), 1);
    assert_eq!(engine.running_runs_for_user(8), 0);

    handle.await?;

    // Capacity is released on terminal transition; the second run now starts.
    let handle = engine.start_run(second).await?;
    handle.await?;
    assert_eq!(
        engine.store.get_run(second)?.unwrap().status,
        RunStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn test_cancel_records_only_started_executions() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new().with_latency(Duration::from_millis(50)));
    let engine = test_engine(backend, EngineConfig::default())?;

    let set_id = engine.store.create_query_set("cancel")?;
    for i in 0..10 {
        engine
            .store
            .add_query(set_id, None, &format!("SELECT {} FROM t", i))?;
    }

    let run_id = engine.create_run(set_id, 1, spec(1, 1))?;
    let handle = engine.start_run(run_id).await?;

    tokio::time::sleep(Duration::from_millis(120)).await;
    engine.cancel_run(run_id)?;
    handle.await?;

    let run = engine.store.get_run(run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);

    // In-flight work finished and was recorded; nothing further started.
    let executions = engine.store.executions_for_run(run_id)?;
    assert!(!executions.is_empty());
    assert!(executions.len() < 10, "dispatch kept going after cancel");
    assert!(executions
        .iter()
        .all(|e| e.status != ExecutionStatus::Running));
    assert_eq!(run.total_executions, executions.len() as u64);
    Ok(())
}

#[tokio::test]
async fn test_run_cannot_be_started_twice() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new().with_latency(Duration::from_millis(50)));
    let engine = test_engine(backend, EngineConfig::default())?;

    let set_id = engine.store.create_query_set("double")?;
    engine.store.add_query(set_id, None, "SELECT 1 FROM t")?;

    let run_id = engine.create_run(set_id, 1, spec(1, 1))?;
    let handle = engine.start_run(run_id).await?;

    let err = engine.start_run(run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    handle.await?;

    // Terminal states are final: a completed run cannot be restarted either.
    let err = engine.start_run(run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_all_failures_still_complete_the_run() -> anyhow::Result<()> {
    // Backend rejects everything, as if the remote service were down.
    let backend = Arc::new(FakeBackend::new().fail_when_contains("SELECT"));
    let engine = test_engine(backend, EngineConfig::default())?;

    let set_id = engine.store.create_query_set("down")?;
    engine.store.add_query(set_id, None, "SELECT 1 FROM t1")?;
    engine.store.add_query(set_id, None, "SELECT 2 FROM t2")?;

    let run_id = engine.create_run(set_id, 3, spec(3, 2))?;
    let handle = engine.start_run(run_id).await?;
    handle.await?;

    let run = engine.store.get_run(run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_executions, 6);
    assert_eq!(run.successful_executions, 0);
    assert_eq!(run.failed_executions, 6);

    let failed = engine.store.failed_executions(run_id)?;
    assert_eq!(failed.len(), 6);
    assert!(failed.iter().all(|e| e.error_message.is_some()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_run_parameters_are_rejected() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    let engine = test_engine(backend, EngineConfig::default())?;

    let set_id = engine.store.create_query_set("params")?;
    engine.store.add_query(set_id, None, "SELECT 1 FROM t")?;

    assert!(matches!(
        engine.create_run(set_id, 1, spec(0, 1)),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_run(set_id, 1, spec(1, 0)),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_run(9999, 1, spec(1, 1)),
        Err(EngineError::Validation(_))
    ));
    Ok(())
}
