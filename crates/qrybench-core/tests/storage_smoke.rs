use qrybench_core::model::{ExecutionStatus, MetricsLevel, RunSpec, RunStatus};
use qrybench_core::storage::store::Store;
use tempfile::tempdir;

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("qrybench.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;

    let set_id = store.create_query_set("lifecycle")?;
    let q1 = store.add_query(set_id, Some("probe"), "SELECT 1 FROM sysibm.sysdummy1")?;
    let q2 = store.add_query(set_id, None, "SELECT COUNT(*) FROM orders")?;

    let queries = store.get_queries(set_id)?;
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].id, q1);
    assert_eq!(queries[0].sequence_number, 1);
    assert_eq!(queries[1].sequence_number, 2);

    let run_id = store.create_run(
        set_id,
        1,
        &RunSpec {
            label: Some("smoke".into()),
            iteration_count: 2,
            concurrency_limit: 2,
            metrics_level: MetricsLevel::Comprehensive,
        },
    )?;

    // PENDING -> RUNNING transition succeeds exactly once.
    assert!(store.transition_run(run_id, &RunStatus::Pending, &RunStatus::Running)?);
    assert!(!store.transition_run(run_id, &RunStatus::Pending, &RunStatus::Running)?);

    let e1 = store.create_execution(run_id, q1, 1)?;
    let e2 = store.create_execution(run_id, q1, 2)?;
    let e3 = store.create_execution(run_id, q2, 1)?;
    store.complete_execution(e1, &ExecutionStatus::Completed, 100, Some(5), None)?;
    store.complete_execution(e2, &ExecutionStatus::Completed, 200, Some(5), None)?;
    store.complete_execution(e3, &ExecutionStatus::Failed, 30, None, Some("table not found"))?;

    // A row completes exactly once.
    assert!(store
        .complete_execution(e1, &ExecutionStatus::Failed, 0, None, None)
        .is_err());

    let stats = store.run_statistics(run_id)?;
    store.update_run_statistics(run_id, &stats)?;
    assert!(store.transition_run(run_id, &RunStatus::Running, &RunStatus::Completed)?);
    // A stale transition no longer matches once the run is terminal.
    assert!(!store.transition_run(run_id, &RunStatus::Running, &RunStatus::Cancelled)?);

    // Re-open from disk: persisted rollups equal the fresh aggregation.
    drop(store);
    let store = Store::open(&db_path)?;
    let run = store.get_run(run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.metrics_level, MetricsLevel::Comprehensive);
    assert!(run.completed_at.is_some());
    assert_eq!(run.total_executions, 3);
    assert_eq!(run.successful_executions, 2);
    assert_eq!(run.failed_executions, 1);

    let reread = store.run_statistics(run_id)?;
    assert_eq!(reread.total_executions, run.total_executions);
    assert_eq!(reread.successful_executions, run.successful_executions);
    assert_eq!(reread.failed_executions, run.failed_executions);
    assert_eq!(reread.avg_duration_ms, run.avg_duration_ms);

    // Per-query aggregates cover COMPLETED rows only.
    let q1_stats = store.query_statistics(run_id, q1)?;
    assert_eq!(q1_stats.successful_executions, 2);
    assert_eq!(q1_stats.avg_duration_ms, Some(150.0));
    assert_eq!(q1_stats.min_duration_ms, Some(100.0));
    assert_eq!(q1_stats.max_duration_ms, Some(200.0));

    let q2_stats = store.query_statistics(run_id, q2)?;
    assert_eq!(q2_stats.successful_executions, 0);
    assert_eq!(q2_stats.failed_executions, 1);
    assert_eq!(q2_stats.avg_duration_ms, None);

    let failed = store.failed_executions(run_id)?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_message.as_deref(), Some("table not found"));
    Ok(())
}

#[test]
fn test_duplicate_queries_are_rejected_by_content_hash() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let set_id = store.create_query_set("dedupe")?;

    store.add_query(set_id, None, "SELECT id FROM users")?;
    // Formatting-only differences normalize to the same hash.
    assert!(store
        .add_query(set_id, None, "select  id\nFROM users  -- same thing")
        .is_err());

    // The same statement is fine in a different set.
    let other = store.create_query_set("other")?;
    assert!(store.add_query(other, None, "SELECT id FROM users").is_ok());
    Ok(())
}

#[test]
fn test_editing_query_text_updates_the_hash() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let set_id = store.create_query_set("edit")?;
    let q = store.add_query(set_id, None, "SELECT a FROM t")?;

    let before = store.get_queries(set_id)?[0].content_hash.clone();
    store.update_query_text(q, "SELECT a, b FROM t")?;
    let after = &store.get_queries(set_id)?[0];

    assert_eq!(after.sql_text, "SELECT a, b FROM t");
    assert_ne!(after.content_hash, before);

    assert!(store.update_query_text(9999, "SELECT 1").is_err());
    Ok(())
}
