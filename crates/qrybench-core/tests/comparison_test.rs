use qrybench_core::compare::{ComparisonEngine, QueryClassification};
use qrybench_core::errors::EngineError;
use qrybench_core::model::{ExecutionStatus, MetricsLevel, RunSpec, RunStatus};
use qrybench_core::storage::store::Store;

fn seeded_store() -> anyhow::Result<Store> {
    let store = Store::memory()?;
    store.init_schema()?;
    Ok(store)
}

fn completed_run(store: &Store, set_id: i64) -> anyhow::Result<i64> {
    let run_id = store.create_run(
        set_id,
        1,
        &RunSpec {
            label: None,
            iteration_count: 1,
            concurrency_limit: 1,
            metrics_level: MetricsLevel::Basic,
        },
    )?;
    assert!(store.transition_run(run_id, &RunStatus::Pending, &RunStatus::Running)?);
    assert!(store.transition_run(run_id, &RunStatus::Running, &RunStatus::Completed)?);
    Ok(run_id)
}

fn record(
    store: &Store,
    run_id: i64,
    query_id: i64,
    iteration: u32,
    status: ExecutionStatus,
    duration_ms: u64,
) -> anyhow::Result<()> {
    let id = store.create_execution(run_id, query_id, iteration)?;
    let error = match status {
        ExecutionStatus::Failed => Some("SQL error"),
        _ => None,
    };
    store.complete_execution(id, &status, duration_ms, Some(1), error)?;
    Ok(())
}

#[test]
fn test_classification_is_deterministic() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let set_id = store.create_query_set("classify")?;
    let degraded = store.add_query(set_id, None, "SELECT 1 FROM t1")?;
    let improved = store.add_query(set_id, None, "SELECT 2 FROM t2")?;
    let unchanged = store.add_query(set_id, None, "SELECT 3 FROM t3")?;

    let baseline = completed_run(&store, set_id)?;
    let comparison = completed_run(&store, set_id)?;

    // Baseline averages are all 100ms.
    for q in [degraded, improved, unchanged] {
        record(&store, baseline, q, 1, ExecutionStatus::Completed, 100)?;
        record(&store, baseline, q, 2, ExecutionStatus::Completed, 100)?;
    }
    // 100 -> 130 (+30%), 100 -> 70 (-30%), 100 -> 110 (+10%).
    for iter in 1..=2 {
        record(&store, comparison, degraded, iter, ExecutionStatus::Completed, 130)?;
        record(&store, comparison, improved, iter, ExecutionStatus::Completed, 70)?;
        record(&store, comparison, unchanged, iter, ExecutionStatus::Completed, 110)?;
    }

    let report = ComparisonEngine::new(store).compare(baseline, comparison, 20.0)?;

    let classification_of = |qid: i64| {
        report
            .rows
            .iter()
            .find(|r| r.query_id == qid)
            .map(|r| r.classification.clone())
            .unwrap()
    };
    assert_eq!(classification_of(degraded), QueryClassification::Degraded);
    assert_eq!(classification_of(improved), QueryClassification::Improved);
    assert_eq!(classification_of(unchanged), QueryClassification::Unchanged);

    assert_eq!(report.rollup.queries_compared, 3);
    assert_eq!(report.rollup.queries_improved, 1);
    assert_eq!(report.rollup.queries_degraded, 1);
    assert_eq!(report.rollup.queries_unchanged, 1);
    assert_eq!(report.rollup.new_failures, 0);

    // Weighted overall: (310 - 300) / 300 * 100.
    let overall = report.rollup.overall_percent_change.unwrap();
    assert!((overall - 10.0 / 3.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_one_sided_failures_become_new_failure_and_resolved() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let set_id = store.create_query_set("failures")?;
    let broke = store.add_query(set_id, None, "SELECT 1 FROM t1")?;
    let fixed = store.add_query(set_id, None, "SELECT 2 FROM t2")?;
    let dead = store.add_query(set_id, None, "SELECT 3 FROM t3")?;

    let baseline = completed_run(&store, set_id)?;
    let comparison = completed_run(&store, set_id)?;

    // `broke`: succeeded in baseline, zero successes in comparison.
    record(&store, baseline, broke, 1, ExecutionStatus::Completed, 50)?;
    record(&store, comparison, broke, 1, ExecutionStatus::Failed, 10)?;
    // `fixed`: the inverse.
    record(&store, baseline, fixed, 1, ExecutionStatus::Failed, 10)?;
    record(&store, comparison, fixed, 1, ExecutionStatus::Completed, 50)?;
    // `dead`: failed on both sides; reported on neither.
    record(&store, baseline, dead, 1, ExecutionStatus::Failed, 10)?;
    record(&store, comparison, dead, 1, ExecutionStatus::Failed, 10)?;

    let report = ComparisonEngine::new(store).compare(baseline, comparison, 20.0)?;

    assert_eq!(report.rows.len(), 2);
    let broke_row = report.rows.iter().find(|r| r.query_id == broke).unwrap();
    assert_eq!(broke_row.classification, QueryClassification::NewFailure);
    assert_eq!(broke_row.percent_change, None);

    let fixed_row = report.rows.iter().find(|r| r.query_id == fixed).unwrap();
    assert_eq!(fixed_row.classification, QueryClassification::Resolved);

    assert!(!report.rows.iter().any(|r| r.query_id == dead));
    assert_eq!(report.rollup.new_failures, 1);
    assert_eq!(report.rollup.resolved, 1);
    assert_eq!(report.rollup.queries_compared, 0);
    Ok(())
}

#[test]
fn test_zero_baseline_average_is_flagged_not_divided() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let set_id = store.create_query_set("zero")?;
    let instant = store.add_query(set_id, None, "SELECT 1 FROM t1")?;

    let baseline = completed_run(&store, set_id)?;
    let comparison = completed_run(&store, set_id)?;

    record(&store, baseline, instant, 1, ExecutionStatus::Completed, 0)?;
    record(&store, comparison, instant, 1, ExecutionStatus::Completed, 25)?;

    let report = ComparisonEngine::new(store).compare(baseline, comparison, 20.0)?;

    let row = &report.rows[0];
    assert_eq!(row.classification, QueryClassification::ZeroBaseline);
    assert_eq!(row.percent_change, None);
    assert_eq!(report.rollup.queries_compared, 0);
    assert_eq!(report.rollup.overall_percent_change, None);
    Ok(())
}

#[test]
fn test_rows_are_ordered_by_absolute_deviation() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let set_id = store.create_query_set("order")?;
    let small = store.add_query(set_id, None, "SELECT 1 FROM t1")?;
    let large = store.add_query(set_id, None, "SELECT 2 FROM t2")?;
    let faster = store.add_query(set_id, None, "SELECT 3 FROM t3")?;

    let baseline = completed_run(&store, set_id)?;
    let comparison = completed_run(&store, set_id)?;

    // +10%, +50%, -30% respectively.
    record(&store, baseline, small, 1, ExecutionStatus::Completed, 100)?;
    record(&store, comparison, small, 1, ExecutionStatus::Completed, 110)?;
    record(&store, baseline, large, 1, ExecutionStatus::Completed, 100)?;
    record(&store, comparison, large, 1, ExecutionStatus::Completed, 150)?;
    record(&store, baseline, faster, 1, ExecutionStatus::Completed, 100)?;
    record(&store, comparison, faster, 1, ExecutionStatus::Completed, 70)?;

    let report = ComparisonEngine::new(store).compare(baseline, comparison, 20.0)?;

    let order: Vec<i64> = report.rows.iter().map(|r| r.query_id).collect();
    assert_eq!(order, vec![large, faster, small]);
    Ok(())
}

#[test]
fn test_preconditions_fail_without_side_effects() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let set_a = store.create_query_set("a")?;
    let set_b = store.create_query_set("b")?;
    store.add_query(set_a, None, "SELECT 1 FROM t")?;
    store.add_query(set_b, None, "SELECT 2 FROM t")?;

    let done_a = completed_run(&store, set_a)?;
    let done_b = completed_run(&store, set_b)?;
    let pending = store.create_run(
        set_a,
        1,
        &RunSpec {
            label: None,
            iteration_count: 1,
            concurrency_limit: 1,
            metrics_level: MetricsLevel::Basic,
        },
    )?;

    let engine = ComparisonEngine::new(store.clone());

    // Missing run.
    assert!(matches!(
        engine.compare(9999, done_a, 20.0),
        Err(EngineError::Validation(_))
    ));
    // Not completed.
    assert!(matches!(
        engine.compare(done_a, pending, 20.0),
        Err(EngineError::Validation(_))
    ));
    // Different query sets.
    assert!(matches!(
        engine.compare(done_a, done_b, 20.0),
        Err(EngineError::Validation(_))
    ));
    // Threshold out of range.
    assert!(matches!(
        engine.compare(done_a, done_a, 150.0),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.compare(done_a, done_a, -1.0),
        Err(EngineError::Validation(_))
    ));

    // No partial comparison was persisted by any failing call.
    assert!(store.get_comparison(1)?.is_none());
    Ok(())
}

#[test]
fn test_reanalysis_replaces_the_result_in_place() -> anyhow::Result<()> {
    let store = seeded_store()?;
    let set_id = store.create_query_set("reanalyze")?;
    let q = store.add_query(set_id, None, "SELECT 1 FROM t")?;

    let baseline = completed_run(&store, set_id)?;
    let comparison = completed_run(&store, set_id)?;
    record(&store, baseline, q, 1, ExecutionStatus::Completed, 100)?;
    record(&store, comparison, q, 1, ExecutionStatus::Completed, 110)?;

    let engine = ComparisonEngine::new(store.clone());
    let report = engine.compare(baseline, comparison, 20.0)?;
    assert_eq!(report.rows[0].classification, QueryClassification::Unchanged);

    // Tightening the threshold flips the classification; same comparison id.
    let updated = engine.reanalyze(report.id, Some(5.0))?;
    assert_eq!(updated.id, report.id);
    assert_eq!(updated.deviation_threshold, 5.0);
    assert_eq!(updated.rows[0].classification, QueryClassification::Degraded);
    assert_eq!(updated.rollup.queries_degraded, 1);
    Ok(())
}
