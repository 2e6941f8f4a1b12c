use crate::compare::{ComparisonReport, ComparisonRollup, ComparisonRow, QueryClassification};
use crate::model::{
    Execution, ExecutionStatus, MetricsLevel, Query, QuerySet, QueryStats, RunSpec, RunStats,
    RunStatus, TestRun,
};
use anyhow::Context;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    // --- query sets ---

    pub fn create_query_set(&self, name: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO query_sets(name, created_at) VALUES (?1, ?2)",
            params![name, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_query_set(&self, set_id: i64) -> anyhow::Result<Option<QuerySet>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM query_sets WHERE id = ?1")?;
        let mut rows = stmt.query(params![set_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(QuerySet {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Appends a query at the next sequence position. Statements that
    /// normalize to an already-present content hash are rejected.
    pub fn add_query(&self, set_id: i64, name: Option<&str>, sql: &str) -> anyhow::Result<i64> {
        let hash = crate::fingerprint::content_hash(sql);
        let conn = self.conn.lock().unwrap();

        let dup: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queries WHERE set_id = ?1 AND content_hash = ?2",
            params![set_id, hash],
            |r| r.get(0),
        )?;
        if dup > 0 {
            anyhow::bail!("duplicate query in set {} (hash {})", set_id, &hash[..12]);
        }

        let next_seq: u32 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM queries WHERE set_id = ?1",
            params![set_id],
            |r| r.get(0),
        )?;

        conn.execute(
            "INSERT INTO queries(set_id, sequence_number, name, sql_text, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![set_id, next_seq, name, sql, hash, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Text edits recompute the content hash.
    pub fn update_query_text(&self, query_id: i64, sql: &str) -> anyhow::Result<()> {
        let hash = crate::fingerprint::content_hash(sql);
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE queries SET sql_text = ?1, content_hash = ?2 WHERE id = ?3",
            params![sql, hash, query_id],
        )?;
        if changed == 0 {
            anyhow::bail!("query {} not found", query_id);
        }
        Ok(())
    }

    /// Queries of a set in sequence order.
    pub fn get_queries(&self, set_id: i64) -> anyhow::Result<Vec<Query>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, set_id, sequence_number, name, sql_text, content_hash
             FROM queries WHERE set_id = ?1 ORDER BY sequence_number",
        )?;
        let rows = stmt.query_map(params![set_id], |row| {
            Ok(Query {
                id: row.get(0)?,
                set_id: row.get(1)?,
                sequence_number: row.get(2)?,
                name: row.get(3)?,
                sql_text: row.get(4)?,
                content_hash: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // --- runs ---

    pub fn create_run(&self, set_id: i64, user_id: i64, spec: &RunSpec) -> anyhow::Result<i64> {
        let label = spec
            .label
            .clone()
            .unwrap_or_else(crate::model::generate_run_label);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs(set_id, user_id, label, iteration_count, concurrency_limit,
                              metrics_level, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                set_id,
                user_id,
                label,
                spec.iteration_count,
                spec.concurrency_limit,
                spec.metrics_level.as_str(),
                RunStatus::Pending.as_str(),
                now_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_run(&self, run_id: i64) -> anyhow::Result<Option<TestRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE id = ?1",
            RUN_COLUMNS
        ))?;
        let mut rows = stmt.query(params![run_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(map_run(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_runs(&self, limit: u32) -> anyhow::Result<Vec<TestRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], |row| map_run(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Guarded status transition: the update only applies while the run is
    /// still in `from`, so terminal states stay final and a run cannot be
    /// started twice. Entering RUNNING stamps started_at; terminal targets
    /// stamp completed_at.
    pub fn transition_run(
        &self,
        run_id: i64,
        from: &RunStatus,
        to: &RunStatus,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = if *to == RunStatus::Running {
            conn.execute(
                "UPDATE runs SET status = ?1, started_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now_rfc3339(), run_id, from.as_str()],
            )?
        } else if to.is_terminal() {
            conn.execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now_rfc3339(), run_id, from.as_str()],
            )?
        } else {
            conn.execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![to.as_str(), run_id, from.as_str()],
            )?
        };
        Ok(changed == 1)
    }

    pub fn update_run_statistics(&self, run_id: i64, stats: &RunStats) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET total_executions = ?1, successful_executions = ?2,
                             failed_executions = ?3, avg_duration_ms = ?4
             WHERE id = ?5",
            params![
                stats.total_executions as i64,
                stats.successful_executions as i64,
                stats.failed_executions as i64,
                stats.avg_duration_ms,
                run_id
            ],
        )?;
        Ok(())
    }

    // --- executions ---

    /// Creates the execution row at dispatch time, in RUNNING state.
    pub fn create_execution(
        &self,
        run_id: i64,
        query_id: i64,
        iteration_number: u32,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO executions(run_id, query_id, iteration_number, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                query_id,
                iteration_number,
                ExecutionStatus::Running.as_str(),
                now_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Completed exactly once; rows are immutable afterwards.
    pub fn complete_execution(
        &self,
        execution_id: i64,
        status: &ExecutionStatus,
        duration_ms: u64,
        rows_affected: Option<i64>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE executions
             SET status = ?1, completed_at = ?2, duration_ms = ?3,
                 rows_affected = ?4, error_message = ?5
             WHERE id = ?6 AND status = ?7",
            params![
                status.as_str(),
                now_rfc3339(),
                duration_ms as i64,
                rows_affected,
                error_message,
                execution_id,
                ExecutionStatus::Running.as_str()
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("execution {} already completed or missing", execution_id);
        }
        Ok(())
    }

    pub fn executions_for_run(&self, run_id: i64) -> anyhow::Result<Vec<Execution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.run_id, e.query_id, e.iteration_number, e.status, e.started_at,
                    e.completed_at, e.duration_ms, e.rows_affected, e.error_message
             FROM executions e
             JOIN queries q ON e.query_id = q.id
             WHERE e.run_id = ?1
             ORDER BY q.sequence_number, e.iteration_number",
        )?;
        let rows = stmt.query_map(params![run_id], |row| map_execution(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn failed_executions(&self, run_id: i64) -> anyhow::Result<Vec<Execution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.run_id, e.query_id, e.iteration_number, e.status, e.started_at,
                    e.completed_at, e.duration_ms, e.rows_affected, e.error_message
             FROM executions e
             JOIN queries q ON e.query_id = q.id
             WHERE e.run_id = ?1 AND e.status = 'FAILED'
             ORDER BY q.sequence_number, e.iteration_number",
        )?;
        let rows = stmt.query_map(params![run_id], |row| map_execution(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Timing aggregates for one query within one run. Averages, min and max
    /// cover COMPLETED executions only; failures are counted separately.
    pub fn query_statistics(&self, run_id: i64, query_id: i64) -> anyhow::Result<QueryStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT q.sequence_number,
                    SUM(CASE WHEN e.status = 'COMPLETED' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN e.status = 'FAILED' THEN 1 ELSE 0 END),
                    AVG(CASE WHEN e.status = 'COMPLETED' THEN e.duration_ms END),
                    MIN(CASE WHEN e.status = 'COMPLETED' THEN e.duration_ms END),
                    MAX(CASE WHEN e.status = 'COMPLETED' THEN e.duration_ms END)
             FROM queries q
             LEFT JOIN executions e ON e.query_id = q.id AND e.run_id = ?1
             WHERE q.id = ?2
             GROUP BY q.id",
        )?;
        let mut rows = stmt.query(params![run_id, query_id])?;
        let row = rows
            .next()?
            .ok_or_else(|| anyhow::anyhow!("query {} not found", query_id))?;
        Ok(QueryStats {
            query_id,
            sequence_number: row.get(0)?,
            successful_executions: row.get::<_, i64>(1)? as u64,
            failed_executions: row.get::<_, i64>(2)? as u64,
            avg_duration_ms: row.get(3)?,
            min_duration_ms: row.get(4)?,
            max_duration_ms: row.get(5)?,
        })
    }

    /// Aggregates over every execution row of a run. The run's persisted
    /// rollup counters are always recomputed from this, never incremented
    /// independently.
    pub fn run_statistics(&self, run_id: i64) -> anyhow::Result<RunStats> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END),
                    AVG(duration_ms),
                    COALESCE(SUM(duration_ms), 0)
             FROM executions WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok(RunStats {
                    total_executions: row.get::<_, i64>(0)? as u64,
                    successful_executions: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                    failed_executions: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    avg_duration_ms: row.get(3)?,
                    total_duration_ms: row.get::<_, i64>(4)? as u64,
                })
            },
        )
        .context("failed to aggregate run statistics")
    }

    // --- comparisons ---

    pub fn insert_comparison(
        &self,
        baseline_run_id: i64,
        comparison_run_id: i64,
        deviation_threshold: f64,
        rollup: &ComparisonRollup,
        rows: &[ComparisonRow],
    ) -> anyhow::Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO comparisons(baseline_run_id, comparison_run_id, deviation_threshold,
                                     created_at, queries_compared, queries_improved,
                                     queries_degraded, queries_unchanged, new_failures,
                                     resolved, overall_percent_change)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                baseline_run_id,
                comparison_run_id,
                deviation_threshold,
                now_rfc3339(),
                rollup.queries_compared as i64,
                rollup.queries_improved as i64,
                rollup.queries_degraded as i64,
                rollup.queries_unchanged as i64,
                rollup.new_failures as i64,
                rollup.resolved as i64,
                rollup.overall_percent_change
            ],
        )?;
        let comparison_id = tx.last_insert_rowid();
        insert_details(&tx, comparison_id, rows)?;
        tx.commit()?;
        Ok(comparison_id)
    }

    /// Explicit re-analysis replaces the detail rows and rollups in place.
    pub fn replace_comparison_analysis(
        &self,
        comparison_id: i64,
        deviation_threshold: f64,
        rollup: &ComparisonRollup,
        rows: &[ComparisonRow],
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE comparisons
             SET deviation_threshold = ?1, queries_compared = ?2, queries_improved = ?3,
                 queries_degraded = ?4, queries_unchanged = ?5, new_failures = ?6,
                 resolved = ?7, overall_percent_change = ?8
             WHERE id = ?9",
            params![
                deviation_threshold,
                rollup.queries_compared as i64,
                rollup.queries_improved as i64,
                rollup.queries_degraded as i64,
                rollup.queries_unchanged as i64,
                rollup.new_failures as i64,
                rollup.resolved as i64,
                rollup.overall_percent_change,
                comparison_id
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("comparison {} not found", comparison_id);
        }
        tx.execute(
            "DELETE FROM comparison_details WHERE comparison_id = ?1",
            params![comparison_id],
        )?;
        insert_details(&tx, comparison_id, rows)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_comparison(&self, comparison_id: i64) -> anyhow::Result<Option<ComparisonReport>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT baseline_run_id, comparison_run_id, deviation_threshold, created_at,
                    queries_compared, queries_improved, queries_degraded, queries_unchanged,
                    new_failures, resolved, overall_percent_change
             FROM comparisons WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![comparison_id])?;
        let header = match rows.next()? {
            Some(row) => (
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                ComparisonRollup {
                    queries_compared: row.get::<_, i64>(4)? as u64,
                    queries_improved: row.get::<_, i64>(5)? as u64,
                    queries_degraded: row.get::<_, i64>(6)? as u64,
                    queries_unchanged: row.get::<_, i64>(7)? as u64,
                    new_failures: row.get::<_, i64>(8)? as u64,
                    resolved: row.get::<_, i64>(9)? as u64,
                    overall_percent_change: row.get(10)?,
                },
            ),
            None => return Ok(None),
        };

        let mut stmt = conn.prepare(
            "SELECT d.query_id, q.sequence_number,
                    d.baseline_avg_ms, d.baseline_min_ms, d.baseline_max_ms,
                    d.comparison_avg_ms, d.comparison_min_ms, d.comparison_max_ms,
                    d.percent_change, d.classification
             FROM comparison_details d
             JOIN queries q ON d.query_id = q.id
             WHERE d.comparison_id = ?1
             ORDER BY d.id",
        )?;
        let detail_rows = stmt.query_map(params![comparison_id], |row| {
            Ok(ComparisonRow {
                query_id: row.get(0)?,
                sequence_number: row.get(1)?,
                baseline_avg_ms: row.get(2)?,
                baseline_min_ms: row.get(3)?,
                baseline_max_ms: row.get(4)?,
                comparison_avg_ms: row.get(5)?,
                comparison_min_ms: row.get(6)?,
                comparison_max_ms: row.get(7)?,
                percent_change: row.get(8)?,
                classification: QueryClassification::parse(&row.get::<_, String>(9)?),
            })
        })?;
        let mut details = Vec::new();
        for r in detail_rows {
            details.push(r?);
        }

        let (baseline_run_id, comparison_run_id, deviation_threshold, created_at, rollup) = header;
        Ok(Some(ComparisonReport {
            id: comparison_id,
            baseline_run_id,
            comparison_run_id,
            deviation_threshold,
            created_at,
            rollup,
            rows: details,
        }))
    }
}

const RUN_COLUMNS: &str = "id, set_id, user_id, label, iteration_count, concurrency_limit, \
                           metrics_level, status, created_at, started_at, completed_at, \
                           total_executions, successful_executions, failed_executions, \
                           avg_duration_ms";

fn map_run(row: &Row) -> rusqlite::Result<TestRun> {
    Ok(TestRun {
        id: row.get(0)?,
        set_id: row.get(1)?,
        user_id: row.get(2)?,
        label: row.get(3)?,
        iteration_count: row.get(4)?,
        concurrency_limit: row.get(5)?,
        metrics_level: MetricsLevel::parse(&row.get::<_, String>(6)?)
            .unwrap_or(MetricsLevel::Basic),
        status: RunStatus::parse(&row.get::<_, String>(7)?),
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        total_executions: row.get::<_, i64>(11)? as u64,
        successful_executions: row.get::<_, i64>(12)? as u64,
        failed_executions: row.get::<_, i64>(13)? as u64,
        avg_duration_ms: row.get(14)?,
    })
}

fn map_execution(row: &Row) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get(0)?,
        run_id: row.get(1)?,
        query_id: row.get(2)?,
        iteration_number: row.get(3)?,
        status: ExecutionStatus::parse(&row.get::<_, String>(4)?),
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
        duration_ms: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        rows_affected: row.get(8)?,
        error_message: row.get(9)?,
    })
}

fn insert_details(
    tx: &rusqlite::Transaction,
    comparison_id: i64,
    rows: &[ComparisonRow],
) -> anyhow::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO comparison_details(comparison_id, query_id, baseline_avg_ms,
                                        baseline_min_ms, baseline_max_ms, comparison_avg_ms,
                                        comparison_min_ms, comparison_max_ms, percent_change,
                                        classification)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for r in rows {
        stmt.execute(params![
            comparison_id,
            r.query_id,
            r.baseline_avg_ms,
            r.baseline_min_ms,
            r.baseline_max_ms,
            r.comparison_avg_ms,
            r.comparison_min_ms,
            r.comparison_max_ms,
            r.percent_change,
            r.classification.as_str()
        ])?;
    }
    Ok(())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
