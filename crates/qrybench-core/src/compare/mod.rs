use crate::errors::EngineError;
use crate::model::{QueryStats, RunStatus};
use crate::storage::store::Store;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Per-query classification against the deviation threshold. Negative
/// percent change means the comparison run was faster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryClassification {
    Improved,
    Degraded,
    Unchanged,
    /// Succeeded in the baseline, zero successful executions in the
    /// comparison run.
    NewFailure,
    /// The inverse: failing in the baseline, succeeding now.
    Resolved,
    /// Baseline average was exactly zero; excluded from percent-based
    /// classification instead of producing an infinite value.
    ZeroBaseline,
}

impl QueryClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClassification::Improved => "IMPROVED",
            QueryClassification::Degraded => "DEGRADED",
            QueryClassification::Unchanged => "UNCHANGED",
            QueryClassification::NewFailure => "NEW_FAILURE",
            QueryClassification::Resolved => "RESOLVED",
            QueryClassification::ZeroBaseline => "ZERO_BASELINE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "IMPROVED" => QueryClassification::Improved,
            "DEGRADED" => QueryClassification::Degraded,
            "NEW_FAILURE" => QueryClassification::NewFailure,
            "RESOLVED" => QueryClassification::Resolved,
            "ZERO_BASELINE" => QueryClassification::ZeroBaseline,
            _ => QueryClassification::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub query_id: i64,
    pub sequence_number: u32,
    pub baseline_avg_ms: Option<f64>,
    pub baseline_min_ms: Option<f64>,
    pub baseline_max_ms: Option<f64>,
    pub comparison_avg_ms: Option<f64>,
    pub comparison_min_ms: Option<f64>,
    pub comparison_max_ms: Option<f64>,
    pub percent_change: Option<f64>,
    pub classification: QueryClassification,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonRollup {
    pub queries_compared: u64,
    pub queries_improved: u64,
    pub queries_degraded: u64,
    pub queries_unchanged: u64,
    pub new_failures: u64,
    pub resolved: u64,
    /// Overall change across all validly compared queries, weighted by
    /// baseline average duration.
    pub overall_percent_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub id: i64,
    pub baseline_run_id: i64,
    pub comparison_run_id: i64,
    pub deviation_threshold: f64,
    pub created_at: String,
    pub rollup: ComparisonRollup,
    /// Ordered by descending absolute percent change, ties broken by query
    /// sequence number; rows without a percent change sort last.
    pub rows: Vec<ComparisonRow>,
}

pub fn classify(percent_change: f64, threshold: f64) -> QueryClassification {
    if percent_change <= -threshold {
        QueryClassification::Improved
    } else if percent_change >= threshold {
        QueryClassification::Degraded
    } else {
        QueryClassification::Unchanged
    }
}

/// Compares two completed runs of the same query set. Consumes only
/// persisted statistics; it never touches a live orchestration.
pub struct ComparisonEngine {
    pub store: Store,
}

impl ComparisonEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// All preconditions are checked before anything is written, so a
    /// failing call leaves no partial result behind.
    pub fn compare(
        &self,
        baseline_run_id: i64,
        comparison_run_id: i64,
        deviation_threshold: f64,
    ) -> Result<ComparisonReport, EngineError> {
        let (set_id, threshold) =
            self.check_preconditions(baseline_run_id, comparison_run_id, deviation_threshold)?;

        let (rollup, rows) = self.analyze(set_id, baseline_run_id, comparison_run_id, threshold)?;

        let id = self.store.insert_comparison(
            baseline_run_id,
            comparison_run_id,
            threshold,
            &rollup,
            &rows,
        )?;
        let report = self
            .store
            .get_comparison(id)?
            .ok_or_else(|| EngineError::Storage(anyhow::anyhow!("comparison {} vanished", id)))?;
        Ok(report)
    }

    /// Recomputes details and rollups for an existing comparison, in place,
    /// optionally under a new threshold.
    pub fn reanalyze(
        &self,
        comparison_id: i64,
        deviation_threshold: Option<f64>,
    ) -> Result<ComparisonReport, EngineError> {
        let existing = self.store.get_comparison(comparison_id)?.ok_or_else(|| {
            EngineError::validation(format!("comparison {} not found", comparison_id))
        })?;
        let threshold = deviation_threshold.unwrap_or(existing.deviation_threshold);
        let (set_id, threshold) = self.check_preconditions(
            existing.baseline_run_id,
            existing.comparison_run_id,
            threshold,
        )?;

        let (rollup, rows) = self.analyze(
            set_id,
            existing.baseline_run_id,
            existing.comparison_run_id,
            threshold,
        )?;
        self.store
            .replace_comparison_analysis(comparison_id, threshold, &rollup, &rows)?;
        let report = self.store.get_comparison(comparison_id)?.ok_or_else(|| {
            EngineError::Storage(anyhow::anyhow!("comparison {} vanished", comparison_id))
        })?;
        Ok(report)
    }

    fn check_preconditions(
        &self,
        baseline_run_id: i64,
        comparison_run_id: i64,
        threshold: f64,
    ) -> Result<(i64, f64), EngineError> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(EngineError::validation(format!(
                "deviation threshold must be between 0 and 100 (got {})",
                threshold
            )));
        }
        let baseline = self.store.get_run(baseline_run_id)?.ok_or_else(|| {
            EngineError::validation(format!("baseline run {} not found", baseline_run_id))
        })?;
        let comparison = self.store.get_run(comparison_run_id)?.ok_or_else(|| {
            EngineError::validation(format!("comparison run {} not found", comparison_run_id))
        })?;
        if baseline.status != RunStatus::Completed {
            return Err(EngineError::validation(format!(
                "baseline run {} is not completed (status: {})",
                baseline_run_id,
                baseline.status.as_str()
            )));
        }
        if comparison.status != RunStatus::Completed {
            return Err(EngineError::validation(format!(
                "comparison run {} is not completed (status: {})",
                comparison_run_id,
                comparison.status.as_str()
            )));
        }
        if baseline.set_id != comparison.set_id {
            return Err(EngineError::validation(
                "runs must be from the same query set",
            ));
        }
        Ok((baseline.set_id, threshold))
    }

    fn analyze(
        &self,
        set_id: i64,
        baseline_run_id: i64,
        comparison_run_id: i64,
        threshold: f64,
    ) -> Result<(ComparisonRollup, Vec<ComparisonRow>), EngineError> {
        let queries = self.store.get_queries(set_id)?;

        let mut rollup = ComparisonRollup::default();
        let mut rows = Vec::new();
        let mut baseline_time_sum = 0.0;
        let mut comparison_time_sum = 0.0;

        for query in &queries {
            let base = self.store.query_statistics(baseline_run_id, query.id)?;
            let cmp = self.store.query_statistics(comparison_run_id, query.id)?;

            let base_ok = base.successful_executions > 0;
            let cmp_ok = cmp.successful_executions > 0;

            // Neither side has a successful execution: nothing to say.
            if !base_ok && !cmp_ok {
                continue;
            }

            if base_ok && !cmp_ok {
                rollup.new_failures += 1;
                rows.push(row_without_percent(&base, &cmp, QueryClassification::NewFailure));
                continue;
            }
            if !base_ok && cmp_ok {
                rollup.resolved += 1;
                rows.push(row_without_percent(&base, &cmp, QueryClassification::Resolved));
                continue;
            }

            let base_avg = base.avg_duration_ms.unwrap_or(0.0);
            let cmp_avg = cmp.avg_duration_ms.unwrap_or(0.0);

            if base_avg == 0.0 {
                rows.push(row_without_percent(&base, &cmp, QueryClassification::ZeroBaseline));
                continue;
            }

            let percent_change = (cmp_avg - base_avg) / base_avg * 100.0;
            let classification = classify(percent_change, threshold);

            rollup.queries_compared += 1;
            match classification {
                QueryClassification::Improved => rollup.queries_improved += 1,
                QueryClassification::Degraded => rollup.queries_degraded += 1,
                _ => rollup.queries_unchanged += 1,
            }
            baseline_time_sum += base_avg;
            comparison_time_sum += cmp_avg;

            rows.push(ComparisonRow {
                query_id: query.id,
                sequence_number: base.sequence_number,
                baseline_avg_ms: base.avg_duration_ms,
                baseline_min_ms: base.min_duration_ms,
                baseline_max_ms: base.max_duration_ms,
                comparison_avg_ms: cmp.avg_duration_ms,
                comparison_min_ms: cmp.min_duration_ms,
                comparison_max_ms: cmp.max_duration_ms,
                percent_change: Some(percent_change),
                classification,
            });
        }

        if baseline_time_sum > 0.0 {
            rollup.overall_percent_change =
                Some((comparison_time_sum - baseline_time_sum) / baseline_time_sum * 100.0);
        }

        // Largest deviations first; rows without a percent change sort last.
        rows.sort_by(|a, b| {
            let ka = a.percent_change.map(f64::abs).unwrap_or(-1.0);
            let kb = b.percent_change.map(f64::abs).unwrap_or(-1.0);
            kb.partial_cmp(&ka)
                .unwrap_or(Ordering::Equal)
                .then(a.sequence_number.cmp(&b.sequence_number))
        });

        Ok((rollup, rows))
    }
}

fn row_without_percent(
    base: &QueryStats,
    cmp: &QueryStats,
    classification: QueryClassification,
) -> ComparisonRow {
    ComparisonRow {
        query_id: base.query_id,
        sequence_number: base.sequence_number,
        baseline_avg_ms: base.avg_duration_ms,
        baseline_min_ms: base.min_duration_ms,
        baseline_max_ms: base.max_duration_ms,
        comparison_avg_ms: cmp.avg_duration_ms,
        comparison_min_ms: cmp.min_duration_ms,
        comparison_max_ms: cmp.max_duration_ms,
        percent_change: None,
        classification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sign_convention() {
        // +30% over a 20% threshold: slower, degraded.
        assert_eq!(classify(30.0, 20.0), QueryClassification::Degraded);
        // -30%: faster, improved.
        assert_eq!(classify(-30.0, 20.0), QueryClassification::Improved);
        // +10% within the threshold.
        assert_eq!(classify(10.0, 20.0), QueryClassification::Unchanged);
    }

    #[test]
    fn test_classify_boundary_is_inclusive() {
        assert_eq!(classify(20.0, 20.0), QueryClassification::Degraded);
        assert_eq!(classify(-20.0, 20.0), QueryClassification::Improved);
        assert_eq!(classify(19.999, 20.0), QueryClassification::Unchanged);
    }
}
