use crate::compare::{ComparisonReport, QueryClassification};
use crate::model::{Execution, TestRun};

pub fn print_run_summary(run: &TestRun, failed: &[Execution]) {
    eprintln!("\nRun #{} ({})", run.id, run.label);
    eprintln!(
        "Status: {}  iterations: {}  concurrency: {}",
        run.status.as_str(),
        run.iteration_count,
        run.concurrency_limit
    );
    let avg = run
        .avg_duration_ms
        .map(|v| format!("{:.1}ms", v))
        .unwrap_or_else(|| "-".into());
    eprintln!(
        "Executions: {} total, {} succeeded, {} failed, avg {}",
        run.total_executions, run.successful_executions, run.failed_executions, avg
    );

    if !failed.is_empty() {
        eprintln!("\nFailed executions:");
        for e in failed {
            eprintln!(
                "  ❌ query {} iteration {}: {}",
                e.query_id,
                e.iteration_number,
                e.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

pub fn print_comparison(report: &ComparisonReport) {
    eprintln!(
        "\nComparison #{}: run {} vs run {} (threshold {:.1}%)",
        report.id, report.baseline_run_id, report.comparison_run_id, report.deviation_threshold
    );

    for row in &report.rows {
        let icon = match row.classification {
            QueryClassification::Improved => "⬆️ ",
            QueryClassification::Degraded => "⬇️ ",
            QueryClassification::Unchanged => "  ",
            QueryClassification::NewFailure => "💥",
            QueryClassification::Resolved => "✅",
            QueryClassification::ZeroBaseline => "⚠️ ",
        };
        let change = row
            .percent_change
            .map(|p| format!("{:+.1}%", p))
            .unwrap_or_else(|| "-".into());
        let base = row
            .baseline_avg_ms
            .map(|v| format!("{:.1}ms", v))
            .unwrap_or_else(|| "-".into());
        let cmp = row
            .comparison_avg_ms
            .map(|v| format!("{:.1}ms", v))
            .unwrap_or_else(|| "-".into());
        eprintln!(
            "{} query #{:<4} {:<12} {:>10} -> {:>10}  {}",
            icon,
            row.sequence_number,
            row.classification.as_str(),
            base,
            cmp,
            change
        );
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let overall = report
        .rollup
        .overall_percent_change
        .map(|p| format!("{:+.1}%", p))
        .unwrap_or_else(|| "-".into());
    eprintln!(
        "Summary: {} compared, {} improved, {} degraded, {} unchanged, {} new failures, {} resolved, overall {}",
        report.rollup.queries_compared,
        report.rollup.queries_improved,
        report.rollup.queries_degraded,
        report.rollup.queries_unchanged,
        report.rollup.new_failures,
        report.rollup.resolved,
        overall
    );
}
