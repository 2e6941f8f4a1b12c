use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySet {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// One SQL statement belonging to a query set. `content_hash` is a sha256 of
/// the normalized statement text and backs duplicate detection inside a set;
/// editing the text recomputes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: i64,
    pub set_id: i64,
    pub sequence_number: u32,
    pub name: Option<String>,
    pub sql_text: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => RunStatus::Pending,
            "RUNNING" => RunStatus::Running,
            "COMPLETED" => RunStatus::Completed,
            "CANCELLED" => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }

    /// Terminal states are final; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "RUNNING" => ExecutionStatus::Running,
            "COMPLETED" => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        }
    }
}

/// How much detail the execution backend is asked to collect per statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricsLevel {
    Basic,
    Standard,
    Comprehensive,
}

impl MetricsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricsLevel::Basic => "BASIC",
            MetricsLevel::Standard => "STANDARD",
            MetricsLevel::Comprehensive => "COMPREHENSIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BASIC" => Some(MetricsLevel::Basic),
            "STANDARD" => Some(MetricsLevel::Standard),
            "COMPREHENSIVE" => Some(MetricsLevel::Comprehensive),
            _ => None,
        }
    }
}

/// One execution campaign over a query set. Rollup counters always equal an
/// aggregation over the run's own execution rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: i64,
    pub set_id: i64,
    pub user_id: i64,
    pub label: String,
    pub iteration_count: u32,
    pub concurrency_limit: u32,
    pub metrics_level: MetricsLevel,
    pub status: RunStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_duration_ms: Option<f64>,
}

/// Parameters for creating a new run.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub label: Option<String>,
    pub iteration_count: u32,
    pub concurrency_limit: u32,
    pub metrics_level: MetricsLevel,
}

/// One (query x iteration) attempt within a run. Immutable after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub run_id: i64,
    pub query_id: i64,
    pub iteration_number: u32,
    pub status: ExecutionStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub rows_affected: Option<i64>,
    pub error_message: Option<String>,
}

/// Timing aggregates for one query within one run, restricted to COMPLETED
/// executions; failures are counted separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStats {
    pub query_id: i64,
    pub sequence_number: u32,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
}

/// Aggregates over every execution of a run, regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_duration_ms: Option<f64>,
    pub total_duration_ms: u64,
}

/// Default run label: `run-YYYYMMDD-HHMMSS`.
pub fn generate_run_label() -> String {
    chrono::Utc::now().format("run-%Y%m%d-%H%M%S").to_string()
}
