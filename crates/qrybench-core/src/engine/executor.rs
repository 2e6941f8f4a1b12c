use crate::model::ExecutionStatus;
use crate::providers::backend::{ConnectionParams, ExecutionBackend};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Terminal result of one execution attempt. Failures carry a message;
/// they are recorded, never propagated.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub rows_affected: Option<i64>,
    pub error: Option<String>,
}

/// Runs one statement once against the execution backend. No retries; a
/// backend error, SQL error or timeout all come back as a Failed outcome so
/// a single query can never crash the run.
#[derive(Clone)]
pub struct QueryExecutor {
    pub backend: Arc<dyn ExecutionBackend>,
    pub params: ConnectionParams,
    pub timeout: Duration,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>, params: ConnectionParams, timeout: Duration) -> Self {
        Self {
            backend,
            params,
            timeout,
        }
    }

    pub async fn execute_once(&self, sql: &str) -> ExecutionOutcome {
        let start = Instant::now();
        let fut = self.backend.execute(&self.params, sql);
        match timeout(self.timeout, fut).await {
            Ok(Ok(resp)) if resp.success => ExecutionOutcome {
                status: ExecutionStatus::Completed,
                duration_ms: start.elapsed().as_millis() as u64,
                rows_affected: Some(resp.row_count),
                error: None,
            },
            Ok(Ok(resp)) => ExecutionOutcome {
                status: ExecutionStatus::Failed,
                duration_ms: start.elapsed().as_millis() as u64,
                rows_affected: None,
                error: Some(
                    resp.error
                        .unwrap_or_else(|| "query failed without error detail".to_string()),
                ),
            },
            Ok(Err(e)) => ExecutionOutcome {
                status: ExecutionStatus::Failed,
                duration_ms: start.elapsed().as_millis() as u64,
                rows_affected: None,
                error: Some(e.to_string()),
            },
            Err(_) => ExecutionOutcome {
                status: ExecutionStatus::Failed,
                duration_ms: start.elapsed().as_millis() as u64,
                rows_affected: None,
                error: Some(format!(
                    "query timed out after {}s",
                    self.timeout.as_secs()
                )),
            },
        }
    }
}
