use super::{BackendResponse, ConnectionParams, ExecutionBackend};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic in-process backend for tests and demos. Tracks how many
/// executions were in flight at once so tests can assert the concurrency
/// gate held.
pub struct FakeBackend {
    latency: Duration,
    fail_when_contains: Option<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(0),
            fail_when_contains: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Statements containing the needle come back as SQL errors.
    pub fn fail_when_contains(mut self, needle: impl Into<String>) -> Self {
        self.fail_when_contains = Some(needle.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously running executions.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn execute(
        &self,
        _params: &ConnectionParams,
        sql: &str,
    ) -> anyhow::Result<BackendResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(needle) = &self.fail_when_contains {
            if sql.contains(needle.as_str()) {
                return Ok(BackendResponse {
                    success: false,
                    row_count: 0,
                    data: serde_json::Value::Null,
                    error: Some(format!("SQL error near '{}'", needle)),
                });
            }
        }

        Ok(BackendResponse {
            success: true,
            row_count: 1,
            data: serde_json::Value::Null,
            error: None,
        })
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}
