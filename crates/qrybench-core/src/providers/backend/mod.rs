use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connection parameters for the remote database, resolved by an external
/// credential store and passed through opaquely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_list: Option<Vec<String>>,
}

/// What the execution backend reports for one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    pub success: bool,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// The remote service that actually runs SQL. Invoked exactly once per
/// execution; the caller owns the timeout.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        params: &ConnectionParams,
        sql: &str,
    ) -> anyhow::Result<BackendResponse>;
    fn backend_name(&self) -> &'static str;
}

pub mod fake;
pub mod http;
