use super::{BackendResponse, ConnectionParams, ExecutionBackend};
use async_trait::async_trait;
use serde_json::json;

/// Client for the remote execution service. The service holds the JDBC
/// connection pool; we only post statements and read back timing material.
pub struct HttpBackend {
    pub base_url: String,
    pub service_token: String,
    pub client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: String, service_token: String) -> Self {
        Self {
            base_url,
            service_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn execute(
        &self,
        params: &ConnectionParams,
        sql: &str,
    ) -> anyhow::Result<BackendResponse> {
        let url = format!("{}/api/query/execute", self.base_url.trim_end_matches('/'));

        let body = json!({
            "host": params.host,
            "port": params.port,
            "database": params.database,
            "username": params.username,
            "password": params.password,
            "secure": params.secure,
            "defaultSchema": params.default_schema,
            "libraryList": params.library_list,
            "sql": sql,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.service_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("execution service error ({}): {}", status, error_text);
        }

        let parsed: BackendResponse = resp.json().await?;
        Ok(parsed)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
