use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Engine-wide limits and defaults. Loaded once at service start;
/// per-run parameters (iterations, concurrency) live on the run itself.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_concurrent_runs_per_user: usize,
    pub query_timeout_secs: u64,
    pub max_iterations: u32,
    pub max_concurrency: u32,
    pub default_deviation_threshold: f64,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs_per_user: 5,
            query_timeout_secs: 300,
            max_iterations: 1000,
            max_concurrency: 32,
            default_deviation_threshold: 20.0,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("QRYBENCH_MAX_CONCURRENT_RUNS") {
            if let Ok(n) = v.parse() {
                cfg.max_concurrent_runs_per_user = n;
            }
        }
        if let Ok(v) = env::var("QRYBENCH_QUERY_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.query_timeout_secs = n;
            }
        }
        if let Ok(v) = env::var("QRYBENCH_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                cfg.max_iterations = n;
            }
        }
        if let Ok(v) = env::var("QRYBENCH_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                cfg.max_concurrency = n;
            }
        }
        if let Ok(v) = env::var("QRYBENCH_DEVIATION_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.default_deviation_threshold = n;
            }
        }
        if let Ok(v) = env::var("QRYBENCH_LOG") {
            cfg.log_level = v;
        }
        cfg
    }
}

/// On-disk query-set definition consumed by the CLI `run` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySetConfig {
    pub name: String,
    pub queries: Vec<QueryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sql: String,
}

pub fn load_query_set(path: &Path) -> anyhow::Result<QuerySetConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read query set {}", path.display()))?;
    let cfg: QuerySetConfig =
        serde_yaml::from_str(&raw).context("failed to parse query set YAML")?;
    if cfg.queries.is_empty() {
        anyhow::bail!("query set '{}' has no queries", cfg.name);
    }
    Ok(cfg)
}

pub fn write_sample_query_set(path: &Path) -> anyhow::Result<()> {
    std::fs::write(
        path,
        r#"name: demo
queries:
  - name: count_orders
    sql: SELECT COUNT(*) FROM orders
  - name: top_customers
    sql: |
      SELECT customer_id, SUM(total) AS revenue
      FROM orders
      GROUP BY customer_id
      ORDER BY revenue DESC
      FETCH FIRST 10 ROWS ONLY
"#,
    )
    .with_context(|| format!("failed to write sample query set {}", path.display()))?;
    Ok(())
}
