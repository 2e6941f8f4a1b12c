use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qrybench",
    version,
    about = "SQL query performance test runs and run-to-run comparison"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Init(InitArgs),
    Run(RunArgs),
    Compare(CompareArgs),
    Runs(RunsArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "queries.yaml")]
    pub out: PathBuf,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "queries.yaml")]
    pub config: PathBuf,
    #[arg(long, default_value = ".qrybench/qrybench.db")]
    pub db: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub iterations: u32,

    /// Max executions in flight at once for this run
    #[arg(long, default_value_t = 4)]
    pub concurrency: u32,

    /// Metrics collection level: BASIC|STANDARD|COMPREHENSIVE
    #[arg(long, default_value = "STANDARD")]
    pub metrics_level: String,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub user_id: i64,

    /// Execution backend: fake|http
    #[arg(long, default_value = "fake")]
    pub backend: String,

    /// Base URL of the remote execution service (http backend)
    #[arg(long, env = "QRYBENCH_BACKEND_URL")]
    pub backend_url: Option<String>,

    #[arg(long, env = "QRYBENCH_SERVICE_TOKEN", hide_env_values = true)]
    pub service_token: Option<String>,

    /// Print progress events as they arrive
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Clone)]
pub struct CompareArgs {
    #[arg(long, default_value = ".qrybench/qrybench.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub baseline: i64,

    #[arg(long)]
    pub comparison: i64,

    /// Deviation threshold in percent (0..=100)
    #[arg(long, default_value_t = 20.0)]
    pub threshold: f64,

    /// Output format: text|json
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Exit non-zero when any query degraded or newly failed
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct RunsArgs {
    #[arg(long, default_value = ".qrybench/qrybench.db")]
    pub db: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub last: u32,
}
