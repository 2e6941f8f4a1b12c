use super::args::{Cli, Command, CompareArgs, InitArgs, RunArgs, RunsArgs};
use anyhow::Context;
use qrybench_core::compare::ComparisonEngine;
use qrybench_core::config::{load_query_set, write_sample_query_set, EngineConfig};
use qrybench_core::engine::executor::QueryExecutor;
use qrybench_core::engine::orchestrator::Engine;
use qrybench_core::model::{generate_run_label, MetricsLevel, RunSpec};
use qrybench_core::progress::{ProgressHub, RunEvent};
use qrybench_core::providers::backend::fake::FakeBackend;
use qrybench_core::providers::backend::http::HttpBackend;
use qrybench_core::providers::backend::{ConnectionParams, ExecutionBackend};
use qrybench_core::report::console;
use qrybench_core::storage::store::Store;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Run(args) => cmd_run(args).await,
        Command::Compare(args) => cmd_compare(args),
        Command::Runs(args) => cmd_runs(args),
        Command::Version => {
            println!("qrybench {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    write_sample_query_set(&args.out)?;
    eprintln!("wrote sample query set to {}", args.out.display());
    Ok(0)
}

fn open_store(path: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = Store::open(path)?;
    store.init_schema()?;
    Ok(store)
}

fn build_backend(args: &RunArgs) -> anyhow::Result<Arc<dyn ExecutionBackend>> {
    match args.backend.as_str() {
        "fake" => Ok(Arc::new(
            FakeBackend::new().with_latency(Duration::from_millis(5)),
        )),
        "http" => {
            let url = args
                .backend_url
                .clone()
                .context("--backend-url (or QRYBENCH_BACKEND_URL) is required for http")?;
            let token = args.service_token.clone().unwrap_or_default();
            Ok(Arc::new(HttpBackend::new(url, token)))
        }
        other => anyhow::bail!("unknown backend '{}' (expected fake|http)", other),
    }
}

fn connection_params_from_env() -> ConnectionParams {
    let var = |k: &str| std::env::var(k).unwrap_or_default();
    ConnectionParams {
        host: var("QRYBENCH_DB_HOST"),
        port: std::env::var("QRYBENCH_DB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        database: var("QRYBENCH_DB_NAME"),
        username: var("QRYBENCH_DB_USER"),
        password: var("QRYBENCH_DB_PASSWORD"),
        secure: std::env::var("QRYBENCH_DB_SECURE").ok().as_deref() == Some("true"),
        default_schema: std::env::var("QRYBENCH_DB_SCHEMA").ok(),
        library_list: None,
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let metrics_level = MetricsLevel::parse(&args.metrics_level)
        .with_context(|| format!("invalid metrics level '{}'", args.metrics_level))?;

    let store = open_store(&args.db)?;
    let set_cfg = load_query_set(&args.config)?;

    let set_id = store.create_query_set(&set_cfg.name)?;
    for entry in &set_cfg.queries {
        store.add_query(set_id, entry.name.as_deref(), &entry.sql)?;
    }

    let config = EngineConfig::from_env();
    let backend = build_backend(&args)?;
    let executor = QueryExecutor::new(
        backend,
        connection_params_from_env(),
        Duration::from_secs(config.query_timeout_secs),
    );
    let hub = ProgressHub::new();
    let engine = Engine::new(store.clone(), executor, hub.clone(), config);

    let run_id = engine.create_run(
        set_id,
        args.user_id,
        RunSpec {
            label: Some(args.label.clone().unwrap_or_else(generate_run_label)),
            iteration_count: args.iterations,
            concurrency_limit: args.concurrency,
            metrics_level,
        },
    )?;

    let mut sub = hub.subscribe(run_id);
    let verbose = args.verbose;
    let printer = tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            match &event {
                RunEvent::Progress { completed, total } => {
                    eprintln!("  {}/{} executions complete", completed, total);
                }
                RunEvent::ExecutionCompleted {
                    query_id,
                    iteration,
                    status,
                    duration_ms,
                    ..
                } if verbose => {
                    eprintln!(
                        "  query {} iteration {}: {} ({}ms)",
                        query_id,
                        iteration,
                        status.as_str(),
                        duration_ms
                    );
                }
                RunEvent::StatusChanged { status } => {
                    eprintln!("run status: {}", status.as_str());
                    if status.is_terminal() {
                        break;
                    }
                }
                _ => {}
            }
        }
    });

    let handle = engine.start_run(run_id).await?;
    handle.await.context("run task panicked")?;
    printer.await.ok();

    let run = store
        .get_run(run_id)?
        .context("run disappeared after execution")?;
    let failed = store.failed_executions(run_id)?;
    console::print_run_summary(&run, &failed);

    Ok(if run.status == qrybench_core::model::RunStatus::Completed {
        0
    } else {
        1
    })
}

fn cmd_compare(args: CompareArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let report =
        ComparisonEngine::new(store).compare(args.baseline, args.comparison, args.threshold)?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => console::print_comparison(&report),
    }

    if args.strict
        && (report.rollup.queries_degraded > 0 || report.rollup.new_failures > 0)
    {
        return Ok(1);
    }
    Ok(0)
}

fn cmd_runs(args: RunsArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let runs = store.list_runs(args.last)?;
    if runs.is_empty() {
        eprintln!("no runs recorded");
        return Ok(0);
    }
    for run in runs {
        let avg = run
            .avg_duration_ms
            .map(|v| format!("{:.1}ms", v))
            .unwrap_or_else(|| "-".into());
        eprintln!(
            "#{:<5} {:<24} {:<10} set {:<4} {} exec ({} failed) avg {}",
            run.id,
            run.label,
            run.status.as_str(),
            run.set_id,
            run.total_executions,
            run.failed_executions,
            avg
        );
    }
    Ok(0)
}
