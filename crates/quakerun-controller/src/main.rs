//! QuakeRun Controller Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quakerun_controller::calculation::{run_calculation, wait_for_workers};
use quakerun_controller::{http, AppState, Config};
use quakerun_core::{plan_tasks, Operation, SourceGroup};

/// QuakeRun controller - dispatches hazard tasks to a worker pool
#[derive(Parser)]
#[command(name = "quakerun-controller")]
#[command(about = "Task dispatcher and execution accounting for QuakeRun", long_about = None)]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ServerArgs {
    /// Address for the registration / report / metrics API
    #[arg(long, env = "QUAKERUN_BIND", default_value = "0.0.0.0:1908")]
    bind: SocketAddr,

    /// Attempts per task before giving up
    #[arg(long, env = "QUAKERUN_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Deadline for one task attempt, in seconds
    #[arg(long, env = "QUAKERUN_TASK_TIMEOUT", default_value_t = 30)]
    task_timeout_secs: u64,

    /// Interval between probes of unreachable workers, in seconds
    #[arg(long, env = "QUAKERUN_PROBE_INTERVAL", default_value_t = 5)]
    probe_interval_secs: u64,

    /// Consecutive failed probes before a worker is dropped
    #[arg(long, env = "QUAKERUN_PROBE_FAILURES", default_value_t = 3)]
    probe_failure_threshold: u32,

    /// Pending tasks accepted while no worker is idle
    #[arg(long, env = "QUAKERUN_MAX_QUEUE_DEPTH", default_value_t = 10_000)]
    max_queue_depth: usize,

    /// Number of slowest sources kept in the report
    #[arg(long, default_value_t = 10)]
    top_k_sources: usize,
}

impl ServerArgs {
    fn into_config(self) -> Config {
        let task_timeout = Duration::from_secs(self.task_timeout_secs);
        Config {
            bind_addr: self.bind.to_string(),
            max_retries: self.max_retries,
            task_timeout,
            probe_interval: Duration::from_secs(self.probe_interval_secs),
            probe_failure_threshold: self.probe_failure_threshold,
            max_queue_depth: self.max_queue_depth,
            top_k_sources: self.top_k_sources,
            request_timeout: task_timeout * 2,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the registration API and wait for work
    Serve,

    /// Plan a source model into tasks, run them and print the report
    Run {
        /// JSON file with a list of source groups
        #[arg(long)]
        sources: PathBuf,

        /// Calculation stage to run
        #[arg(long, default_value = "preclassical")]
        operation: Operation,

        /// Target number of tasks
        #[arg(long, default_value_t = 16)]
        concurrent_tasks: usize,

        /// Master seed; task seeds are derived from it
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Workers to wait for before dispatching
        #[arg(long, default_value_t = 1)]
        min_workers: usize,

        /// How long to wait for workers, in seconds
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,

        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so that `run` can print the report on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.server.into_config();
    let addr: SocketAddr = config.bind_addr.parse()?;

    let state = AppState::new(config)?;
    let shutdown = CancellationToken::new();
    let prober = state.spawn_prober(shutdown.clone());

    let listener = TcpListener::bind(addr).await?;
    let router = http::create_router(state.clone());
    info!(addr = %addr, "Starting QuakeRun controller");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let result = match cli.command {
        Commands::Serve => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                }
                _ = shutdown.cancelled() => {}
            }
            Ok(())
        }
        Commands::Run {
            sources,
            operation,
            concurrent_tasks,
            seed,
            min_workers,
            wait_secs,
            output,
        } => {
            run(
                &state,
                RunArgs {
                    sources,
                    operation,
                    concurrent_tasks,
                    seed,
                    min_workers,
                    wait: Duration::from_secs(wait_secs),
                    output,
                },
            )
            .await
        }
    };

    shutdown.cancel();
    state.dispatcher.shutdown();
    if let Err(e) = prober.await {
        warn!(error = %e, "Prober task ended abnormally");
    }
    match server.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    result
}

struct RunArgs {
    sources: PathBuf,
    operation: Operation,
    concurrent_tasks: usize,
    seed: u64,
    min_workers: usize,
    wait: Duration,
    output: Option<PathBuf>,
}

async fn run(state: &Arc<AppState>, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(&args.sources).map_err(|e| {
        format!(
            "Failed to read source groups from '{}': {}",
            args.sources.display(),
            e
        )
    })?;
    let groups: Vec<SourceGroup> = serde_json::from_str(&raw)?;
    let tasks = plan_tasks(&groups, args.operation, args.concurrent_tasks, args.seed)?;

    let workers = wait_for_workers(&state.pool, args.min_workers, args.wait).await;
    if workers == 0 {
        return Err("no workers registered".into());
    }
    if workers < args.min_workers {
        warn!(
            workers,
            wanted = args.min_workers,
            "Starting with fewer workers than requested"
        );
    }

    let report = run_calculation(state, tasks).await?;
    if !report.complete {
        warn!(
            failed = report.failed_tasks.len(),
            "Report is incomplete"
        );
    }

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json)?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
