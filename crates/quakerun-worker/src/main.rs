//! QuakeRun Worker Daemon

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod executor;
mod memory;
mod registration;
mod server;

use config::Config;
use executor::SimulatedExecutor;
use quakerun_core::WorkerId;
use server::WorkerState;

/// QuakeRun worker - executes hazard tasks for the controller
#[derive(Parser)]
#[command(name = "quakerun-worker")]
#[command(about = "Worker daemon for QuakeRun", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "QUAKERUN_WORKER_BIND", default_value = "0.0.0.0:1909")]
    bind: SocketAddr,

    /// Worker name; a random id is generated when unset
    #[arg(long, env = "WORKER_NAME")]
    worker_name: Option<String>,

    /// Host or IP the controller should use to reach this worker
    #[arg(long, env = "WORKER_IP")]
    advertise_host: Option<String>,

    /// Full base URL for the controller to reach this worker; overrides
    /// the advertised host
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Controller base URL for self-registration
    #[arg(long, env = "QUAKERUN_CONTROLLER_URL")]
    controller_url: Option<String>,

    /// Registration refresh interval, in seconds
    #[arg(long, default_value_t = 15)]
    heartbeat_interval_secs: u64,

    /// Simulated cost of one rupture, in milliseconds
    #[arg(long, default_value_t = 0.01)]
    cost_per_rupture_ms: f64,
}

impl Cli {
    fn into_config(self) -> Config {
        let advertise_addr = match (self.advertise_addr, self.advertise_host) {
            (Some(addr), _) => addr,
            (None, Some(host)) => format!("http://{}:{}", host, self.bind.port()),
            (None, None) => format!("http://127.0.0.1:{}", self.bind.port()),
        };

        Config {
            bind_addr: self.bind.to_string(),
            worker_id: self
                .worker_name
                .map(WorkerId::new)
                .unwrap_or_else(WorkerId::generate),
            advertise_addr,
            controller_url: self.controller_url,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            cost_per_rupture_ms: self.cost_per_rupture_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Arc::new(Cli::parse().into_config());
    let addr: SocketAddr = config.bind_addr.parse()?;

    info!(
        worker_id = %config.worker_id,
        bind = %addr,
        advertise = %config.advertise_addr,
        controller = ?config.controller_url,
        "Starting QuakeRun worker"
    );

    let executor = Arc::new(SimulatedExecutor::new(config.cost_per_rupture_ms));
    let state = WorkerState::new(config.worker_id.clone(), executor);
    let router = server::create_router(state);
    let listener = TcpListener::bind(addr).await?;

    let shutdown = CancellationToken::new();
    let registration = tokio::spawn(registration::run_registration_loop(
        config.clone(),
        shutdown.clone(),
    ));

    let server_shutdown = shutdown.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = registration.await {
        error!(error = %e, "Registration task failed");
    }

    result.map_err(Into::into)
}
