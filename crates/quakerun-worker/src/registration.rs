//! Self-registration with the controller.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quakerun_proto::{paths, RegisterWorkerRequest};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Controller unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Controller refused registration ({0})")]
    Refused(u16),
}

/// Register once.
///
/// Returns true if the controller saw this worker for the first time.
pub async fn register(
    client: &reqwest::Client,
    controller_url: &str,
    config: &Config,
) -> Result<bool, RegistrationError> {
    let url = format!(
        "{}/{}",
        controller_url.trim_end_matches('/'),
        paths::WORKERS.trim_start_matches('/')
    );
    let body = RegisterWorkerRequest {
        worker_id: config.worker_id.as_str().to_string(),
        address: config.advertise_addr.clone(),
    };

    let response = client.post(&url).json(&body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RegistrationError::Refused(status.as_u16()));
    }
    Ok(status == reqwest::StatusCode::CREATED)
}

/// Register on start-up and refresh every heartbeat interval until
/// `shutdown` is cancelled.
///
/// A refresh also brings the worker back if the controller dropped it.
pub async fn run_registration_loop(config: Arc<Config>, shutdown: CancellationToken) {
    let Some(controller_url) = config.controller_url.clone() else {
        info!("No controller configured - skipping self-registration");
        return;
    };

    let client = reqwest::Client::new();
    let mut interval_timer = tokio::time::interval(config.heartbeat_interval());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        match register(&client, &controller_url, &config).await {
            Ok(true) => info!(
                worker_id = %config.worker_id,
                controller = %controller_url,
                "Registered with controller"
            ),
            Ok(false) => debug!(worker_id = %config.worker_id, "Registration refreshed"),
            Err(e) => warn!(
                controller = %controller_url,
                error = %e,
                "Registration failed - retrying next interval"
            ),
        }
    }
}
