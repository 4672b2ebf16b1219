use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use postgres_controller::config::ControllerConfig;
use postgres_controller::health::{HealthState, run_health_server};
use postgres_controller::{drain_controller, run_controller};

/// How long in-flight reconciliations may run after a shutdown signal
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("postgres_controller=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    info!("Starting postgres-controller");

    let config = ControllerConfig::from_env()?;
    info!(
        namespace = config.namespace.as_deref().unwrap_or("cluster-wide"),
        poll_interval = ?config.requeue.poll,
        health_addr = %config.health_addr,
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    // Probes should answer while the controller starts
    let health_handle = {
        let health_state = health_state.clone();
        let addr = config.health_addr;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    info!("Watching Postgres resources (apiVersion: postgres.snappcloud.io/v1alpha1)");

    let mut controller_handle = {
        let health_state = health_state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_controller(client, &config, Some(health_state), shutdown).await;
        })
    };

    tokio::select! {
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping in-flight reconciliations");
            health_state.set_ready(false).await;
            shutdown.cancel();

            info!(
                "Waiting up to {}s for the controller to drain",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            drain_controller(
                &mut controller_handle,
                Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
            )
            .await;
        }
    }

    info!("Controller stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
