use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use k0s_controlplane_operator::health::{HealthState, run_health_server};
use k0s_controlplane_operator::{OperatorConfig, run_controller};

/// Lease configuration
const LEASE_NAME: &str = "k0s-controlplane-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("k0s_controlplane_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting k0s-controlplane-operator");

    let config = OperatorConfig::from_env();
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!(
        holder_id = %config.pod_name,
        namespace = %config.pod_namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());

    // Probes should answer even while not leading
    let health_handle = {
        let health_state = health_state.clone();
        let bind_addr = config.health_bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, &bind_addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_lock = || {
        LeaseLock::new(
            client.clone(),
            &config.pod_namespace,
            LeaseLockParams {
                holder_id: config.pod_name.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
            },
        )
    };

    info!("Waiting to acquire leadership...");
    let election = lease_lock();
    loop {
        match election.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    let shutdown = CancellationToken::new();

    // Losing the lease stops the controller; Kubernetes restarts us into the election
    let lease_renewal_handle = {
        let renewal = lease_lock();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match renewal.try_acquire_or_renew().await {
                    Ok(result) if result.acquired_lease => {}
                    Ok(_) => {
                        error!("Lost leadership! Shutting down...");
                        shutdown.cancel();
                        return;
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        shutdown.cancel();
                        return;
                    }
                }
            }
        })
    };

    info!("Watching K0sControlPlane resources (apiVersion: controlplane.cluster.x-k8s.io/v1beta1)");

    let mut controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let shutdown = shutdown.clone();
        let config = config.clone();
        tokio::spawn(async move {
            run_controller(controller_client, Some(health_state), config, shutdown).await;
        })
    };

    let lost_leadership = tokio::select! {
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
            false
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
            false
        }
        _ = lease_renewal_handle => true,
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            false
        }
    };

    health_state.set_ready(false).await;
    shutdown.cancel();

    // Give in-flight reconciliations time to complete
    info!(
        "Waiting up to {}s for in-flight reconciliations to complete...",
        SHUTDOWN_GRACE_PERIOD_SECS
    );
    let _ = tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
        controller_handle,
    )
    .await;

    info!("Operator stopped");
    if lost_leadership {
        std::process::exit(1);
    }
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
