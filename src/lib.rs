pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::K0sControlPlane;
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

/// Run the K0sControlPlane controller until the watch stream ends or `shutdown` fires.
///
/// Watches a single namespace when `config.watch_namespace` is set, and the
/// whole cluster otherwise. If health_state is provided, metrics will be
/// recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: OperatorConfig,
    shutdown: CancellationToken,
) {
    let scope_msg = config
        .watch_namespace
        .clone()
        .unwrap_or_else(|| "cluster-wide".to_string());
    tracing::info!(
        "Starting controller for K0sControlPlane resources (scope: {})",
        scope_msg
    );

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let control_planes: Api<K0sControlPlane> = match config.watch_namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(Context::new(client, health_state, config).with_shutdown(shutdown.clone()));

    let controller = Controller::new(control_planes, WatcherConfig::default().any_semantic())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events can still arrive for an object that was just deleted
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        });

    tokio::select! {
        _ = controller => tracing::error!("Controller stream ended unexpectedly"),
        _ = shutdown.cancelled() => tracing::info!("Controller stopped"),
    }
}
