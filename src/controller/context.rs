use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::controller::client::{
    ControlPlaneClient, KubeControlPlaneClient, KubeWorkloadClient, PodExecutor,
    ReplicaExecutor, WorkloadClient,
};
use crate::controller::error::BackoffConfig;
use crate::controller::fleet_lock::FleetLocks;
use crate::health::HealthState;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Management cluster store
    pub client: Arc<dyn ControlPlaneClient>,
    /// Workload cluster access
    pub workload: Arc<dyn WorkloadClient>,
    /// Command execution on replicas, when live version reads are enabled
    pub executor: Option<Arc<dyn ReplicaExecutor>>,
    /// Health state for recording metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    pub fleet_locks: FleetLocks,
    pub backoff: BackoffConfig,
    pub config: OperatorConfig,
    /// Cancelled when the operator shuts down, ending long waits early
    pub shutdown: CancellationToken,
}

impl Context {
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        config: OperatorConfig,
    ) -> Self {
        let executor: Option<Arc<dyn ReplicaExecutor>> = config
            .live_version_probe
            .then(|| Arc::new(PodExecutor::new(client.clone())) as Arc<dyn ReplicaExecutor>);

        Self {
            client: Arc::new(KubeControlPlaneClient::new(client.clone())),
            workload: Arc::new(KubeWorkloadClient::new(client)),
            executor,
            health_state,
            fleet_locks: FleetLocks::new(),
            backoff: BackoffConfig::default(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Context over arbitrary collaborators
    pub fn with_collaborators(
        client: Arc<dyn ControlPlaneClient>,
        workload: Arc<dyn WorkloadClient>,
        executor: Option<Arc<dyn ReplicaExecutor>>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            workload,
            executor,
            health_state: None,
            fleet_locks: FleetLocks::new(),
            backoff: BackoffConfig::default(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie long waits to an external shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        if let Some(ref state) = self.health_state {
            state
                .metrics
                .record_reconcile(namespace, name, duration_secs);
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            state
                .last_reconcile
                .store(now, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(namespace, name);
        }
    }
}
