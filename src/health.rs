//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels identifying one fleet
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FleetLabels {
    pub namespace: String,
    pub name: String,
}

impl FleetLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Labels for remediations held back by a safety gate
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BlockedLabels {
    pub namespace: String,
    pub name: String,
    pub reason: String,
}

/// Shared metrics state
pub struct Metrics {
    pub reconciliations_total: Family<FleetLabels, Counter>,
    pub reconciliation_errors_total: Family<FleetLabels, Counter>,
    pub reconcile_duration_seconds: Family<FleetLabels, Histogram>,

    /// Replicas deleted by remediation
    pub remediations_total: Family<FleetLabels, Counter>,
    /// Remediations held back, by gate
    pub remediations_blocked_total: Family<BlockedLabels, Counter>,

    // Fleet metrics
    pub fleet_replicas_desired: Family<FleetLabels, Gauge>,
    pub fleet_replicas_ready: Family<FleetLabels, Gauge>,
    pub fleet_replicas_updated: Family<FleetLabels, Gauge>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("k0s_controlplane_operator");

        let reconciliations_total = Family::<FleetLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<FleetLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<FleetLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let remediations_total = Family::<FleetLabels, Counter>::default();
        registry.register(
            "remediations",
            "Total number of replicas deleted by remediation",
            remediations_total.clone(),
        );

        let remediations_blocked_total = Family::<BlockedLabels, Counter>::default();
        registry.register(
            "remediations_blocked",
            "Total number of remediations held back by a safety gate",
            remediations_blocked_total.clone(),
        );

        let fleet_replicas_desired = Family::<FleetLabels, Gauge>::default();
        registry.register(
            "fleet_replicas_desired",
            "Desired number of control-plane replicas",
            fleet_replicas_desired.clone(),
        );

        let fleet_replicas_ready = Family::<FleetLabels, Gauge>::default();
        registry.register(
            "fleet_replicas_ready",
            "Number of ready control-plane replicas",
            fleet_replicas_ready.clone(),
        );

        let fleet_replicas_updated = Family::<FleetLabels, Gauge>::default();
        registry.register(
            "fleet_replicas_updated",
            "Number of control-plane replicas on the desired version",
            fleet_replicas_updated.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            remediations_total,
            remediations_blocked_total,
            fleet_replicas_desired,
            fleet_replicas_ready,
            fleet_replicas_updated,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = FleetLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&FleetLabels::new(namespace, name))
            .inc();
    }

    pub fn record_remediation(&self, namespace: &str, name: &str) {
        self.remediations_total
            .get_or_create(&FleetLabels::new(namespace, name))
            .inc();
    }

    pub fn record_blocked_remediation(&self, namespace: &str, name: &str, reason: &str) {
        let labels = BlockedLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: reason.to_string(),
        };
        self.remediations_blocked_total.get_or_create(&labels).inc();
    }

    /// Update fleet replica gauges
    pub fn set_fleet_replicas(
        &self,
        namespace: &str,
        name: &str,
        desired: i64,
        ready: i64,
        updated: i64,
    ) {
        let labels = FleetLabels::new(namespace, name);
        self.fleet_replicas_desired.get_or_create(&labels).set(desired);
        self.fleet_replicas_ready.get_or_create(&labels).set(ready);
        self.fleet_replicas_updated.get_or_create(&labels).set(updated);
    }

    /// Drop the gauges of a deleted fleet
    pub fn remove_fleet(&self, namespace: &str, name: &str) {
        let labels = FleetLabels::new(namespace, name);
        self.fleet_replicas_desired.remove(&labels);
        self.fleet_replicas_ready.remove(&labels);
        self.fleet_replicas_updated.remove(&labels);
    }

    /// Encode metrics to Prometheus text format
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (leading and watching)
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix time of the last successful reconcile
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve health and metrics endpoints on `bind_addr`
pub async fn run_health_server(
    state: Arc<HealthState>,
    bind_addr: &str,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("Health server listening on {}", bind_addr);

    axum::serve(listener, app).await
}
