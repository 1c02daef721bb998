//! Status and conditions management for K0sControlPlane resources
//!
//! Conditions are kept as a ledger keyed by type: setting a type replaces the
//! previous entry, and `lastTransitionTime` only moves when the status flips.
//! `StatusAggregator` turns one observation of the fleet into the status
//! written back at the end of a pass.

use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::client::{ControlPlaneClient, ReplicaExecutor, WorkloadClient};
use crate::controller::error::{Error, Result};
use crate::controller::replica_status::{
    MachineStatusComputer, PlanStatusComputer, ReplicaStatusComputer,
};
use crate::controller::version;
use crate::crd::{
    Condition, K0sControlPlane, K0sControlPlaneStatus, MachinePhase, Replica, UpdatePlan,
    UpdateStrategy,
};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Control plane API is reachable and serving
    pub const READY: &str = "Ready";
    /// Fleet is moving towards the desired version or replica count
    pub const PROGRESSING: &str = "Progressing";
    /// Some replicas are not serving
    pub const DEGRADED: &str = "Degraded";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition reasons written by the operator
pub mod reasons {
    pub const CONTROL_PLANE_READY: &str = "ControlPlaneReady";
    pub const API_UNREACHABLE: &str = "ApiUnreachable";
    pub const WAITING_FOR_ENDPOINT: &str = "WaitingForEndpoint";
    pub const INVALID_UPDATE_PLAN: &str = "InvalidUpdatePlan";
    pub const INVALID_VERSION: &str = "InvalidVersion";
    pub const UPGRADE_IN_PROGRESS: &str = "UpgradeInProgress";
    pub const SCALING: &str = "Scaling";
    pub const UP_TO_DATE: &str = "UpToDate";
    pub const REPLICAS_UNAVAILABLE: &str = "ReplicasUnavailable";
    pub const HEALTHY: &str = "Healthy";
    pub const WAITING_FOR_REMEDIATION: &str = "WaitingForRemediation";
    pub const DELETING: &str = "Deleting";
}

/// Build a standalone condition, stamped now
pub fn new_condition(
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        observed_generation: generation,
    }
}

fn bool_status(value: bool) -> &'static str {
    if value {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    }
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions
                .push(new_condition(type_, status, reason, message, self.generation));
        }
        self
    }

    /// Drop a condition type from the ledger
    pub fn remove(mut self, type_: &str) -> Self {
        self.conditions.retain(|c| c.type_ != type_);
        self
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::READY, bool_status(is_ready), reason, message)
    }

    /// Set the Progressing condition
    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROGRESSING,
            bool_status(is_progressing),
            reason,
            message,
        )
    }

    /// Set the Degraded condition
    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::DEGRADED,
            bool_status(is_degraded),
            reason,
            message,
        )
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Look up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if the spec has changed by comparing observed generation
pub fn spec_changed(kcp: &K0sControlPlane) -> bool {
    let current_generation = kcp.metadata.generation;
    let observed_generation = kcp.status.as_ref().and_then(|s| s.observed_generation);

    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        _ => true,
    }
}

/// Status computers for a strategy, applied in order
///
/// Every strategy starts from the replica-derived counters. In-place updates
/// then let the update plan, when there is one, decide the update progress
/// and the fleet version.
pub fn computers_for<'a>(
    strategy: UpdateStrategy,
    replicas: &'a [Replica],
    desired_version: &'a str,
    worker_enabled: bool,
    plan: Option<&'a UpdatePlan>,
) -> Vec<Box<dyn ReplicaStatusComputer + 'a>> {
    let in_place = matches!(strategy, UpdateStrategy::InPlace);
    let mut computers: Vec<Box<dyn ReplicaStatusComputer + 'a>> = vec![Box::new(
        MachineStatusComputer::new(replicas, desired_version, worker_enabled)
            .keep_known_version(in_place),
    )];

    if in_place && let Some(plan) = plan {
        computers.push(Box::new(PlanStatusComputer::new(plan, desired_version)));
    }

    computers
}

/// Result of aggregating one observation
#[derive(Debug)]
pub struct AggregateOutcome {
    /// Status to persist, whatever the error
    pub status: K0sControlPlaneStatus,
    /// `UpgradeNotCompleted` or an invariant violation to report for the pass
    pub error: Option<Error>,
}

/// Aggregates replica observations into a K0sControlPlane status
pub struct StatusAggregator<'a> {
    kcp: &'a K0sControlPlane,
    replicas: &'a [Replica],
    plan: Option<&'a UpdatePlan>,
}

impl<'a> StatusAggregator<'a> {
    pub fn new(
        kcp: &'a K0sControlPlane,
        replicas: &'a [Replica],
        plan: Option<&'a UpdatePlan>,
    ) -> Self {
        Self {
            kcp,
            replicas,
            plan,
        }
    }

    fn previous(&self) -> K0sControlPlaneStatus {
        self.kcp.status.clone().unwrap_or_default()
    }

    fn conditions(&self, status: &K0sControlPlaneStatus) -> ConditionBuilder {
        ConditionBuilder::from_existing(status.conditions.clone(), self.kcp.metadata.generation)
    }

    /// Run the strategy's computers over the previous status
    ///
    /// On an invariant violation the previous counters come back unchanged.
    pub fn compute_counters(&self) -> (K0sControlPlaneStatus, Option<Error>) {
        let previous = self.previous();
        let mut status = previous.clone();
        let spec = &self.kcp.spec;

        let computers = computers_for(
            spec.update_strategy,
            self.replicas,
            &spec.version,
            spec.worker_enabled,
            self.plan,
        );

        for computer in &computers {
            match computer.compute(&mut status) {
                Ok(()) => {}
                Err(e) if e.is_invariant_violation() => return (previous, Some(e)),
                Err(e) => return (status, Some(e)),
            }
        }

        (status, None)
    }

    /// Refresh the fleet version from what the serving replicas actually run
    async fn live_version(&self, executor: &dyn ReplicaExecutor) -> Result<Option<String>> {
        let namespace = self.kcp.namespace().unwrap_or_default();
        let mut reported = Vec::new();

        for replica in self
            .replicas
            .iter()
            .filter(|r| r.is_active() && r.phase == MachinePhase::Running)
        {
            let output = executor
                .exec(
                    &namespace,
                    &replica.name,
                    vec!["k0s".to_string(), "version".to_string()],
                )
                .await?;
            reported.push(output.trim().to_string());
        }

        match version::lowest(reported.iter().map(String::as_str))? {
            Some(lowest) => Ok(Some(version::align_suffix(lowest, &self.kcp.spec.version)?)),
            None => Ok(None),
        }
    }

    /// Compute the status for this pass, probing the control plane API
    pub async fn aggregate(
        &self,
        workload: &dyn WorkloadClient,
        executor: Option<&dyn ReplicaExecutor>,
        probe_timeout: Duration,
    ) -> AggregateOutcome {
        let name = self.kcp.name_any();
        let namespace = self.kcp.namespace().unwrap_or_default();
        let cluster_name = self.kcp.cluster_name();

        let (mut status, error) = self.compute_counters();

        if let Some(e) = error.as_ref().filter(|e| e.is_invariant_violation()) {
            let reason = match e {
                Error::InvalidVersion(_) | Error::VersionSkew { .. } => reasons::INVALID_VERSION,
                _ => reasons::INVALID_UPDATE_PLAN,
            };
            warn!(name = %name, error = %e, "Fleet status left unchanged");
            status.ready = false;
            status.conditions = self
                .conditions(&status)
                .ready(false, reason, &e.to_string())
                .build();
            return AggregateOutcome { status, error };
        }

        if self.kcp.spec.update_strategy == UpdateStrategy::InPlace
            && let Some(executor) = executor
        {
            match self.live_version(executor).await {
                Ok(Some(live)) => status.version = live,
                Ok(None) => {}
                Err(e) => warn!(name = %name, error = %e, "Failed to read live k0s version"),
            }
        }

        status.selector = crate::controller::client::replica_selector(&cluster_name);

        let mut conditions = self.conditions(&status);

        let desired = self.kcp.spec.replicas;
        conditions = match &error {
            Some(Error::UpgradeNotCompleted) => conditions.progressing(
                true,
                reasons::UPGRADE_IN_PROGRESS,
                &format!("Upgrading to {}", self.kcp.spec.version),
            ),
            _ if status.replicas != desired => conditions.progressing(
                true,
                reasons::SCALING,
                &format!("{} of {} replicas observed", status.replicas, desired),
            ),
            _ => conditions.progressing(false, reasons::UP_TO_DATE, "Fleet matches spec"),
        };

        conditions = if status.unavailable_replicas > 0 {
            conditions.degraded(
                true,
                reasons::REPLICAS_UNAVAILABLE,
                &format!("{} replicas unavailable", status.unavailable_replicas),
            )
        } else {
            conditions.degraded(false, reasons::HEALTHY, "All replicas available")
        };

        let probe = tokio::time::timeout(probe_timeout, workload.probe_api(&namespace, &cluster_name));
        conditions = match probe.await {
            Ok(Ok(())) => {
                status.ready = true;
                if !status.initialized {
                    info!(name = %name, "Control plane initialized");
                }
                status.initialized = true;
                conditions.ready(true, reasons::CONTROL_PLANE_READY, "Control plane API is serving")
            }
            Ok(Err(e)) => {
                debug!(name = %name, error = %e, "Control plane API probe failed");
                status.ready = false;
                conditions.ready(false, reasons::API_UNREACHABLE, &e.to_string())
            }
            Err(_) => {
                debug!(name = %name, "Control plane API probe timed out");
                status.ready = false;
                conditions.ready(
                    false,
                    reasons::API_UNREACHABLE,
                    &format!("No answer within {}s", probe_timeout.as_secs()),
                )
            }
        };

        status.conditions = conditions.build();
        if error.is_none() {
            status.observed_generation = self.kcp.metadata.generation;
        }

        AggregateOutcome { status, error }
    }
}

/// Poll until the cluster's control-plane endpoint has an address
pub async fn wait_for_endpoint(
    client: &dyn ControlPlaneClient,
    namespace: &str,
    cluster_name: &str,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(host) = client.control_plane_endpoint(namespace, cluster_name).await? {
            return Ok(host);
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(Error::Timeout(format!(
                "no control plane endpoint for {} after {}s",
                cluster_name,
                timeout.as_secs()
            )));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
