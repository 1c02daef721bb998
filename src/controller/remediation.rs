//! Remediation of unhealthy control-plane replicas
//!
//! Deciding is kept apart from acting: `plan_remediation` is a pure function
//! of the observed replicas, and `RemediationEngine` carries the decision out
//! through the store. At most one replica is remediated per fleet at a time,
//! tracked by the remediation lock annotation on the K0sControlPlane.

use tracing::{info, warn};

use crate::controller::client::{ControlPlaneClient, WorkloadClient};
use crate::controller::error::{Error, Result};
use crate::controller::replica_status::saturating_count;
use crate::controller::status::{condition_status, new_condition, reasons};
use crate::crd::{OWNER_REMEDIATED_CONDITION, REMEDIATION_IN_PROGRESS_ANNOTATION, Replica};

/// Why no remediation is attempted this pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No replica is both unhealthy and acknowledged by the owner
    NothingToRemediate,
    /// A previous remediation has not been replaced yet
    RemediationInProgress,
    /// The candidate is already being deleted
    AlreadyDeleting,
}

/// Safety gate that held back a remediation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockReason {
    /// Removing the replica would leave no healthy majority
    QuorumAtRisk,
    /// Another replica is still provisioning
    ScaleUpInProgress,
    /// Another replica is already being deleted
    DeletionInProgress,
}

impl BlockReason {
    /// Label value for the blocked-remediation metric
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::QuorumAtRisk => "QuorumAtRisk",
            BlockReason::ScaleUpInProgress => "ScaleUpInProgress",
            BlockReason::DeletionInProgress => "DeletionInProgress",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            BlockReason::QuorumAtRisk => {
                "Waiting for the control plane to have enough healthy replicas to remediate"
            }
            BlockReason::ScaleUpInProgress => {
                "Waiting for provisioning replicas to get a node before remediating"
            }
            BlockReason::DeletionInProgress => {
                "Waiting for replicas being deleted to go away before remediating"
            }
        }
    }
}

/// Outcome of the remediation decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemediationDecision {
    Skip(SkipReason),
    Blocked { replica: String, reason: BlockReason },
    Remediate { replica: String },
}

/// Everything one remediation pass will do
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemediationPlan {
    /// Healthy replicas whose stale remediation condition must be cleared
    pub sanitize: Vec<String>,
    pub decision: RemediationDecision,
}

/// Inputs to the remediation decision
#[derive(Clone, Copy, Debug)]
pub struct RemediationInput<'a> {
    pub replicas: &'a [Replica],
    /// The control plane API answered this pass; gates only apply then
    pub fleet_ready: bool,
    /// The remediation lock annotation is set
    pub lock_held: bool,
}

/// Decide what remediation, if any, happens this pass
pub fn plan_remediation(input: RemediationInput<'_>) -> RemediationPlan {
    let sanitize = input
        .replicas
        .iter()
        .filter(|r| r.healthy && r.owner_remediation_pending && !r.deletion_requested)
        .map(|r| r.name.clone())
        .collect();

    RemediationPlan {
        sanitize,
        decision: decide(input),
    }
}

fn decide(input: RemediationInput<'_>) -> RemediationDecision {
    // One remediation per lock cycle
    if input.lock_held {
        return RemediationDecision::Skip(SkipReason::RemediationInProgress);
    }

    let Some(target) = oldest_unhealthy(input.replicas) else {
        return RemediationDecision::Skip(SkipReason::NothingToRemediate);
    };

    if target.deletion_requested {
        return RemediationDecision::Skip(SkipReason::AlreadyDeleting);
    }

    if input.fleet_ready
        && let Some(reason) = blocking_gate(input.replicas, target)
    {
        return RemediationDecision::Blocked {
            replica: target.name.clone(),
            reason,
        };
    }

    RemediationDecision::Remediate {
        replica: target.name.clone(),
    }
}

/// Oldest replica that needs remediation; unknown creation times sort last
fn oldest_unhealthy(replicas: &[Replica]) -> Option<&Replica> {
    replicas
        .iter()
        .filter(|r| r.needs_remediation())
        .min_by(|a, b| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        })
}

fn blocking_gate(replicas: &[Replica], target: &Replica) -> Option<BlockReason> {
    let others = || replicas.iter().filter(|r| r.name != target.name);

    let healthy_after = others().filter(|r| r.is_active() && r.healthy).count();
    if replicas.len() <= 1 || healthy_after <= 1 {
        return Some(BlockReason::QuorumAtRisk);
    }

    if others().any(|r| r.is_active() && r.healthy && !r.has_node_ref) {
        return Some(BlockReason::ScaleUpInProgress);
    }

    if others().any(|r| r.deletion_requested) {
        return Some(BlockReason::DeletionInProgress);
    }

    None
}

/// What running a remediation plan did
#[derive(Debug)]
pub struct RemediationOutcome {
    pub decision: RemediationDecision,
    /// Condition updates that failed; they do not stop the pass
    pub condition_errors: Vec<Error>,
}

/// Carries out remediation plans for one fleet
pub struct RemediationEngine<'a> {
    client: &'a dyn ControlPlaneClient,
    workload: &'a dyn WorkloadClient,
    namespace: &'a str,
    fleet_name: &'a str,
    cluster_name: &'a str,
    generation: Option<i64>,
}

impl<'a> RemediationEngine<'a> {
    pub fn new(
        client: &'a dyn ControlPlaneClient,
        workload: &'a dyn WorkloadClient,
        namespace: &'a str,
        fleet_name: &'a str,
        cluster_name: &'a str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            client,
            workload,
            namespace,
            fleet_name,
            cluster_name,
            generation,
        }
    }

    /// Apply a plan
    ///
    /// Failures to update replica conditions are collected rather than
    /// returned; failing to delete the replica or take the lock is an error.
    pub async fn run(&self, plan: RemediationPlan) -> Result<RemediationOutcome> {
        let mut condition_errors = Vec::new();

        for replica in &plan.sanitize {
            if let Err(e) = self
                .client
                .clear_replica_condition(self.namespace, replica, OWNER_REMEDIATED_CONDITION)
                .await
            {
                warn!(replica = %replica, error = %e, "Failed to clear remediation condition");
                condition_errors.push(e);
            }
        }

        match &plan.decision {
            RemediationDecision::Skip(_) => {}
            RemediationDecision::Blocked { replica, reason } => {
                info!(
                    fleet = %self.fleet_name,
                    replica = %replica,
                    reason = reason.as_str(),
                    "Remediation blocked"
                );
                let condition = new_condition(
                    OWNER_REMEDIATED_CONDITION,
                    condition_status::FALSE,
                    reasons::WAITING_FOR_REMEDIATION,
                    reason.message(),
                    self.generation,
                );
                if let Err(e) = self
                    .client
                    .set_replica_condition(self.namespace, replica, &condition)
                    .await
                {
                    warn!(replica = %replica, error = %e, "Failed to record blocked remediation");
                    condition_errors.push(e);
                }
            }
            RemediationDecision::Remediate { replica } => {
                self.remediate(replica).await?;
            }
        }

        Ok(RemediationOutcome {
            decision: plan.decision,
            condition_errors,
        })
    }

    async fn remediate(&self, replica: &str) -> Result<()> {
        info!(fleet = %self.fleet_name, replica = %replica, "Remediating unhealthy replica");

        self.client.delete_replica(self.namespace, replica).await?;

        // Leaving the consensus group is best effort; the member may never
        // have joined, or the workload API may be the thing that is broken
        match self
            .workload
            .mark_leave(self.namespace, self.cluster_name, replica)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(replica = %replica, error = %e, "Failed to signal member leave"),
        }

        self.client
            .set_annotation(
                self.namespace,
                self.fleet_name,
                REMEDIATION_IN_PROGRESS_ANNOTATION,
                Some("true".to_string()),
            )
            .await
    }

    /// Drop the remediation lock
    pub async fn release_lock(&self) -> Result<()> {
        info!(fleet = %self.fleet_name, "Replacement replica observed, releasing remediation lock");
        self.client
            .set_annotation(
                self.namespace,
                self.fleet_name,
                REMEDIATION_IN_PROGRESS_ANNOTATION,
                None,
            )
            .await
    }
}

/// Whether a held lock can be released: the fleet is back to its desired size
pub fn lock_releasable(replicas: &[Replica], desired: i32) -> bool {
    saturating_count(replicas.iter().filter(|r| r.is_active()).count()) >= desired
}
