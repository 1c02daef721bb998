//! Observed control-plane replicas
//!
//! Replicas are created and destroyed by the machine lifecycle controllers.
//! The operator only reads them, so these types carry the facts the status
//! computers and remediation engine need, not a full Machine object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine condition set by health checks; `False` marks the replica unhealthy
pub const HEALTH_CHECK_SUCCEEDED_CONDITION: &str = "HealthCheckSucceeded";

/// Machine condition through which the owner tracks remediation
///
/// `False` means the health check failure has been handed to the owner and
/// the owner has not remediated yet.
pub const OWNER_REMEDIATED_CONDITION: &str = "OwnerRemediated";

/// Lifecycle phase of a replica's machine
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum MachinePhase {
    Provisioning,
    Provisioned,
    Running,
    Deleting,
    Deleted,
    Failed,
    /// Any phase the operator does not interpret (e.g. "Pending", "Unknown")
    Other(String),
}

impl MachinePhase {
    /// Parse a phase as reported on a Machine status
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Provisioning" => MachinePhase::Provisioning,
            "Provisioned" => MachinePhase::Provisioned,
            "Running" => MachinePhase::Running,
            "Deleting" => MachinePhase::Deleting,
            "Deleted" => MachinePhase::Deleted,
            "Failed" => MachinePhase::Failed,
            other => MachinePhase::Other(other.to_string()),
        }
    }

    /// Whether the replica is on its way out and must be left out of counters
    pub fn is_terminating(&self) -> bool {
        matches!(self, MachinePhase::Deleting | MachinePhase::Deleted)
    }
}

impl std::fmt::Display for MachinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachinePhase::Provisioning => write!(f, "Provisioning"),
            MachinePhase::Provisioned => write!(f, "Provisioned"),
            MachinePhase::Running => write!(f, "Running"),
            MachinePhase::Deleting => write!(f, "Deleting"),
            MachinePhase::Deleted => write!(f, "Deleted"),
            MachinePhase::Failed => write!(f, "Failed"),
            MachinePhase::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One control-plane node instance
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Replica {
    /// Machine name
    pub name: String,
    /// Version assigned to the machine
    pub version: String,
    /// Lifecycle phase
    pub phase: MachinePhase,
    /// External health-check signal
    pub healthy: bool,
    /// The owner acknowledged a failed health check and has not remediated yet
    pub owner_remediation_pending: bool,
    /// A deletion timestamp is set
    pub deletion_requested: bool,
    /// Failure domain the machine was placed in
    pub failure_domain: Option<String>,
    /// Creation time, used to pick the oldest remediation candidate
    pub created_at: Option<DateTime<Utc>>,
    /// A node backs this machine (the instance is confirmed running)
    pub has_node_ref: bool,
}

impl Replica {
    /// Whether the replica still belongs to the active fleet
    pub fn is_active(&self) -> bool {
        !self.deletion_requested && !self.phase.is_terminating()
    }

    /// Unhealthy and acknowledged by the owner, so eligible for remediation
    pub fn needs_remediation(&self) -> bool {
        !self.healthy && self.owner_remediation_pending
    }

    /// Read a replica out of a serialized CAPI Machine
    pub fn from_machine_object(machine: &Value) -> Self {
        let str_at = |pointer: &str| machine.pointer(pointer).and_then(Value::as_str);

        let condition_false = |type_: &str| {
            machine
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .any(|c| {
                    c.get("type").and_then(Value::as_str) == Some(type_)
                        && c.get("status").and_then(Value::as_str) == Some("False")
                })
        };

        Replica {
            name: str_at("/metadata/name").unwrap_or_default().to_string(),
            version: str_at("/spec/version").unwrap_or_default().to_string(),
            phase: MachinePhase::parse(str_at("/status/phase").unwrap_or("Pending")),
            healthy: !condition_false(HEALTH_CHECK_SUCCEEDED_CONDITION),
            owner_remediation_pending: condition_false(OWNER_REMEDIATED_CONDITION),
            deletion_requested: machine.pointer("/metadata/deletionTimestamp").is_some(),
            failure_domain: str_at("/spec/failureDomain")
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            created_at: str_at("/metadata/creationTimestamp")
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            has_node_ref: machine.pointer("/status/nodeRef").is_some(),
        }
    }
}
