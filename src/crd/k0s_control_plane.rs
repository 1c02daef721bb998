use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation marking that a remediation is in flight for the fleet
pub const REMEDIATION_IN_PROGRESS_ANNOTATION: &str =
    "controlplane.cluster.x-k8s.io/remediation-in-progress";

/// Label carrying the owning CAPI cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking a machine as a control-plane member
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// K0sControlPlane is the Schema for the k0scontrolplanes API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "K0sControlPlane",
    plural = "k0scontrolplanes",
    shortname = "kcp",
    namespaced,
    status = "K0sControlPlaneStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Updated", "type":"integer", "jsonPath":".status.updatedReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct K0sControlPlaneSpec {
    /// Desired number of control-plane replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Desired k0s version (e.g., "v1.31.2+k0s.0")
    pub version: String,

    /// How replicas move to a new version
    #[serde(default)]
    pub update_strategy: UpdateStrategy,

    /// Whether controllers also run the worker role
    #[serde(default)]
    pub worker_enabled: bool,

    /// Known failure domains, in placement preference order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_domains: Vec<String>,
}

fn default_replicas() -> i32 {
    1
}

/// Update strategy for version changes
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Upgrade replicas in place through an orchestrated update plan
    #[default]
    InPlace,
    /// Replace replicas with new machines at the desired version
    Recreate,
}

impl std::fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateStrategy::InPlace => write!(f, "InPlace"),
            UpdateStrategy::Recreate => write!(f, "Recreate"),
        }
    }
}

/// Status of the K0sControlPlane
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct K0sControlPlaneStatus {
    /// Number of observed replicas
    #[serde(default)]
    pub replicas: i32,

    /// Replicas serving the control plane
    #[serde(default)]
    pub ready_replicas: i32,

    /// Replicas running the desired version
    #[serde(default)]
    pub updated_replicas: i32,

    /// Replicas observed but not serving
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Lowest version running across the fleet
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Label selector for the fleet's replicas
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,

    /// Whether the control plane API is reachable and serving
    #[serde(default)]
    pub ready: bool,

    /// Whether the control plane ever became ready
    #[serde(default)]
    pub initialized: bool,

    /// Failure domain the next replica should be placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_failure_domain: Option<String>,

    /// Observed generation of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl K0sControlPlane {
    /// Whether the remediation lock annotation is set
    pub fn remediation_in_progress(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(REMEDIATION_IN_PROGRESS_ANNOTATION))
            .is_some_and(|v| v == "true")
    }

    /// Name of the CAPI cluster that owns this control plane
    ///
    /// Falls back to the resource name when the cluster-name label is absent.
    pub fn cluster_name(&self) -> String {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CLUSTER_NAME_LABEL))
            .cloned()
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }
}
