//! Update plan model for in-place upgrades
//!
//! Plans are owned by the k0s autopilot controller. The operator posts a plan
//! document and reads its status back; it never drives plan execution.

use serde::{Deserialize, Serialize};

/// API group/version of autopilot plans
pub const PLAN_API_VERSION: &str = "autopilot.k0sproject.io/v1beta2";

/// Kind of autopilot plans
pub const PLAN_KIND: &str = "Plan";

/// Autopilot only acts on the plan with this name
pub const PLAN_NAME: &str = "autopilot";

/// Overall state of a plan
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum PlanState {
    /// Posted but not yet picked up; no state reported
    Pending,
    /// Commands are being delivered to their targets
    SchedulableWait,
    /// A target node could not be found
    MissingSignalNode,
    /// Every target reported completion
    Completed,
    /// Any state the operator does not interpret
    Other(String),
}

impl PlanState {
    pub fn parse(state: &str) -> Self {
        match state {
            "" => PlanState::Pending,
            "SchedulableWait" => PlanState::SchedulableWait,
            "MissingSignalNode" => PlanState::MissingSignalNode,
            "Completed" => PlanState::Completed,
            other => PlanState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanState::Pending => write!(f, "Pending"),
            PlanState::SchedulableWait => write!(f, "SchedulableWait"),
            PlanState::MissingSignalNode => write!(f, "MissingSignalNode"),
            PlanState::Completed => write!(f, "Completed"),
            PlanState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Delivery state of a command on one target
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Sent,
    Completed,
    Failed,
    Other(String),
}

impl CommandState {
    /// Parse a target state; autopilot prefixes signal states with "Signal"
    pub fn parse(state: &str) -> Self {
        match state.strip_prefix("Signal").unwrap_or(state) {
            "Pending" => CommandState::Pending,
            "Sent" => CommandState::Sent,
            "Completed" => CommandState::Completed,
            "Failed" => CommandState::Failed,
            _ => CommandState::Other(state.to_string()),
        }
    }
}

/// One target node of a command
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlanTarget {
    pub name: String,
    pub state: CommandState,
}

/// A k0s version update across a set of controllers
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct K0sUpdateCommand {
    pub version: String,
    pub targets: Vec<PlanTarget>,
}

/// A plan command; only k0s updates are understood
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum PlanCommand {
    K0sUpdate(K0sUpdateCommand),
    Unsupported(String),
}

/// Snapshot of an update plan, read fresh on every pass
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UpdatePlan {
    /// Plan id, unique per target version
    pub id: String,
    pub state: PlanState,
    pub commands: Vec<PlanCommand>,
}

impl UpdatePlan {
    /// Build a plan snapshot from the JSON of an autopilot Plan object
    ///
    /// Spec commands define the shape; per-target states come from the
    /// matching status command when the controller has reported one.
    pub fn from_object(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawPlan = serde_json::from_value(value.clone())?;
        let status = raw.status.unwrap_or_default();

        let commands = raw
            .spec
            .commands
            .iter()
            .enumerate()
            .map(|(idx, cmd)| match &cmd.k0supdate {
                Some(update) => {
                    let reported = status
                        .commands
                        .get(idx)
                        .and_then(|c| c.k0supdate.as_ref())
                        .map(|u| u.controllers.as_slice())
                        .unwrap_or_default();

                    let targets = update
                        .targets
                        .controllers
                        .discovery
                        .static_nodes
                        .nodes
                        .iter()
                        .map(|name| PlanTarget {
                            name: name.clone(),
                            state: reported
                                .iter()
                                .find(|c| &c.name == name)
                                .map(|c| CommandState::parse(&c.state))
                                .unwrap_or(CommandState::Pending),
                        })
                        .collect();

                    PlanCommand::K0sUpdate(K0sUpdateCommand {
                        version: update.version.clone(),
                        targets,
                    })
                }
                None => PlanCommand::Unsupported(
                    cmd.other.keys().next().cloned().unwrap_or_default(),
                ),
            })
            .collect();

        Ok(Self {
            id: raw.spec.id,
            state: PlanState::parse(&status.state),
            commands,
        })
    }
}

// Wire shapes of the autopilot Plan object. Only the fields read above are
// modelled; everything else is ignored.

#[derive(Deserialize, Default)]
struct RawPlan {
    #[serde(default)]
    spec: RawPlanSpec,
    #[serde(default)]
    status: Option<RawPlanStatus>,
}

#[derive(Deserialize, Default)]
struct RawPlanSpec {
    #[serde(default)]
    id: String,
    #[serde(default)]
    commands: Vec<RawCommand>,
}

#[derive(Deserialize, Default)]
struct RawCommand {
    #[serde(default)]
    k0supdate: Option<RawK0sUpdate>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct RawK0sUpdate {
    #[serde(default)]
    version: String,
    #[serde(default)]
    targets: RawTargets,
}

#[derive(Deserialize, Default)]
struct RawTargets {
    #[serde(default)]
    controllers: RawTargetGroup,
}

#[derive(Deserialize, Default)]
struct RawTargetGroup {
    #[serde(default)]
    discovery: RawDiscovery,
}

#[derive(Deserialize, Default)]
struct RawDiscovery {
    #[serde(default, rename = "static")]
    static_nodes: RawStaticNodes,
}

#[derive(Deserialize, Default)]
struct RawStaticNodes {
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawPlanStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    commands: Vec<RawCommandStatus>,
}

#[derive(Deserialize, Default)]
struct RawCommandStatus {
    #[serde(default)]
    k0supdate: Option<RawK0sUpdateStatus>,
}

#[derive(Deserialize, Default)]
struct RawK0sUpdateStatus {
    #[serde(default)]
    controllers: Vec<RawNodeStatus>,
}

#[derive(Deserialize, Default)]
struct RawNodeStatus {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
}
