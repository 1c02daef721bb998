pub mod client;
pub mod context;
pub mod error;
pub mod failure_domain;
pub mod fleet_lock;
pub mod reconciler;
pub mod remediation;
pub mod replica_status;
pub mod status;
pub mod validation;
pub mod version;

pub use client::{
    ControlPlaneClient, FINALIZER, KubeControlPlaneClient, KubeWorkloadClient, PodExecutor,
    ReplicaExecutor, WorkloadClient, replica_selector,
};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use failure_domain::FailureDomainStats;
pub use fleet_lock::FleetLocks;
pub use reconciler::{error_policy, reconcile};
pub use remediation::{
    BlockReason, RemediationDecision, RemediationEngine, RemediationInput, RemediationPlan,
    SkipReason, plan_remediation,
};
pub use replica_status::{MachineStatusComputer, PlanStatusComputer, ReplicaStatusComputer};
pub use status::{ConditionBuilder, StatusAggregator, computers_for, spec_changed};
pub use validation::validate_spec;
