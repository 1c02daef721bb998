//! Fleet counters computed from replicas or from an update plan
//!
//! Both computers fill the replica counters and the version of a
//! `K0sControlPlaneStatus`. A computer that returns an invariant violation
//! leaves the status exactly as it was passed in.

use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::controller::version;
use crate::crd::{
    CommandState, K0sControlPlaneStatus, MachinePhase, PlanCommand, PlanState, Replica,
    UpdatePlan,
};

/// Computes fleet counters for one update strategy
pub trait ReplicaStatusComputer: Send + Sync {
    fn compute(&self, status: &mut K0sControlPlaneStatus) -> Result<()>;
}

/// Status derived from an in-flight or finished update plan
pub struct PlanStatusComputer<'a> {
    plan: &'a UpdatePlan,
    desired_version: &'a str,
}

impl<'a> PlanStatusComputer<'a> {
    pub fn new(plan: &'a UpdatePlan, desired_version: &'a str) -> Self {
        Self {
            plan,
            desired_version,
        }
    }

    fn k0s_update(&self) -> Result<&'a crate::crd::K0sUpdateCommand> {
        match self.plan.commands.as_slice() {
            [PlanCommand::K0sUpdate(update)] => Ok(update),
            [PlanCommand::Unsupported(kind)] => Err(Error::UnsupportedPlanShape(format!(
                "plan {} has unsupported command {:?}",
                self.plan.id, kind
            ))),
            commands => Err(Error::UnsupportedPlanShape(format!(
                "plan {} has {} commands, expected exactly one",
                self.plan.id,
                commands.len()
            ))),
        }
    }
}

impl ReplicaStatusComputer for PlanStatusComputer<'_> {
    fn compute(&self, status: &mut K0sControlPlaneStatus) -> Result<()> {
        let update = self.k0s_update()?;

        match &self.plan.state {
            // Autopilot has not reported yet, nothing to tally
            PlanState::Pending => Err(Error::UpgradeNotCompleted),
            PlanState::Completed => {
                // A plan finished for an older target says nothing about this one
                if version::equal(&update.version, self.desired_version)? {
                    status.version = version::align_suffix(&update.version, self.desired_version)?;
                    status.updated_replicas = status.replicas;
                }
                Ok(())
            }
            PlanState::SchedulableWait => {
                let mut ready = 0;
                let mut updated = 0;
                let mut unavailable = 0;

                for target in &update.targets {
                    match target.state {
                        CommandState::Completed => {
                            ready += 1;
                            updated += 1;
                        }
                        CommandState::Sent => ready += 1,
                        _ => unavailable += 1,
                    }
                }

                debug!(
                    plan = %self.plan.id,
                    ready, updated, unavailable,
                    "Update plan still converging"
                );

                // Targets are frozen when the plan is posted, so a replica
                // removed since then must not push the tally past the fleet
                let observed = status.replicas.max(0);
                let ready = ready.min(observed);

                // Progress is committed even though the pass reports the
                // upgrade as unfinished, so the status shows where it stands
                status.ready_replicas = ready;
                status.updated_replicas = updated.min(ready);
                status.unavailable_replicas = unavailable.min(observed - ready);

                Err(Error::UpgradeNotCompleted)
            }
            other => Err(Error::UnsupportedPlanState(other.to_string())),
        }
    }
}

/// Status derived from the lifecycle phase and version of each replica
pub struct MachineStatusComputer<'a> {
    replicas: &'a [Replica],
    desired_version: &'a str,
    worker_enabled: bool,
    keep_known_version: bool,
}

impl<'a> MachineStatusComputer<'a> {
    pub fn new(replicas: &'a [Replica], desired_version: &'a str, worker_enabled: bool) -> Self {
        Self {
            replicas,
            desired_version,
            worker_enabled,
            keep_known_version: false,
        }
    }

    /// Leave an already reported fleet version alone
    ///
    /// In-place updates never rewrite the Machine version, so once the fleet
    /// version is known only a completed update plan may move it.
    pub fn keep_known_version(mut self, keep: bool) -> Self {
        self.keep_known_version = keep;
        self
    }

    fn is_ready(&self, replica: &Replica) -> bool {
        match replica.phase {
            MachinePhase::Running => true,
            // With the worker role a controller only reaches Running once its
            // kubelet joins, so Provisioned means it is not serving yet
            MachinePhase::Provisioned => !self.worker_enabled,
            _ => false,
        }
    }
}

impl ReplicaStatusComputer for MachineStatusComputer<'_> {
    fn compute(&self, status: &mut K0sControlPlaneStatus) -> Result<()> {
        let mut ready = 0;
        let mut updated = 0;
        let mut unavailable = 0;
        let mut versions = Vec::new();

        for replica in self.replicas {
            if replica.phase.is_terminating() {
                continue;
            }

            if self.is_ready(replica) {
                ready += 1;
            } else {
                unavailable += 1;
            }

            if replica.version.is_empty() {
                continue;
            }
            if version::equal(&replica.version, self.desired_version)? {
                updated += 1;
            }
            versions.push(replica.version.as_str());
        }

        let lowest = match version::lowest(versions)? {
            Some(lowest) => version::align_suffix(lowest, self.desired_version)?,
            None => String::new(),
        };

        status.replicas = saturating_count(self.replicas.len());
        status.ready_replicas = ready;
        status.updated_replicas = updated;
        status.unavailable_replicas = unavailable;
        if !self.keep_known_version || status.version.is_empty() {
            status.version = lowest;
        }

        Ok(())
    }
}

/// Replica count as the i32 the status fields use, saturating on overflow
pub(crate) fn saturating_count(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}
