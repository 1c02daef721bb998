//! Unit tests for replica status computation

use k0s_controlplane_operator::controller::{
    Error, MachineStatusComputer, PlanStatusComputer, ReplicaStatusComputer,
};
use k0s_controlplane_operator::crd::{
    CommandState, K0sControlPlaneStatus, K0sUpdateCommand, MachinePhase, PlanCommand, PlanState,
    UpdatePlan,
};

use crate::common::*;

mod plan_status_tests {
    use super::*;

    const DESIRED: &str = "v1.31.2+k0s.0";

    #[test]
    fn test_completed_plan_marks_all_updated() {
        let plan = k0s_update_plan(
            PlanState::Completed,
            "v1.31.2+k0s.0",
            &[("cp-0", CommandState::Completed)],
        );
        let mut status = K0sControlPlaneStatus {
            replicas: 3,
            ready_replicas: 2,
            unavailable_replicas: 1,
            version: "v1.30.4+k0s.0".to_string(),
            ..Default::default()
        };

        PlanStatusComputer::new(&plan, DESIRED).compute(&mut status).unwrap();

        assert_eq!(status.updated_replicas, 3);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.unavailable_replicas, 1);
        assert_eq!(status.version, DESIRED);
    }

    #[test]
    fn test_completed_plan_takes_desired_suffix() {
        let plan = k0s_update_plan(PlanState::Completed, "v1.31.2", &[]);
        let mut status = status_with_replicas(3);

        PlanStatusComputer::new(&plan, DESIRED)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.version, DESIRED);
    }

    #[test]
    fn test_completed_plan_for_other_version_is_ignored() {
        let plan = k0s_update_plan(PlanState::Completed, "v1.30.4+k0s.0", &[]);
        let mut status = K0sControlPlaneStatus {
            replicas: 3,
            ready_replicas: 3,
            version: "v1.30.4+k0s.0".to_string(),
            ..Default::default()
        };
        let before = status.clone();

        PlanStatusComputer::new(&plan, DESIRED)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status, before);
    }

    #[test]
    fn test_schedulable_wait_tallies_targets() {
        let plan = k0s_update_plan(
            PlanState::SchedulableWait,
            "v1.31.2+k0s.0",
            &[
                ("cp-0", CommandState::Completed),
                ("cp-1", CommandState::Sent),
                ("cp-2", CommandState::Sent),
                ("cp-3", CommandState::Pending),
            ],
        );
        let mut status = status_with_replicas(4);

        let result = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert!(matches!(result, Err(Error::UpgradeNotCompleted)));
        assert_eq!(status.replicas, 4);
        assert_eq!(status.updated_replicas, 1);
        assert_eq!(status.ready_replicas, 3);
        assert_eq!(status.unavailable_replicas, 1);
    }

    #[test]
    fn test_failed_target_counts_as_unavailable() {
        let plan = k0s_update_plan(
            PlanState::SchedulableWait,
            "v1.31.2+k0s.0",
            &[
                ("cp-0", CommandState::Failed),
                ("cp-1", CommandState::Completed),
            ],
        );
        let mut status = status_with_replicas(2);

        let _ = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert_eq!(status.unavailable_replicas, 1);
        assert_eq!(status.ready_replicas, 1);
        assert_eq!(status.updated_replicas, 1);
    }

    #[test]
    fn test_targets_beyond_the_fleet_are_clamped() {
        // cp-2 was removed after the plan was posted
        let plan = k0s_update_plan(
            PlanState::SchedulableWait,
            DESIRED,
            &[
                ("cp-0", CommandState::Sent),
                ("cp-1", CommandState::Sent),
                ("cp-2", CommandState::Sent),
            ],
        );
        let mut status = status_with_replicas(2);

        let result = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert!(matches!(result, Err(Error::UpgradeNotCompleted)));
        assert_eq!(status.replicas, 2);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.unavailable_replicas, 0);
        assert_eq!(status.updated_replicas, 0);
    }

    #[test]
    fn test_unavailable_targets_fill_only_the_remaining_fleet() {
        let plan = k0s_update_plan(
            PlanState::SchedulableWait,
            DESIRED,
            &[
                ("cp-0", CommandState::Completed),
                ("cp-1", CommandState::Failed),
                ("cp-2", CommandState::Failed),
            ],
        );
        let mut status = status_with_replicas(2);

        let _ = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert_eq!(status.ready_replicas, 1);
        assert_eq!(status.updated_replicas, 1);
        assert_eq!(status.unavailable_replicas, 1);
    }

    #[test]
    fn test_pending_plan_leaves_counters() {
        let plan = k0s_update_plan(
            PlanState::Pending,
            "v1.31.2+k0s.0",
            &[("cp-0", CommandState::Pending)],
        );
        let mut status = status_with_replicas(1);
        let before = status.clone();

        let result = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert!(matches!(result, Err(Error::UpgradeNotCompleted)));
        assert_eq!(status, before);
    }

    #[test]
    fn test_unsupported_state_leaves_status_untouched() {
        let plan = k0s_update_plan(
            PlanState::MissingSignalNode,
            "v1.31.2+k0s.0",
            &[("cp-0", CommandState::Completed)],
        );
        let mut status = status_with_replicas(3);
        let before = status.clone();

        let result = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert!(matches!(result, Err(Error::UnsupportedPlanState(_))));
        assert_eq!(status, before);
    }

    #[test]
    fn test_multiple_commands_rejected() {
        let command = PlanCommand::K0sUpdate(K0sUpdateCommand {
            version: "v1.31.2+k0s.0".to_string(),
            targets: Vec::new(),
        });
        let plan = UpdatePlan {
            id: "id-kcp-v1.31.2+k0s.0".to_string(),
            state: PlanState::Completed,
            commands: vec![command.clone(), command],
        };
        let mut status = status_with_replicas(3);
        let before = status.clone();

        let result = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);

        assert!(matches!(result, Err(Error::UnsupportedPlanShape(_))));
        assert_eq!(status, before);
    }

    #[test]
    fn test_non_update_command_rejected() {
        let plan = UpdatePlan {
            id: "x".to_string(),
            state: PlanState::Completed,
            commands: vec![PlanCommand::Unsupported("airgapupdate".to_string())],
        };
        let mut status = status_with_replicas(1);

        let result = PlanStatusComputer::new(&plan, DESIRED).compute(&mut status);
        assert!(matches!(result, Err(Error::UnsupportedPlanShape(_))));
    }
}

mod machine_status_tests {
    use super::*;

    const DESIRED: &str = "v1.31.2+k0s.0";

    #[test]
    fn test_counts_running_and_provisioned() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0").build(),
            ReplicaBuilder::running("cp-1")
                .with_phase(MachinePhase::Provisioned)
                .with_version("v1.31.2")
                .build(),
            ReplicaBuilder::running("cp-2")
                .with_phase(MachinePhase::Provisioning)
                .build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.unavailable_replicas, 1);
        assert_eq!(status.updated_replicas, 3);
        assert_eq!(status.version, DESIRED);
    }

    #[test]
    fn test_missing_replicas_are_not_unavailable() {
        // Three desired, two observed: the absent one is not counted anywhere
        let replicas = vec![
            ReplicaBuilder::running("cp-0").build(),
            ReplicaBuilder::running("cp-1")
                .with_version("v1.30.4+k0s.0")
                .build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.replicas, 2);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.unavailable_replicas, 0);
        assert_eq!(status.updated_replicas, 1);
        assert_eq!(status.version, "v1.30.4+k0s.0");
    }

    #[test]
    fn test_provisioned_is_not_ready_with_worker_role() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0")
                .with_phase(MachinePhase::Provisioned)
                .build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, true)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.ready_replicas, 0);
        assert_eq!(status.unavailable_replicas, 1);
    }

    #[test]
    fn test_terminating_replicas_only_count_as_observed() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0").build(),
            ReplicaBuilder::running("cp-1")
                .with_phase(MachinePhase::Deleting)
                .with_version("v1.30.0")
                .build(),
            ReplicaBuilder::running("cp-2")
                .with_phase(MachinePhase::Deleted)
                .build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 1);
        assert_eq!(status.unavailable_replicas, 0);
        assert_eq!(status.updated_replicas, 1);
        // The deleting replica's older version does not drag the fleet version down
        assert_eq!(status.version, DESIRED);
    }

    #[test]
    fn test_lowest_version_gets_desired_suffix() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0").build(),
            ReplicaBuilder::running("cp-1").with_version("v1.30.4").build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.version, "v1.30.4+k0s.0");
        assert_eq!(status.updated_replicas, 1);
    }

    #[test]
    fn test_replicas_without_version_are_skipped() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0").with_version("").build(),
            ReplicaBuilder::running("cp-1").build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.updated_replicas, 1);
        assert_eq!(status.version, DESIRED);
    }

    #[test]
    fn test_empty_fleet() {
        let mut status = K0sControlPlaneStatus {
            version: "v1.30.0".to_string(),
            ..Default::default()
        };

        MachineStatusComputer::new(&[], DESIRED, false)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.replicas, 0);
        assert_eq!(status.version, "");
    }

    #[test]
    fn test_known_version_is_kept_when_asked() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0")
                .with_version("v1.30.4+k0s.0")
                .build(),
        ];
        let mut status = K0sControlPlaneStatus {
            version: DESIRED.to_string(),
            ..Default::default()
        };

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .keep_known_version(true)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.version, DESIRED);
        assert_eq!(status.replicas, 1);
        assert_eq!(status.updated_replicas, 0);
    }

    #[test]
    fn test_unknown_version_is_filled_even_when_kept() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0")
                .with_version("v1.30.4+k0s.0")
                .build(),
        ];
        let mut status = K0sControlPlaneStatus::default();

        MachineStatusComputer::new(&replicas, DESIRED, false)
            .keep_known_version(true)
            .compute(&mut status)
            .unwrap();

        assert_eq!(status.version, "v1.30.4+k0s.0");
    }

    #[test]
    fn test_malformed_version_leaves_status_untouched() {
        let replicas = vec![
            ReplicaBuilder::running("cp-0").build(),
            ReplicaBuilder::running("cp-1").with_version("latest").build(),
        ];
        let mut status = K0sControlPlaneStatus {
            replicas: 5,
            ready_replicas: 4,
            version: "v1.30.0".to_string(),
            ..Default::default()
        };
        let before = status.clone();

        let result = MachineStatusComputer::new(&replicas, DESIRED, false).compute(&mut status);

        assert!(matches!(result, Err(Error::InvalidVersion(_))));
        assert_eq!(status, before);
    }
}
