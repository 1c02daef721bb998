//! In-memory stand-ins for the management and workload clusters
//!
//! `FakeCluster` implements every collaborator trait over shared state and
//! records each write, so tests can drive a full reconcile pass and then
//! assert on what the operator did.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k0s_controlplane_operator::controller::{
    ControlPlaneClient, Error, ReplicaExecutor, Result, WorkloadClient,
};
use k0s_controlplane_operator::crd::{
    Condition, K0sControlPlaneStatus, OWNER_REMEDIATED_CONDITION, Replica, UpdatePlan,
};

/// A write the operator performed
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    PatchStatus(String),
    SetAnnotation(String, Option<String>),
    AddFinalizer(String),
    RemoveFinalizer(String),
    SetReplicaCondition(String, Condition),
    ClearReplicaCondition(String, String),
    DeleteReplica(String),
    PostUpdatePlan(serde_json::Value),
    MarkLeave(String),
}

#[derive(Default)]
pub struct FakeState {
    pub replicas: Vec<Replica>,
    pub plan: Option<UpdatePlan>,
    pub endpoint: Option<String>,
    pub api_reachable: bool,
    pub etcd_members: Vec<String>,
    pub live_versions: BTreeMap<String, String>,
    pub statuses: Vec<K0sControlPlaneStatus>,
    pub calls: Vec<Call>,
}

/// Shared fake of both clusters
#[derive(Clone, Default)]
pub struct FakeCluster {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// A reachable cluster with an endpoint and the given replicas
    pub fn with_replicas(replicas: Vec<Replica>) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            state.etcd_members = replicas.iter().map(|r| r.name.clone()).collect();
            state.replicas = replicas;
            state.endpoint = Some("10.0.0.1".to_string());
            state.api_reachable = true;
        }
        fake
    }

    pub fn set_plan(&self, plan: Option<UpdatePlan>) {
        self.state.lock().unwrap().plan = plan;
    }

    pub fn set_api_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().api_reachable = reachable;
    }

    pub fn set_endpoint(&self, endpoint: Option<&str>) {
        self.state.lock().unwrap().endpoint = endpoint.map(str::to_string);
    }

    pub fn set_live_version(&self, replica: &str, version: &str) {
        self.state
            .lock()
            .unwrap()
            .live_versions
            .insert(replica.to_string(), version.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Last status written
    pub fn last_status(&self) -> Option<K0sControlPlaneStatus> {
        self.state.lock().unwrap().statuses.last().cloned()
    }

    pub fn deleted_replicas(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteReplica(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ControlPlaneClient for FakeCluster {
    async fn list_replicas(&self, _namespace: &str, _cluster_name: &str) -> Result<Vec<Replica>> {
        Ok(self.state.lock().unwrap().replicas.clone())
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        status: &K0sControlPlaneStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statuses.push(status.clone());
        state.calls.push(Call::PatchStatus(name.to_string()));
        Ok(())
    }

    async fn set_annotation(
        &self,
        _namespace: &str,
        _name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<()> {
        self.record(Call::SetAnnotation(key.to_string(), value));
        Ok(())
    }

    async fn add_finalizer(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::AddFinalizer(name.to_string()));
        Ok(())
    }

    async fn remove_finalizer(&self, _namespace: &str, name: &str) -> Result<()> {
        self.record(Call::RemoveFinalizer(name.to_string()));
        Ok(())
    }

    async fn set_replica_condition(
        &self,
        _namespace: &str,
        replica: &str,
        condition: &Condition,
    ) -> Result<()> {
        self.record(Call::SetReplicaCondition(
            replica.to_string(),
            condition.clone(),
        ));
        Ok(())
    }

    async fn clear_replica_condition(
        &self,
        _namespace: &str,
        replica: &str,
        condition_type: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if condition_type == OWNER_REMEDIATED_CONDITION
            && let Some(r) = state.replicas.iter_mut().find(|r| r.name == replica)
        {
            r.owner_remediation_pending = false;
        }
        state.calls.push(Call::ClearReplicaCondition(
            replica.to_string(),
            condition_type.to_string(),
        ));
        Ok(())
    }

    async fn delete_replica(&self, _namespace: &str, replica: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(r) = state.replicas.iter_mut().find(|r| r.name == replica) {
            r.deletion_requested = true;
        }
        state.calls.push(Call::DeleteReplica(replica.to_string()));
        Ok(())
    }

    async fn control_plane_endpoint(
        &self,
        _namespace: &str,
        _cluster_name: &str,
    ) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().endpoint.clone())
    }
}

#[async_trait]
impl WorkloadClient for FakeCluster {
    async fn probe_api(&self, _namespace: &str, _cluster_name: &str) -> Result<()> {
        if self.state.lock().unwrap().api_reachable {
            Ok(())
        } else {
            Err(Error::ApiUnreachable("connection refused".to_string()))
        }
    }

    async fn get_update_plan(
        &self,
        _namespace: &str,
        _cluster_name: &str,
    ) -> Result<Option<UpdatePlan>> {
        Ok(self.state.lock().unwrap().plan.clone())
    }

    async fn post_update_plan(
        &self,
        _namespace: &str,
        _cluster_name: &str,
        plan: &serde_json::Value,
    ) -> Result<()> {
        let parsed = UpdatePlan::from_object(plan)?;
        let mut state = self.state.lock().unwrap();
        state.plan = Some(parsed);
        state.calls.push(Call::PostUpdatePlan(plan.clone()));
        Ok(())
    }

    async fn mark_leave(&self, _namespace: &str, _cluster_name: &str, replica: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.etcd_members.iter().position(|m| m == replica) else {
            return Err(Error::NotFound(format!("etcd member {}", replica)));
        };
        state.etcd_members.remove(idx);
        state.calls.push(Call::MarkLeave(replica.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ReplicaExecutor for FakeCluster {
    async fn exec(&self, _namespace: &str, replica: &str, command: Vec<String>) -> Result<String> {
        assert_eq!(command, vec!["k0s".to_string(), "version".to_string()]);
        self.state
            .lock()
            .unwrap()
            .live_versions
            .get(replica)
            .map(|v| format!("{}\n", v))
            .ok_or_else(|| Error::ExecFailed(format!("no pod for {}", replica)))
    }
}
