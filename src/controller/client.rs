//! Collaborators the controller talks to
//!
//! The management cluster holds the K0sControlPlane and its CAPI Machines.
//! The workload cluster is the control plane being managed; it serves the
//! API the readiness probe hits, runs autopilot plans and owns etcd
//! membership. Each collaborator is a trait so the decision logic can be
//! tested without a cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::{
    Api, ApiResource, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
    Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::crd::{
    CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, Condition, K0sControlPlane, K0sControlPlaneStatus,
    PLAN_KIND, PLAN_NAME, Replica, UpdatePlan,
};

/// Field manager name for patches
pub const FIELD_MANAGER: &str = "k0s-controlplane-operator";

/// Finalizer guarding the explicit cascade of replica deletion
pub const FINALIZER: &str = "controlplane.cluster.x-k8s.io/k0s-controlplane";

/// Label selector matching the control-plane machines of a cluster
pub fn replica_selector(cluster_name: &str) -> String {
    format!("{}={},{}", CLUSTER_NAME_LABEL, cluster_name, CONTROL_PLANE_LABEL)
}

/// Operations on the management cluster's declarative store
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// List the control-plane replicas of a cluster
    async fn list_replicas(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Replica>>;

    /// Patch the status subresource of a K0sControlPlane
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &K0sControlPlaneStatus,
    ) -> Result<()>;

    /// Set (`Some`) or remove (`None`) an annotation on a K0sControlPlane
    async fn set_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<()>;

    /// Add the operator finalizer to a K0sControlPlane
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<()>;

    /// Remove the operator finalizer from a K0sControlPlane
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()>;

    /// Upsert a condition on a replica's machine
    async fn set_replica_condition(
        &self,
        namespace: &str,
        replica: &str,
        condition: &Condition,
    ) -> Result<()>;

    /// Remove a condition type from a replica's machine
    async fn clear_replica_condition(
        &self,
        namespace: &str,
        replica: &str,
        condition_type: &str,
    ) -> Result<()>;

    /// Delete a replica's machine; its infrastructure instance goes with it
    async fn delete_replica(&self, namespace: &str, replica: &str) -> Result<()>;

    /// Host of the cluster's control-plane endpoint, once one is assigned
    async fn control_plane_endpoint(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Option<String>>;
}

/// Operations against the managed (workload) cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Succeeds when the workload API answers a read
    async fn probe_api(&self, namespace: &str, cluster_name: &str) -> Result<()>;

    /// Current update plan, if one exists
    async fn get_update_plan(&self, namespace: &str, cluster_name: &str)
    -> Result<Option<UpdatePlan>>;

    /// Post an update plan document, replacing a plan with a different id
    async fn post_update_plan(
        &self,
        namespace: &str,
        cluster_name: &str,
        plan: &serde_json::Value,
    ) -> Result<()>;

    /// Ask the consensus group to drop a member; a missing member is not an error
    async fn mark_leave(&self, namespace: &str, cluster_name: &str, replica: &str) -> Result<()>;
}

/// Runs commands on a replica
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplicaExecutor: Send + Sync {
    /// Run `command` on the replica and return its stdout
    async fn exec(&self, namespace: &str, replica: &str, command: Vec<String>) -> Result<String>;
}

fn machine_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("cluster.x-k8s.io", "v1beta1", "Machine"))
}

fn cluster_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("cluster.x-k8s.io", "v1beta1", "Cluster"))
}

fn plan_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "autopilot.k0sproject.io",
        "v1beta2",
        PLAN_KIND,
    ))
}

fn etcd_member_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "etcd.k0sproject.io",
        "v1beta1",
        "EtcdMember",
    ))
}

/// Finalizer list with this operator's entry added or removed
///
/// Returns `None` when the list already has the wanted shape.
fn edit_finalizers(existing: &[String], present: bool) -> Option<Vec<String>> {
    let has = existing.iter().any(|f| f == FINALIZER);
    match (present, has) {
        (true, false) => {
            let mut finalizers = existing.to_vec();
            finalizers.push(FINALIZER.to_string());
            Some(finalizers)
        }
        (false, true) => Some(
            existing
                .iter()
                .filter(|f| f.as_str() != FINALIZER)
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

/// Real management-cluster client
pub struct KubeControlPlaneClient {
    client: Client,
}

impl KubeControlPlaneClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machines(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &machine_resource())
    }

    fn control_planes(&self, namespace: &str) -> Api<K0sControlPlane> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Rewrite a machine's condition list through the status subresource
    async fn update_machine_conditions<F>(&self, namespace: &str, replica: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<serde_json::Value>) + Send,
    {
        let api = self.machines(namespace);
        let machine = api.get(replica).await?;

        let mut conditions = machine
            .data
            .get("status")
            .and_then(|s| s.get("conditions"))
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();
        f(&mut conditions);

        let patch = serde_json::json!({ "status": { "conditions": conditions } });
        api.patch_status(replica, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Add or drop this operator's finalizer, leaving other entries alone
    ///
    /// The patch carries the observed resourceVersion so a concurrent edit of
    /// the list conflicts. Returns whether anything changed.
    async fn update_finalizers(&self, namespace: &str, name: &str, present: bool) -> Result<bool> {
        let api = self.control_planes(namespace);
        let kcp = api.get(name).await?;

        let Some(finalizers) = edit_finalizers(kcp.finalizers(), present) else {
            debug!("Finalizer on {} already up to date", name);
            return Ok(false);
        };

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": kcp.resource_version(),
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlaneClient {
    async fn list_replicas(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Replica>> {
        let selector = replica_selector(cluster_name);
        let machines = self
            .machines(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;

        machines
            .items
            .iter()
            .map(|m| Ok(Replica::from_machine_object(&serde_json::to_value(m)?)))
            .collect()
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &K0sControlPlaneStatus,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.control_planes(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<()> {
        // A null value removes the key under merge-patch semantics
        let patch = serde_json::json!({ "metadata": { "annotations": { key: value } } });
        self.control_planes(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        if self.update_finalizers(namespace, name, true).await? {
            info!("Added finalizer to {}", name);
        }
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        if self.update_finalizers(namespace, name, false).await? {
            info!("Removed finalizer from {}", name);
        }
        Ok(())
    }

    async fn set_replica_condition(
        &self,
        namespace: &str,
        replica: &str,
        condition: &Condition,
    ) -> Result<()> {
        let value = serde_json::to_value(condition)?;
        let type_ = condition.type_.clone();
        self.update_machine_conditions(namespace, replica, move |conditions| {
            match conditions
                .iter_mut()
                .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(type_.as_str()))
            {
                Some(existing) => *existing = value,
                None => conditions.push(value),
            }
        })
        .await
    }

    async fn clear_replica_condition(
        &self,
        namespace: &str,
        replica: &str,
        condition_type: &str,
    ) -> Result<()> {
        let type_ = condition_type.to_string();
        self.update_machine_conditions(namespace, replica, move |conditions| {
            conditions.retain(|c| c.get("type").and_then(|t| t.as_str()) != Some(type_.as_str()));
        })
        .await
    }

    async fn delete_replica(&self, namespace: &str, replica: &str) -> Result<()> {
        let result = self
            .machines(namespace)
            .delete(replica, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(result)?;
        debug!("Requested deletion of machine {}", replica);
        Ok(())
    }

    async fn control_plane_endpoint(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Option<String>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &cluster_resource());
        let Some(cluster) = api.get_opt(cluster_name).await? else {
            return Ok(None);
        };

        Ok(cluster
            .data
            .get("spec")
            .and_then(|s| s.get("controlPlaneEndpoint"))
            .and_then(|e| e.get("host"))
            .and_then(|h| h.as_str())
            .filter(|h| !h.is_empty())
            .map(str::to_string))
    }
}

/// Real workload-cluster client
///
/// Connects through the CAPI kubeconfig secret `<cluster>-kubeconfig` on
/// every call, so nothing about the workload cluster outlives a pass.
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn connect(&self, namespace: &str, cluster_name: &str) -> Result<Client> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret_name = format!("{}-kubeconfig", cluster_name);
        let secret = secrets
            .get_opt(&secret_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("secret {}/{}", namespace, secret_name)))?;

        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get("value"))
            .ok_or_else(|| Error::NotFound(format!("kubeconfig in secret {}", secret_name)))?;
        let yaml = String::from_utf8_lossy(&raw.0);

        let kubeconfig = Kubeconfig::from_yaml(&yaml)
            .map_err(|e| Error::TransientError(format!("invalid kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::TransientError(format!("invalid kubeconfig: {}", e)))?;

        Ok(Client::try_from(config)?)
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn probe_api(&self, namespace: &str, cluster_name: &str) -> Result<()> {
        let client = self.connect(namespace, cluster_name).await?;
        let namespaces: Api<Namespace> = Api::all(client);
        namespaces
            .get("kube-system")
            .await
            .map_err(|e| Error::ApiUnreachable(e.to_string()))?;
        Ok(())
    }

    async fn get_update_plan(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Option<UpdatePlan>> {
        let client = self.connect(namespace, cluster_name).await?;
        let plans: Api<DynamicObject> = Api::all_with(client, &plan_resource());

        match plans.get_opt(PLAN_NAME).await? {
            Some(plan) => Ok(Some(UpdatePlan::from_object(&serde_json::to_value(&plan)?)?)),
            None => Ok(None),
        }
    }

    async fn post_update_plan(
        &self,
        namespace: &str,
        cluster_name: &str,
        plan: &serde_json::Value,
    ) -> Result<()> {
        let client = self.connect(namespace, cluster_name).await?;
        let plans: Api<DynamicObject> = Api::all_with(client, &plan_resource());

        // Autopilot only runs the plan named "autopilot", so an older plan
        // has to go before a new one can be posted
        if let Some(existing) = plans.get_opt(PLAN_NAME).await? {
            let existing_id = existing.data.pointer("/spec/id").and_then(|v| v.as_str());
            let new_id = plan.pointer("/spec/id").and_then(|v| v.as_str());
            if existing_id == new_id {
                return Ok(());
            }
            ignore_not_found(
                plans
                    .delete(PLAN_NAME, &DeleteParams::default())
                    .await
                    .map(|_| ()),
            )?;
        }

        let object: DynamicObject = serde_json::from_value(plan.clone())?;
        plans.create(&PostParams::default(), &object).await?;
        info!(cluster = %cluster_name, "Posted update plan");
        Ok(())
    }

    async fn mark_leave(&self, namespace: &str, cluster_name: &str, replica: &str) -> Result<()> {
        let client = self.connect(namespace, cluster_name).await?;
        let members: Api<DynamicObject> = Api::all_with(client, &etcd_member_resource());

        let patch = serde_json::json!({ "spec": { "leave": true } });
        let result = members
            .patch(replica, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map(|_| ());
        ignore_not_found(result)?;
        debug!(replica = %replica, "Marked etcd member to leave");
        Ok(())
    }
}

/// Executes commands in the pod backing a replica (hosted control planes)
pub struct PodExecutor {
    client: Client,
}

impl PodExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| Error::ExecFailed(e.to_string()))?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

#[async_trait]
impl ReplicaExecutor for PodExecutor {
    async fn exec(&self, namespace: &str, replica: &str, command: Vec<String>) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let attach_params = AttachParams {
            stdin: true,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached = pods
            .exec(replica, command, &attach_params)
            .await
            .map_err(|e| Error::ExecFailed(e.to_string()))?;

        if let Some(mut stdin) = attached.stdin() {
            stdin
                .shutdown()
                .await
                .map_err(|e| Error::ExecFailed(e.to_string()))?;
        }

        let stdout = attached
            .stdout()
            .ok_or_else(|| Error::ExecFailed("Failed to get stdout from exec".to_string()))?;
        let output = read_stream(stdout).await?;

        let status = attached
            .take_status()
            .ok_or_else(|| Error::ExecFailed("Failed to get status from exec".to_string()))?;
        if let Some(status) = status.await
            && status.status != Some("Success".to_string())
        {
            return Err(Error::ExecFailed(format!(
                "command failed on {}: {:?}",
                replica, status.message
            )));
        }

        Ok(output)
    }
}
