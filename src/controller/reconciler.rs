//! Reconciliation logic for K0sControlPlane resources
//!
//! One pass observes the replicas and the update plan, writes the aggregated
//! status, and then runs remediation. Passes for the same fleet are
//! serialized through the fleet locks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::client::FINALIZER;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::failure_domain::FailureDomainStats;
use crate::controller::fleet_lock::fleet_key;
use crate::controller::remediation::{
    RemediationDecision, RemediationEngine, RemediationInput, lock_releasable, plan_remediation,
};
use crate::controller::replica_status::saturating_count;
use crate::controller::status::{ConditionBuilder, StatusAggregator, reasons, wait_for_endpoint};
use crate::controller::validation::validate_spec;
use crate::crd::{K0sControlPlane, K0sControlPlaneStatus, Replica, UpdatePlan, UpdateStrategy};
use crate::resources::update_plan::{generate_update_plan, plan_id};

/// Requeue delay while a fleet is still short of replicas or not serving
const UNSETTLED_REQUEUE: Duration = Duration::from_secs(10);

/// Main reconciliation function
#[instrument(skip(kcp, ctx), fields(name = %kcp.name_any(), namespace = kcp.namespace().unwrap_or_default()))]
pub async fn reconcile(kcp: Arc<K0sControlPlane>, ctx: Arc<Context>) -> Result<Action> {
    let ns = kcp.namespace().unwrap_or_default();
    let name = kcp.name_any();
    let start = Instant::now();

    let _guard = ctx.fleet_locks.acquire(&fleet_key(&ns, &name)).await;

    let result = reconcile_fleet(&kcp, &ctx, &ns).await;
    match &result {
        Ok(_) => ctx.record_reconcile(&ns, &name, start.elapsed().as_secs_f64()),
        Err(e) => {
            ctx.record_error(&ns, &name);
            if !e.is_not_found() {
                error!("Reconciliation failed: {}", e);
            }
        }
    }
    result
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(kcp: Arc<K0sControlPlane>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = kcp.name_any();
    let delay = ctx.backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

async fn reconcile_fleet(kcp: &K0sControlPlane, ctx: &Context, ns: &str) -> Result<Action> {
    let name = kcp.name_any();

    if kcp.metadata.deletion_timestamp.is_some() {
        return handle_deletion(kcp, ctx, ns).await;
    }

    if !has_finalizer(kcp) {
        ctx.client.add_finalizer(ns, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if let Err(e) = validate_spec(kcp) {
        let reason = match &e {
            Error::InvalidVersion(_) | Error::VersionSkew { .. } => reasons::INVALID_VERSION,
            _ => "InvalidSpec",
        };
        report_not_ready(kcp, ctx, ns, reason, &e.to_string()).await?;
        return Err(e);
    }

    let cluster_name = kcp.cluster_name();
    let initialized = kcp.status.as_ref().is_some_and(|s| s.initialized);

    if !initialized {
        match wait_for_endpoint(
            ctx.client.as_ref(),
            ns,
            &cluster_name,
            ctx.config.endpoint_poll_interval,
            ctx.config.endpoint_wait_timeout,
            &ctx.shutdown,
        )
        .await
        {
            Ok(host) => debug!(endpoint = %host, "Control plane endpoint assigned"),
            Err(Error::Timeout(msg)) => {
                info!("{}", msg);
                report_not_ready(kcp, ctx, ns, reasons::WAITING_FOR_ENDPOINT, &msg).await?;
                return Ok(Action::requeue(UNSETTLED_REQUEUE));
            }
            Err(e) => return Err(e),
        }
    }

    let replicas = ctx.client.list_replicas(ns, &cluster_name).await?;
    debug!(count = replicas.len(), "Observed replicas");

    let plan = match kcp.spec.update_strategy {
        UpdateStrategy::InPlace => current_plan(kcp, ctx, ns, &cluster_name, &replicas).await?,
        UpdateStrategy::Recreate => None,
    };

    let aggregator = StatusAggregator::new(kcp, &replicas, plan.as_ref());
    let outcome = aggregator
        .aggregate(
            ctx.workload.as_ref(),
            ctx.executor.as_deref(),
            ctx.config.api_probe_timeout,
        )
        .await;

    let mut status = outcome.status;
    status.next_failure_domain = next_failure_domain(kcp, &replicas);

    ctx.client.patch_status(ns, &name, &status).await?;
    record_fleet_metrics(ctx, ns, &name, kcp.spec.replicas, &status);

    let upgrading = match outcome.error {
        None => false,
        Some(Error::UpgradeNotCompleted) => true,
        Some(e) => return Err(e),
    };

    remediate(kcp, ctx, ns, &cluster_name, &replicas, status.ready).await?;

    if upgrading {
        debug!("Upgrade still converging");
        return Ok(Action::requeue(ctx.backoff.convergence_delay));
    }

    let settled = status.ready && status.replicas == kcp.spec.replicas;
    if settled {
        Ok(Action::requeue(ctx.config.resync_interval))
    } else {
        Ok(Action::requeue(UNSETTLED_REQUEUE))
    }
}

/// Update plan relevant to the desired version, posting one when the fleet lags behind
async fn current_plan(
    kcp: &K0sControlPlane,
    ctx: &Context,
    ns: &str,
    cluster_name: &str,
    replicas: &[Replica],
) -> Result<Option<UpdatePlan>> {
    let desired = &kcp.spec.version;
    let expected_id = plan_id(cluster_name, desired);

    let existing = match ctx.workload.get_update_plan(ns, cluster_name).await {
        Ok(plan) => plan,
        Err(e) => {
            // The workload API may simply not be up yet
            warn!(error = %e, "Failed to read update plan");
            return Ok(None);
        }
    };

    if let Some(plan) = existing.filter(|p| p.id == expected_id) {
        return Ok(Some(plan));
    }

    let current = kcp
        .status
        .as_ref()
        .map(|s| s.version.as_str())
        .unwrap_or_default();
    if current.is_empty() || crate::controller::version::equal(current, desired)? {
        return Ok(None);
    }

    let targets: Vec<String> = replicas
        .iter()
        .filter(|r| r.is_active())
        .map(|r| r.name.clone())
        .collect();

    let document = match generate_update_plan(cluster_name, current, desired, &targets) {
        Ok(document) => document,
        Err(e) => {
            report_not_ready(kcp, ctx, ns, reasons::INVALID_VERSION, &e.to_string()).await?;
            return Err(e);
        }
    };

    info!(from = %current, to = %desired, "Posting update plan");
    ctx.workload
        .post_update_plan(ns, cluster_name, &document)
        .await?;

    Ok(Some(UpdatePlan::from_object(&document)?))
}

/// Least used failure domain, advertised while the fleet is short of replicas
fn next_failure_domain(kcp: &K0sControlPlane, replicas: &[Replica]) -> Option<String> {
    let active: Vec<&Replica> = replicas.iter().filter(|r| r.is_active()).collect();
    if saturating_count(active.len()) >= kcp.spec.replicas {
        return None;
    }

    let mut stats = FailureDomainStats::new(kcp.spec.failure_domains.iter().cloned());
    for replica in active {
        if let Some(domain) = &replica.failure_domain {
            stats.add(domain);
        }
    }
    stats.select().map(str::to_string)
}

async fn remediate(
    kcp: &K0sControlPlane,
    ctx: &Context,
    ns: &str,
    cluster_name: &str,
    replicas: &[Replica],
    fleet_ready: bool,
) -> Result<()> {
    let name = kcp.name_any();
    let engine = RemediationEngine::new(
        ctx.client.as_ref(),
        ctx.workload.as_ref(),
        ns,
        &name,
        cluster_name,
        kcp.metadata.generation,
    );

    let mut lock_held = kcp.remediation_in_progress();
    if lock_held && lock_releasable(replicas, kcp.spec.replicas) {
        engine.release_lock().await?;
        lock_held = false;
    }

    let plan = plan_remediation(RemediationInput {
        replicas,
        fleet_ready,
        lock_held,
    });
    let outcome = engine.run(plan).await?;

    if let Some(ref state) = ctx.health_state {
        match &outcome.decision {
            RemediationDecision::Remediate { .. } => state.metrics.record_remediation(ns, &name),
            RemediationDecision::Blocked { reason, .. } => {
                state
                    .metrics
                    .record_blocked_remediation(ns, &name, reason.as_str())
            }
            RemediationDecision::Skip(_) => {}
        }
    }

    if !outcome.condition_errors.is_empty() {
        warn!(
            failed = outcome.condition_errors.len(),
            "Some replica conditions could not be updated"
        );
    }

    Ok(())
}

/// Persist a Ready=False condition without touching the counters
async fn report_not_ready(
    kcp: &K0sControlPlane,
    ctx: &Context,
    ns: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let mut status: K0sControlPlaneStatus = kcp.status.clone().unwrap_or_default();
    status.ready = false;
    status.conditions = ConditionBuilder::from_existing(status.conditions, kcp.metadata.generation)
        .ready(false, reason, message)
        .build();
    ctx.client.patch_status(ns, &kcp.name_any(), &status).await
}

fn record_fleet_metrics(
    ctx: &Context,
    ns: &str,
    name: &str,
    desired: i32,
    status: &K0sControlPlaneStatus,
) {
    if let Some(ref state) = ctx.health_state {
        state.metrics.set_fleet_replicas(
            ns,
            name,
            desired as i64,
            status.ready_replicas as i64,
            status.updated_replicas as i64,
        );
    }
}

fn has_finalizer(kcp: &K0sControlPlane) -> bool {
    kcp.finalizers().iter().any(|f| f == FINALIZER)
}

/// Delete every replica before letting the control plane go
async fn handle_deletion(kcp: &K0sControlPlane, ctx: &Context, ns: &str) -> Result<Action> {
    let name = kcp.name_any();

    if !has_finalizer(kcp) {
        return Ok(Action::await_change());
    }

    let replicas = ctx.client.list_replicas(ns, &kcp.cluster_name()).await?;
    if !replicas.is_empty() {
        for replica in replicas.iter().filter(|r| !r.deletion_requested) {
            info!(replica = %replica.name, "Deleting replica of removed control plane");
            ctx.client.delete_replica(ns, &replica.name).await?;
        }
        report_not_ready(kcp, ctx, ns, reasons::DELETING, "Waiting for replicas to be deleted")
            .await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    ctx.client.remove_finalizer(ns, &name).await?;
    ctx.fleet_locks.forget(&fleet_key(ns, &name)).await;
    if let Some(ref state) = ctx.health_state {
        state.metrics.remove_fleet(ns, &name);
    }

    info!("Control plane {} deleted", name);
    Ok(Action::await_change())
}
