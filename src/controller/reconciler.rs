//! Reconciliation loop for downstream cluster upgrades.
//!
//! Each reconcile:
//! 1. resolves a client for the cluster's downstream API server,
//! 2. neutralizes foreign upgrade plans found there,
//! 3. creates or reconfigures the two managed plans (control plane and
//!    worker) to match the cluster's declared version and concurrency,
//! 4. folds observed plan progress into the cluster's `Upgraded` condition.
//!
//! Plans observed outside the system upgrade namespace are never treated as
//! the managed pair, even when their names match.

use std::sync::Arc;
use std::time::Instant;

use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, PostParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::controller::{
    conditions::{ConditionOutcome, modify_cluster_condition},
    context::Context,
    error::Error,
    plans::{
        MASTER_PLAN_NAME, SYSTEM_UPGRADE_NAMESPACE, WORKER_PLAN_NAME, configure_master_plan,
        configure_worker_plan, deactivate, generate_master_plan, generate_worker_plan,
        has_deactivator, is_rancher_managed, plans_equal,
    },
};
use crate::crd::{Cluster, K3sConfig, Plan};

/// Requeue interval while an upgrade is in flight.
const UPGRADING_REQUEUE: std::time::Duration = std::time::Duration::from_secs(15);

/// Requeue interval for settled clusters.
const SETTLED_REQUEUE: std::time::Duration = std::time::Duration::from_secs(300);

/// Reconcile a downstream cluster's upgrade plans.
pub async fn reconcile(obj: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    debug!(name = %name, "Reconciling cluster");

    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "Cluster is being deleted, skipping");
        return Ok(Action::await_change());
    }

    // Only clusters declaring a k3s version participate in upgrades.
    let Some(k3s_config) = obj.spec.k3s_config.clone() else {
        debug!(name = %name, "Cluster has no k3s configuration, skipping");
        return Ok(Action::await_change());
    };
    if k3s_config.version.is_empty() {
        debug!(name = %name, "Cluster declares no k3s version, skipping");
        return Ok(Action::await_change());
    }

    let downstream = ctx.downstream.downstream_client(&obj).await?;
    let (master, worker) = deploy_plans(&obj, &ctx, &downstream, &k3s_config).await?;

    let mut cluster = (*obj).clone();
    let outcome =
        modify_cluster_condition(&ctx, &mut cluster, master.as_ref(), worker.as_ref()).await?;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state.metrics.record_reconcile(&name, duration);
    }

    Ok(success_action(&cluster, outcome))
}

/// Map the condition outcome onto the controller's next wakeup.
///
/// An unchanged-message outcome relies on the re-enqueue scheduler, so the
/// controller itself waits for a change.
fn success_action(cluster: &Cluster, outcome: ConditionOutcome) -> Action {
    match outcome {
        ConditionOutcome::EnqueueUnchanged => Action::await_change(),
        _ if cluster.upgraded_is_unknown() => Action::requeue(UPGRADING_REQUEUE),
        _ => Action::requeue(SETTLED_REQUEUE),
    }
}

/// Bring the downstream plans in line with the cluster's declared upgrade.
///
/// Returns the plans as they were observed before this reconcile changed
/// them. When both managed plans were absent and had to be created, the
/// return is `(None, None)`: progress is only ever reported from plans that
/// existed at the start of the pass.
async fn deploy_plans(
    cluster: &Cluster,
    ctx: &Context,
    downstream: &Client,
    k3s_config: &K3sConfig,
) -> Result<(Option<Plan>, Option<Plan>), Error> {
    let name = cluster.name_any();
    let all_plans: Api<Plan> = Api::all(downstream.clone());
    let plan_list = all_plans.list(&ListParams::default()).await?;

    let mut master: Option<Plan> = None;
    let mut worker: Option<Plan> = None;

    for plan in plan_list {
        if !is_rancher_managed(&plan) {
            neutralize_foreign_plan(ctx, cluster, downstream, plan).await?;
            continue;
        }
        // managed plans only count in their designated namespace
        if plan.namespace().as_deref() != Some(SYSTEM_UPGRADE_NAMESPACE) {
            continue;
        }
        match plan.name_any().as_str() {
            MASTER_PLAN_NAME => master = Some(plan),
            WORKER_PLAN_NAME => worker = Some(plan),
            _ => {}
        }
    }

    let managed: Api<Plan> = Api::namespaced(downstream.clone(), SYSTEM_UPGRADE_NAMESPACE);
    let version = &k3s_config.version;

    if master.is_none() && worker.is_none() {
        info!(cluster = %name, version = %version, "Creating upgrade plans");
        managed
            .create(
                &PostParams::default(),
                &generate_master_plan(
                    version,
                    k3s_config.server_concurrency,
                    k3s_config.drain_server_nodes,
                ),
            )
            .await?;
        managed
            .create(
                &PostParams::default(),
                &generate_worker_plan(
                    version,
                    k3s_config.worker_concurrency,
                    k3s_config.drain_worker_nodes,
                ),
            )
            .await?;
        ctx.publish_normal_event(
            cluster,
            "UpgradePlansCreated",
            "DeployPlans",
            Some(format!("created upgrade plans for version {version}")),
        )
        .await;
        return Ok((None, None));
    }

    if let Some(observed) = master.take() {
        let desired = configure_master_plan(
            &observed,
            version,
            k3s_config.server_concurrency,
            k3s_config.drain_server_nodes,
        );
        master = Some(sync_plan(&managed, observed, desired).await?);
    }
    if let Some(observed) = worker.take() {
        let desired = configure_worker_plan(
            &observed,
            version,
            k3s_config.worker_concurrency,
            k3s_config.drain_worker_nodes,
        );
        worker = Some(sync_plan(&managed, observed, desired).await?);
    }

    Ok((master, worker))
}

/// Update a managed plan if its effective configuration drifted.
///
/// Returns the stored plan either way so the caller reports progress from
/// the server's view.
async fn sync_plan(api: &Api<Plan>, observed: Plan, desired: Plan) -> Result<Plan, Error> {
    if plans_equal(&observed, &desired) {
        return Ok(observed);
    }
    let name = desired.name_any();
    info!(plan = %name, version = %desired.spec.version, "Updating upgrade plan");
    Ok(api.replace(&name, &PostParams::default(), &desired).await?)
}

/// Append the deactivating requirement to a plan this operator does not own.
///
/// Any failure here aborts the reconcile: a live foreign plan could upgrade
/// nodes to a version the cluster never declared.
async fn neutralize_foreign_plan(
    ctx: &Context,
    cluster: &Cluster,
    downstream: &Client,
    mut plan: Plan,
) -> Result<(), Error> {
    if has_deactivator(&plan) {
        return Ok(());
    }

    let plan_name = plan.name_any();
    let namespace = plan
        .namespace()
        .ok_or_else(|| Error::MissingField(format!("plan {plan_name} has no namespace")))?;

    warn!(plan = %plan_name, namespace = %namespace, "Deactivating foreign upgrade plan");
    deactivate(&mut plan);

    let api: Api<Plan> = Api::namespaced(downstream.clone(), &namespace);
    api.replace(&plan_name, &PostParams::default(), &plan).await?;

    ctx.publish_warning_event(
        cluster,
        "ForeignPlanDeactivated",
        "DeployPlans",
        Some(format!("deactivated unmanaged upgrade plan {namespace}/{plan_name}")),
    )
    .await;
    Ok(())
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(std::time::Duration::from_secs(300))
    }
}
