//! The `Upgraded` condition state machine.
//!
//! Drives the upstream cluster's `Upgraded` condition from the observed
//! state of the two managed plans:
//!
//! `True => Unknown ("cluster is being upgraded") => Unknown (per-node
//! progress messages) => True`
//!
//! When progress is still pending but the message would not change, the
//! reconciler is re-enqueued instead of writing a no-op update.

use std::time::Duration;

use kube::{Api, ResourceExt, api::PostParams};
use tracing::debug;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::{Cluster, ConditionStatus, Plan};

/// Upper bound on node names shown in the condition message.
pub const MAX_DISPLAY_NODES: usize = 10;

/// Delay before re-running the reconciler when upgrades are applying but
/// nothing changed. Plan status changes downstream do not produce upstream
/// cluster events, so this timer keeps the condition converging.
pub const PROGRESS_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// What the state machine decided to do with the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConditionOutcome {
    /// Nothing to persist; leave the cluster as-is.
    NoChange,
    /// The condition changed; persist the cluster status.
    Persist,
    /// Upgrades still applying but the message is byte-identical; skip the
    /// no-op update and re-enqueue instead.
    EnqueueUnchanged,
}

/// Compose the truncated node list for an in-progress condition message.
///
/// The display count is the concurrency clamped to the number of applying
/// nodes and to [`MAX_DISPLAY_NODES`]; order of `nodes` is preserved.
pub fn upgrading_message(concurrency: i64, nodes: &[String]) -> String {
    // concurrency max can be very large
    let mut count = usize::try_from(concurrency).unwrap_or(0);
    if count > nodes.len() {
        count = nodes.len();
    }
    if count > MAX_DISPLAY_NODES {
        count = MAX_DISPLAY_NODES;
    }
    nodes[..count].join(", ")
}

/// Advance the `Upgraded` condition from the observed plans.
///
/// Mutates `cluster` in memory and reports whether the mutation needs to
/// be persisted. Control-plane progress dominates worker progress: if both
/// plans are applying, only the control-plane message is reported.
pub fn drive_upgraded_condition(
    cluster: &mut Cluster,
    master: Option<&Plan>,
    worker: Option<&Plan>,
) -> ConditionOutcome {
    let (server_concurrency, worker_concurrency) = cluster
        .spec
        .k3s_config
        .as_ref()
        .map(|c| (c.server_concurrency, c.worker_concurrency))
        .unwrap_or((0, 0));

    if master.is_none() && worker.is_none() {
        // entering the upgrade: plans not observed yet
        if cluster.upgraded_is_true() {
            cluster.set_upgraded(ConditionStatus::Unknown);
            cluster.set_upgraded_message("cluster is being upgraded");
            return ConditionOutcome::Persist;
        }
        if cluster.upgraded_is_unknown() {
            return ConditionOutcome::NoChange;
        }
    }

    if let Some(plan) = master
        && !plan.applying().is_empty()
    {
        cluster.set_upgraded(ConditionStatus::Unknown);
        let message = format!(
            "controlplane node [{}] being upgraded",
            upgrading_message(server_concurrency, plan.applying())
        );
        return enqueue_or_persist(cluster, &message);
    }

    if let Some(plan) = worker
        && !plan.applying().is_empty()
    {
        cluster.set_upgraded(ConditionStatus::Unknown);
        let message = format!(
            "worker node [{}] being upgraded",
            upgrading_message(worker_concurrency, plan.applying())
        );
        return enqueue_or_persist(cluster, &message);
    }

    // nothing is applying
    cluster.set_upgraded(ConditionStatus::True);
    ConditionOutcome::Persist
}

fn enqueue_or_persist(cluster: &mut Cluster, message: &str) -> ConditionOutcome {
    if cluster.upgraded_message() == message {
        // update would be a no-op
        return ConditionOutcome::EnqueueUnchanged;
    }
    cluster.set_upgraded_message(message);
    ConditionOutcome::Persist
}

/// Run the state machine and apply its decision: persist the status via
/// the upstream API or schedule a re-enqueue.
///
/// On persist, `cluster` is replaced with the server's view so the caller
/// observes the stored resource version.
pub async fn modify_cluster_condition(
    ctx: &Context,
    cluster: &mut Cluster,
    master: Option<&Plan>,
    worker: Option<&Plan>,
) -> Result<ConditionOutcome> {
    let outcome = drive_upgraded_condition(cluster, master, worker);
    let name = cluster.name_any();

    match outcome {
        ConditionOutcome::Persist => {
            let api: Api<Cluster> = Api::all(ctx.client.clone());
            let data = serde_json::to_vec(&*cluster)?;
            *cluster = api.replace_status(&name, &PostParams::default(), data).await?;
            debug!(name = %name, message = %cluster.upgraded_message(), "Persisted Upgraded condition");
        }
        ConditionOutcome::EnqueueUnchanged => {
            ctx.requeue.enqueue_after(&name, PROGRESS_REQUEUE_DELAY).await;
            debug!(name = %name, "Upgrade still applying, re-enqueued");
        }
        ConditionOutcome::NoChange => {}
    }

    Ok(outcome)
}
