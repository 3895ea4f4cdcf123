//! Plan templates and comparison.
//!
//! Pure functions producing the two Rancher-managed plans from cluster
//! config, reconfiguring observed plans toward that config, and deciding
//! whether an observed plan materially differs from the desired one.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::api::ObjectMeta;

use crate::crd::{ContainerSpec, DrainSpec, Plan, PlanSpec};

/// Namespace the managed plans (and the system-upgrade-controller) live in.
pub const SYSTEM_UPGRADE_NAMESPACE: &str = "cattle-system";

/// Fixed name of the managed control-plane plan.
pub const MASTER_PLAN_NAME: &str = "k3s-master-plan";

/// Fixed name of the managed worker plan.
pub const WORKER_PLAN_NAME: &str = "k3s-worker-plan";

/// Sentinel label marking a plan as owned by this operator.
pub const RANCHER_MANAGED_LABEL: &str = "rancher-managed";

/// Selector key used to deactivate foreign plans. No node carries this
/// label, so an `Exists` requirement on it matches zero nodes.
pub const UPGRADE_DISABLE_LABEL_KEY: &str = "plan.upgrade.cattle.io/disable";

/// Image performing the in-node k3s upgrade.
pub const UPGRADE_IMAGE: &str = "rancher/k3s-upgrade";

/// Service account the upgrade jobs run under.
pub const UPGRADE_SERVICE_ACCOUNT: &str = "system-upgrade-controller";

const MASTER_NODE_LABEL: &str = "node-role.kubernetes.io/master";

/// Whether a plan carries the managed sentinel label.
pub fn is_rancher_managed(plan: &Plan) -> bool {
    plan.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(RANCHER_MANAGED_LABEL))
}

/// The `Exists`-on-absent-key requirement appended to foreign plans.
pub fn deactivator_requirement() -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: UPGRADE_DISABLE_LABEL_KEY.to_string(),
        operator: "Exists".to_string(),
        values: None,
    }
}

/// Whether the plan's node selector already contains the deactivator.
pub fn has_deactivator(plan: &Plan) -> bool {
    plan.spec
        .node_selector
        .as_ref()
        .and_then(|s| s.match_expressions.as_ref())
        .is_some_and(|exprs| {
            exprs
                .iter()
                .any(|r| r.key == UPGRADE_DISABLE_LABEL_KEY && r.operator == "Exists")
        })
}

/// Append the deactivator requirement so the plan matches zero nodes.
/// The requirement is never removed again by this operator.
pub fn deactivate(plan: &mut Plan) {
    let selector = plan.spec.node_selector.get_or_insert_with(LabelSelector::default);
    selector
        .match_expressions
        .get_or_insert_with(Vec::new)
        .push(deactivator_requirement());
}

/// Cordon flag and drain block for the given drain policy. Draining
/// implies cordoning, so only one of the two is ever set.
fn drain_policy(drain: bool) -> (bool, Option<DrainSpec>) {
    if drain {
        (
            false,
            Some(DrainSpec {
                force: true,
                ..Default::default()
            }),
        )
    } else {
        (true, None)
    }
}

fn generate_plan(name: &str, selector_operator: &str, version: &str, concurrency: i64, drain: bool) -> Plan {
    let (cordon, drain_spec) = drain_policy(drain);
    Plan {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(SYSTEM_UPGRADE_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                RANCHER_MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: PlanSpec {
            concurrency,
            version: version.to_string(),
            service_account_name: UPGRADE_SERVICE_ACCOUNT.to_string(),
            node_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: MASTER_NODE_LABEL.to_string(),
                    operator: selector_operator.to_string(),
                    values: Some(vec!["true".to_string()]),
                }]),
                match_labels: None,
            }),
            cordon,
            drain: drain_spec,
            upgrade: Some(ContainerSpec {
                image: UPGRADE_IMAGE.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        status: None,
    }
}

/// Canonical control-plane plan: targets nodes labelled as master.
pub fn generate_master_plan(version: &str, concurrency: i64, drain: bool) -> Plan {
    generate_plan(MASTER_PLAN_NAME, "In", version, concurrency, drain)
}

/// Canonical worker plan: targets every node not labelled as master.
pub fn generate_worker_plan(version: &str, concurrency: i64, drain: bool) -> Plan {
    generate_plan(WORKER_PLAN_NAME, "NotIn", version, concurrency, drain)
}

fn configure_plan(observed: &Plan, version: &str, concurrency: i64, drain: bool) -> Plan {
    let mut plan = observed.clone();
    let (cordon, drain_spec) = drain_policy(drain);
    plan.spec.version = version.to_string();
    plan.spec.concurrency = concurrency;
    plan.spec.cordon = cordon;
    plan.spec.drain = drain_spec;
    plan
}

/// Copy of `observed` with only version, concurrency and drain policy
/// overwritten. Everything else (selector edits, annotations, operator
/// tweaks) is preserved.
pub fn configure_master_plan(observed: &Plan, version: &str, concurrency: i64, drain: bool) -> Plan {
    configure_plan(observed, version, concurrency, drain)
}

/// Worker counterpart of [`configure_master_plan`].
pub fn configure_worker_plan(observed: &Plan, version: &str, concurrency: i64, drain: bool) -> Plan {
    configure_plan(observed, version, concurrency, drain)
}

/// Compare two plans, ignoring `status`. Returns true if they are the same.
///
/// Version and concurrency are checked explicitly before the full spec
/// compare: they are the fields the cluster config actually drives, and a
/// mismatch there is the common case worth short-circuiting on.
pub fn plans_equal(a: &Plan, b: &Plan) -> bool {
    if a.metadata.namespace != b.metadata.namespace {
        return false;
    }
    if a.spec.version != b.spec.version {
        return false;
    }
    if a.spec.concurrency != b.spec.concurrency {
        return false;
    }
    if a.spec != b.spec {
        return false;
    }
    if a.metadata.labels != b.metadata.labels {
        return false;
    }
    true
}
