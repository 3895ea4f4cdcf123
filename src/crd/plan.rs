//! Plan custom resource (`upgrade.cattle.io/v1`).
//!
//! Plans are the declarative upgrade directive consumed by the
//! system-upgrade-controller running inside the downstream cluster. The
//! operator owns the two Rancher-managed plans and reads `status.applying`
//! to track per-node upgrade progress.

use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plan is a namespaced resource in the downstream cluster.
///
/// Example:
/// ```yaml
/// apiVersion: upgrade.cattle.io/v1
/// kind: Plan
/// metadata:
///   name: k3s-master-plan
///   namespace: cattle-system
///   labels:
///     rancher-managed: "true"
/// spec:
///   version: v1.18.2+k3s1
///   concurrency: 1
///   serviceAccountName: system-upgrade-controller
///   upgrade:
///     image: rancher/k3s-upgrade
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "upgrade.cattle.io",
    version = "v1",
    kind = "Plan",
    plural = "plans",
    status = "PlanStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// Maximum number of nodes upgraded simultaneously.
    #[serde(default)]
    pub concurrency: i64,

    /// Target version for the upgrade (e.g. "v1.18.2+k3s1").
    #[serde(default)]
    pub version: String,

    /// Release channel URL; unused when `version` is pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Service account the upgrade jobs run under.
    #[serde(default)]
    pub service_account_name: String,

    /// Selects the nodes this plan applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,

    /// Cordon nodes before upgrading. Draining implies cordoning, so this
    /// is only set when `drain` is absent.
    #[serde(default)]
    pub cordon: bool,

    /// Drain policy; when set, nodes are drained before the upgrade job
    /// runs on them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainSpec>,

    /// Optional container run on each node before the upgrade container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare: Option<ContainerSpec>,

    /// Container that performs the in-node upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<ContainerSpec>,

    /// Tolerations applied to the upgrade jobs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// Node drain policy for a Plan.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DrainSpec {
    /// Continue even if there are pods not managed by a controller.
    #[serde(default)]
    pub force: bool,

    /// Skip waiting for the pods' deletion grace period to expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_wait_for_delete_timeout: Option<i64>,

    /// Delete pods using emptyDir volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_local_data: Option<bool>,

    /// Ignore DaemonSet-managed pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_daemon_sets: Option<bool>,
}

/// Container image reference used by the `prepare` and `upgrade` steps.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Observed state reported by the system-upgrade-controller.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    /// Names of nodes an upgrade job is currently running on.
    #[serde(default)]
    pub applying: Vec<String>,

    /// Version most recently resolved from `version` or `channel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,

    /// Hash of the resolved plan, set by the downstream agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_hash: Option<String>,
}

impl Plan {
    /// Node names the downstream agent is currently upgrading.
    pub fn applying(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.applying.as_slice())
            .unwrap_or(&[])
    }
}
