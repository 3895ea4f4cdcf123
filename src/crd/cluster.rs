//! Cluster custom resource (`management.cattle.io/v3`).
//!
//! The upstream description of a downstream cluster. The upgrade controller
//! reads the k3s config block for version/concurrency/drain inputs and
//! reflects progress back through the `Upgraded` condition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type driven by the upgrade controller.
pub const CONDITION_UPGRADED: &str = "Upgraded";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.k3sConfig.version"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Human-friendly name shown in the UI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    /// k3s distribution config; present only for k3s clusters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k3s_config: Option<K3sConfig>,

    /// Private registries nodes pull system images from. The first entry
    /// marked default (or the first entry) is used for agent image
    /// resolution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_registries: Vec<PrivateRegistry>,

    /// Filesystem prefix for node binaries and config.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix_path: String,

    /// Windows-specific prefix path; overrides `prefix_path` for Windows
    /// node commands when set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub windows_prefix_path: String,
}

/// Upgrade inputs for a k3s downstream cluster.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct K3sConfig {
    /// Target k3s version (e.g. "v1.18.2+k3s1").
    #[serde(default)]
    pub version: String,

    /// Maximum simultaneous control-plane node upgrades.
    #[serde(default = "default_concurrency")]
    pub server_concurrency: i64,

    /// Maximum simultaneous worker node upgrades.
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: i64,

    /// Drain control-plane nodes before upgrading them.
    #[serde(default)]
    pub drain_server_nodes: bool,

    /// Drain worker nodes before upgrading them.
    #[serde(default)]
    pub drain_worker_nodes: bool,
}

fn default_concurrency() -> i64 {
    1
}

/// Registry credentials for pulling system images.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRegistry {
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Conditions describing the observed state of the cluster.
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,

    /// Kubernetes version last observed in the downstream cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Tri-state condition status following the Kubernetes convention.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition on a Cluster.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of condition (e.g. "Upgraded").
    pub r#type: String,

    /// Status of the condition.
    pub status: ConditionStatus,

    /// Human-readable detail for the last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition status or message changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl ClusterCondition {
    fn new(condition_type: &str, status: ConditionStatus) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status,
            message: String::new(),
            last_update_time: Some(jiff::Timestamp::now().to_string()),
        }
    }
}

impl Cluster {
    fn condition(&self, condition_type: &str) -> Option<&ClusterCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.r#type == condition_type)
    }

    fn condition_mut(&mut self, condition_type: &str) -> &mut ClusterCondition {
        let status = self.status.get_or_insert_with(ClusterStatus::default);
        let idx = match status
            .conditions
            .iter()
            .position(|c| c.r#type == condition_type)
        {
            Some(idx) => idx,
            None => {
                status
                    .conditions
                    .push(ClusterCondition::new(condition_type, ConditionStatus::Unknown));
                status.conditions.len() - 1
            }
        };
        &mut status.conditions[idx]
    }

    /// Whether the `Upgraded` condition has ever been set.
    pub fn has_upgraded_condition(&self) -> bool {
        self.condition(CONDITION_UPGRADED).is_some()
    }

    pub fn upgraded_is_true(&self) -> bool {
        self.condition(CONDITION_UPGRADED)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn upgraded_is_unknown(&self) -> bool {
        self.condition(CONDITION_UPGRADED)
            .is_some_and(|c| c.status == ConditionStatus::Unknown)
    }

    /// Message on the `Upgraded` condition, empty if unset.
    pub fn upgraded_message(&self) -> &str {
        self.condition(CONDITION_UPGRADED)
            .map(|c| c.message.as_str())
            .unwrap_or("")
    }

    /// Set the `Upgraded` condition status, refreshing the transition
    /// timestamp only when the status actually changes.
    pub fn set_upgraded(&mut self, status: ConditionStatus) {
        let cond = self.condition_mut(CONDITION_UPGRADED);
        if cond.status != status {
            cond.status = status;
            cond.last_update_time = Some(jiff::Timestamp::now().to_string());
        }
    }

    pub fn set_upgraded_message(&mut self, message: &str) {
        let cond = self.condition_mut(CONDITION_UPGRADED);
        if cond.message != message {
            cond.message = message.to_string();
            cond.last_update_time = Some(jiff::Timestamp::now().to_string());
        }
    }
}
