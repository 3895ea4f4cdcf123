//! Typed operator settings.
//!
//! Installation-wide knobs (server URL, agent image, CA bundle, token TTLs)
//! live in a ConfigMap in the operator's namespace. This module loads that
//! map into a typed [`Settings`] record, parsing values eagerly so a bad
//! value fails loudly at read time instead of deep inside a reconcile.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

/// Public URL of the management server, e.g. `https://rancher.example.com`.
pub const SERVER_URL: &str = "server-url";
/// Image run by downstream agents during registration.
pub const AGENT_IMAGE: &str = "agent-image";
/// PEM bundle of the CA certificates presented by the server, if private.
pub const CA_CERTS: &str = "cacerts";
/// Whether kubeconfigs embed generated tokens instead of cached ones.
pub const KUBECONFIG_GENERATE_TOKEN: &str = "kubeconfig-generate-token";
/// TTL applied to kubeconfig tokens, in minutes.
pub const KUBECONFIG_TOKEN_TTL_MINUTES: &str = "kubeconfig-token-ttl-minutes";
/// Upper bound for any token TTL, in minutes. Zero means unlimited.
pub const AUTH_TOKEN_MAX_TTL_MINUTES: &str = "auth-token-max-ttl-minutes";
/// TTL for interactive user sessions, in minutes.
pub const AUTH_USER_SESSION_TTL_MINUTES: &str = "auth-user-session-ttl-minutes";

/// Name of the ConfigMap holding the settings.
pub const SETTINGS_CONFIGMAP: &str = "rancher-settings";

const DEFAULT_KUBECONFIG_TOKEN_TTL_MINUTES: i64 = 960;
const DEFAULT_AUTH_USER_SESSION_TTL_MINUTES: i64 = 960;

/// Errors raised while loading or updating settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A stored value does not parse as its declared type
    #[error("setting {name} has invalid value {value:?}: {reason}")]
    Parse {
        name: String,
        value: String,
        reason: String,
    },

    /// A proposed value violates a cross-setting constraint
    #[error("setting {name} rejected: {reason}")]
    Rejected { name: String, reason: String },
}

/// Typed snapshot of the installation settings.
///
/// Missing keys fall back to their defaults; present keys must parse.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub agent_image: String,
    pub ca_certs: String,
    pub kubeconfig_generate_token: bool,
    pub kubeconfig_token_ttl_minutes: i64,
    pub auth_token_max_ttl_minutes: i64,
    pub auth_user_session_ttl_minutes: i64,
}

impl Settings {
    /// Parse a settings map into a typed record.
    pub fn from_map(data: &BTreeMap<String, String>) -> Result<Self, SettingsError> {
        Ok(Self {
            server_url: string_value(data, SERVER_URL),
            agent_image: string_value(data, AGENT_IMAGE),
            ca_certs: string_value(data, CA_CERTS),
            kubeconfig_generate_token: bool_value(data, KUBECONFIG_GENERATE_TOKEN, true),
            kubeconfig_token_ttl_minutes: minutes_value(
                data,
                KUBECONFIG_TOKEN_TTL_MINUTES,
                DEFAULT_KUBECONFIG_TOKEN_TTL_MINUTES,
            )?,
            auth_token_max_ttl_minutes: minutes_value(data, AUTH_TOKEN_MAX_TTL_MINUTES, 0)?,
            auth_user_session_ttl_minutes: minutes_value(
                data,
                AUTH_USER_SESSION_TTL_MINUTES,
                DEFAULT_AUTH_USER_SESSION_TTL_MINUTES,
            )?,
        })
    }

    /// Validate a proposed update to a single setting against this snapshot.
    pub fn validate_update(&self, name: &str, value: &str) -> Result<(), SettingsError> {
        if name != KUBECONFIG_TOKEN_TTL_MINUTES {
            return Ok(());
        }
        if self.kubeconfig_generate_token {
            return Err(SettingsError::Rejected {
                name: name.to_string(),
                reason: format!("can only be set when {KUBECONFIG_GENERATE_TOKEN} is disabled"),
            });
        }
        let ttl = parse_minutes(name, value)?;
        // with a finite max, zero (unlimited) is just as much a violation
        // as a value above the max
        if self.auth_token_max_ttl_minutes > 0 && (ttl == 0 || ttl > self.auth_token_max_ttl_minutes)
        {
            return Err(SettingsError::Rejected {
                name: name.to_string(),
                reason: format!(
                    "must not exceed {AUTH_TOKEN_MAX_TTL_MINUTES} ({} minutes)",
                    self.auth_token_max_ttl_minutes
                ),
            });
        }
        Ok(())
    }
}

fn string_value(data: &BTreeMap<String, String>, name: &str) -> String {
    data.get(name).map(|v| v.trim().to_string()).unwrap_or_default()
}

fn bool_value(data: &BTreeMap<String, String>, name: &str, default: bool) -> bool {
    data.get(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn minutes_value(
    data: &BTreeMap<String, String>,
    name: &str,
    default: i64,
) -> Result<i64, SettingsError> {
    match data.get(name).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => parse_minutes(name, raw),
    }
}

fn parse_minutes(name: &str, raw: &str) -> Result<i64, SettingsError> {
    let minutes: i64 = raw.trim().parse().map_err(|e| SettingsError::Parse {
        name: name.to_string(),
        value: raw.to_string(),
        reason: format!("{e}"),
    })?;
    if minutes < 0 {
        return Err(SettingsError::Parse {
            name: name.to_string(),
            value: raw.to_string(),
            reason: "minutes must not be negative".to_string(),
        });
    }
    Ok(minutes)
}

/// Loads settings from the operator's ConfigMap.
#[derive(Clone)]
pub struct SettingStore {
    client: Client,
    namespace: String,
}

impl SettingStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Fetch the current settings. A missing ConfigMap yields the defaults.
    pub async fn load(&self) -> Result<Settings, crate::controller::error::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let data = match api.get_opt(SETTINGS_CONFIGMAP).await? {
            Some(cm) => cm.data.unwrap_or_default(),
            None => {
                debug!(namespace = %self.namespace, "Settings ConfigMap absent, using defaults");
                BTreeMap::new()
            }
        };
        Ok(Settings::from_map(&data)?)
    }
}
