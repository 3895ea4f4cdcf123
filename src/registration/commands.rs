//! Registration command templates.
//!
//! The command strings are consumed verbatim by administrators (and by the
//! UI), so their exact shape is load-bearing. Every template keeps the
//! argument order stable: image, server root, token, then the optional CA
//! checksum and prefix-path suffixes.

use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::crd::{Cluster, PrivateRegistry};
use crate::registration::image::{private_repo_url, resolve_with_cluster};
use crate::settings::Settings;

/// Path under the server root serving the import manifest for a token.
const IMPORT_PATH_PREFIX: &str = "/v3/import/";

/// The composed command set for one registration token.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCommands {
    pub command: String,
    pub insecure_command: String,
    pub node_command: String,
    pub windows_node_command: String,
    pub manifest_url: String,
    pub token: String,
}

/// Compose the full command set for a token.
///
/// `request_root` is the externally visible root of the request that asked
/// for the commands; it is only used when the `server-url` setting is unset
/// or unparseable.
pub fn compose(
    settings: &Settings,
    cluster: Option<&Cluster>,
    token: &str,
    request_root: Option<&str>,
) -> RegistrationCommands {
    let manifest_url = manifest_url(settings, token, request_root);
    let root_url = root_url(settings, request_root);

    let mut ca = ca_checksum(&settings.ca_certs);
    if !ca.is_empty() {
        ca = format!(" --ca-checksum {ca}");
    }

    let agent_image = resolve_with_cluster(&settings.agent_image, cluster);

    let node_command = format!(
        "sudo docker run -d --privileged --restart=unless-stopped --net=host \
         -v /etc/kubernetes:/etc/kubernetes -v /var/run:/var/run \
         {agent_image} --server {root_url} --token {token}{ca}"
    );

    // when nodes pull from a private registry, the agent must also learn the
    // image name it was started from
    let agent_image_env = if private_repo_url(cluster).is_some() {
        format!("-e AGENT_IMAGE={agent_image} ")
    } else {
        String::new()
    };
    let prefix_path = windows_prefix_path_arg(cluster);
    let windows_node_command = format!(
        "PowerShell -NoLogo -NonInteractive -Command \
         \"& {{docker run -v c:\\:c:\\host {agent_image_env}{agent_image} bootstrap \
         --server {root_url} --token {token}{ca}{prefix_path} | iex}}\""
    );

    RegistrationCommands {
        command: format!("kubectl apply -f {manifest_url}"),
        insecure_command: format!("curl --insecure -sfL {manifest_url} | kubectl apply -f -"),
        node_command,
        windows_node_command,
        manifest_url,
        token: token.to_string(),
    }
}

/// Docker login command for a private registry, with the password escaped
/// so the shell passes it through unmangled.
pub fn login_command(registry: &PrivateRegistry) -> String {
    format!(
        "echo \"{}\" | sudo docker login --username {} --password-stdin {}",
        escape_special_chars(&registry.password),
        registry.user,
        registry.url
    )
}

/// Escape `"`, `` ` ``, `$` and `\` with a backslash.
pub fn escape_special_chars(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '`' | '$' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Hex-encoded SHA-256 of the CA bundle, or empty when no private CA is
/// configured. The digest covers the bundle as served, which always ends
/// with a newline.
pub fn ca_checksum(ca_certs: &str) -> String {
    if ca_certs.is_empty() {
        return String::new();
    }
    let mut normalized = ca_certs.to_string();
    if !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// The server root (scheme and authority, no path) commands should point at.
///
/// Prefers the `server-url` setting; falls back to the request root, then to
/// an empty string.
pub fn root_url(settings: &Settings, request_root: Option<&str>) -> String {
    if settings.server_url.is_empty() {
        return request_root.unwrap_or_default().to_string();
    }
    match Url::parse(&settings.server_url) {
        Ok(u) => format!("{}://{}", u.scheme(), u.authority()),
        Err(_) => request_root.unwrap_or_default().to_string(),
    }
}

/// Absolute URL of the import manifest for `token`.
pub fn manifest_url(settings: &Settings, token: &str, request_root: Option<&str>) -> String {
    let path = format!("{IMPORT_PATH_PREFIX}{token}.yaml");
    let root = root_url(settings, request_root);
    if root.is_empty() {
        return String::new();
    }
    format!("{root}{path}")
}

/// The ` --prefix-path <path>` suffix for the Windows bootstrap command.
/// The Windows-specific prefix path overrides the general one.
fn windows_prefix_path_arg(cluster: Option<&Cluster>) -> String {
    let Some(cluster) = cluster else {
        return String::new();
    };
    let mut prefix_path = cluster.spec.prefix_path.as_str();
    if !cluster.spec.windows_prefix_path.is_empty() {
        prefix_path = &cluster.spec.windows_prefix_path;
    }
    if prefix_path.is_empty() {
        return String::new();
    }
    format!(" --prefix-path {prefix_path}")
}
