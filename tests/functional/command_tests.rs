//! Registration command composition tests.
//!
//! The composed strings are pasted into shells verbatim, so these tests
//! pin them byte for byte.

use std::collections::BTreeMap;

use crate::fixtures::ClusterBuilder;
use k3s_upgrade_operator::crd::PrivateRegistry;
use k3s_upgrade_operator::registration::commands::ca_checksum;
use k3s_upgrade_operator::registration::{compose, login_command};
use k3s_upgrade_operator::settings::Settings;

fn settings(entries: &[(&str, &str)]) -> Settings {
    let map: BTreeMap<String, String> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Settings::from_map(&map).expect("test settings should parse")
}

/// Full command set for a plain public-registry installation.
#[test]
fn test_full_command_set_public_registry() {
    let settings = settings(&[
        ("server-url", "https://rancher.example.com"),
        ("agent-image", "rancher/rancher-agent:v2.3.0"),
    ]);
    let commands = compose(&settings, None, "tok-42", None);

    assert_eq!(
        commands.command,
        "kubectl apply -f https://rancher.example.com/v3/import/tok-42.yaml"
    );
    assert_eq!(
        commands.insecure_command,
        "curl --insecure -sfL https://rancher.example.com/v3/import/tok-42.yaml | kubectl apply -f -"
    );
    assert_eq!(
        commands.node_command,
        "sudo docker run -d --privileged --restart=unless-stopped --net=host \
         -v /etc/kubernetes:/etc/kubernetes -v /var/run:/var/run \
         rancher/rancher-agent:v2.3.0 --server https://rancher.example.com --token tok-42"
    );
    assert_eq!(
        commands.windows_node_command,
        "PowerShell -NoLogo -NonInteractive -Command \
         \"& {docker run -v c:\\:c:\\host rancher/rancher-agent:v2.3.0 bootstrap \
         --server https://rancher.example.com --token tok-42 | iex}\""
    );
    assert_eq!(
        commands.manifest_url,
        "https://rancher.example.com/v3/import/tok-42.yaml"
    );
    assert_eq!(commands.token, "tok-42");
}

/// Private CA appends the checksum to both node commands but leaves the
/// manifest commands untouched.
#[test]
fn test_ca_checksum_suffix() {
    let ca = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
    let settings = settings(&[
        ("server-url", "https://rancher.example.com"),
        ("agent-image", "rancher/rancher-agent:v2.3.0"),
        ("cacerts", ca),
    ]);
    let commands = compose(&settings, None, "tok-42", None);
    let suffix = format!(" --ca-checksum {}", ca_checksum(ca));

    assert!(commands.node_command.ends_with(&suffix));
    assert!(commands.windows_node_command.contains(&suffix));
    assert!(!commands.command.contains("--ca-checksum"));
    assert!(!commands.insecure_command.contains("--ca-checksum"));
}

/// A cluster with a default private registry changes the image reference
/// and patches the agent image env into the Windows command only.
#[test]
fn test_private_registry_command_set() {
    let settings = settings(&[
        ("server-url", "https://rancher.example.com"),
        ("agent-image", "rancher/rancher-agent:v2.3.0"),
    ]);
    let cluster = ClusterBuilder::new("downstream-a")
        .registry("reg.example.com", true)
        .windows_prefix_path("c:\\rke")
        .build();
    let commands = compose(&settings, Some(&cluster), "tok-42", None);

    assert_eq!(
        commands.node_command,
        "sudo docker run -d --privileged --restart=unless-stopped --net=host \
         -v /etc/kubernetes:/etc/kubernetes -v /var/run:/var/run \
         reg.example.com/rancher/rancher-agent:v2.3.0 --server https://rancher.example.com --token tok-42"
    );
    assert_eq!(
        commands.windows_node_command,
        "PowerShell -NoLogo -NonInteractive -Command \
         \"& {docker run -v c:\\:c:\\host \
         -e AGENT_IMAGE=reg.example.com/rancher/rancher-agent:v2.3.0 \
         reg.example.com/rancher/rancher-agent:v2.3.0 bootstrap \
         --server https://rancher.example.com --token tok-42 --prefix-path c:\\rke | iex}\""
    );
}

/// Without a configured server URL the request root supplies the base, and
/// without either the URLs come back empty rather than half-formed.
#[test]
fn test_request_root_fallback() {
    let settings = settings(&[("agent-image", "rancher/rancher-agent:v2.3.0")]);

    let commands = compose(&settings, None, "tok-42", Some("https://proxy.example.com"));
    assert_eq!(
        commands.manifest_url,
        "https://proxy.example.com/v3/import/tok-42.yaml"
    );
    assert!(commands.node_command.contains("--server https://proxy.example.com "));

    let commands = compose(&settings, None, "tok-42", None);
    assert_eq!(commands.manifest_url, "");
    assert_eq!(commands.command, "kubectl apply -f ");
}

/// Login command with a hostile password stays a single well-formed shell
/// command.
#[test]
fn test_login_command_with_special_characters() {
    let registry = PrivateRegistry {
        url: "reg.example.com".to_string(),
        user: "svc-pull".to_string(),
        password: "s3cr$t\"pa`ss\\".to_string(),
        is_default: true,
    };
    assert_eq!(
        login_command(&registry),
        "echo \"s3cr\\$t\\\"pa\\`ss\\\\\" | sudo docker login --username svc-pull --password-stdin reg.example.com"
    );
}

/// The JSON the registration endpoint serves uses the public camelCase keys.
#[test]
fn test_commands_serialize_camel_case() {
    let settings = settings(&[
        ("server-url", "https://rancher.example.com"),
        ("agent-image", "rancher/rancher-agent:v2.3.0"),
    ]);
    let commands = compose(&settings, None, "tok-42", None);
    let json = serde_json::to_value(&commands).expect("serialization should succeed");

    assert!(json.get("insecureCommand").is_some());
    assert!(json.get("nodeCommand").is_some());
    assert!(json.get("windowsNodeCommand").is_some());
    assert!(json.get("manifestUrl").is_some());
}
