//! Agent image resolution against a cluster's private registry.

use crate::crd::Cluster;

/// The registry URL new nodes should pull agent images from, if the cluster
/// configures one. The registry flagged as default wins; otherwise the first
/// listed registry is used.
pub fn private_repo_url(cluster: Option<&Cluster>) -> Option<String> {
    let registries = &cluster?.spec.private_registries;
    registries
        .iter()
        .find(|r| r.is_default)
        .or_else(|| registries.first())
        .map(|r| r.url.trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
}

/// Prefix `image` with the cluster's private registry, unless it already
/// carries that prefix.
pub fn resolve_with_cluster(image: &str, cluster: Option<&Cluster>) -> String {
    match private_repo_url(cluster) {
        Some(repo) if !image.starts_with(&format!("{repo}/")) => format!("{repo}/{image}"),
        _ => image.to_string(),
    }
}
