//! Downstream cluster client factory.
//!
//! The reconciler needs a client bound to the downstream cluster's API
//! server to manage `Plan` objects there. Credentials are published by the
//! registration flow as a kubeconfig Secret in the operator's namespace;
//! this module turns that Secret into a `kube::Client`.
//!
//! Error semantics matter more than the mechanism: a missing Secret means
//! the downstream cluster has not registered yet (transient), while a
//! malformed kubeconfig is a config error needing intervention.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::Cluster;

/// Key inside the kubeconfig Secret holding the serialized kubeconfig.
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Yields an authenticated client for a cluster's downstream API server.
#[async_trait]
pub trait DownstreamClientFactory: Send + Sync {
    async fn downstream_client(&self, cluster: &Cluster) -> Result<Client>;
}

/// Factory backed by per-cluster kubeconfig Secrets
/// (`<cluster-name>-kubeconfig`) in the operator's namespace.
pub struct KubeconfigSecretFactory {
    client: Client,
    namespace: String,
}

impl KubeconfigSecretFactory {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn secret_name(cluster: &Cluster) -> String {
        format!("{}-kubeconfig", cluster.name_any())
    }
}

#[async_trait]
impl DownstreamClientFactory for KubeconfigSecretFactory {
    async fn downstream_client(&self, cluster: &Cluster) -> Result<Client> {
        let name = Self::secret_name(cluster);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        let secret = match secrets.get(&name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::DownstreamNotReady(format!(
                    "kubeconfig secret {}/{} not published yet",
                    self.namespace, name
                )));
            }
            Err(e) => return Err(Error::Kube(e)),
        };

        let kubeconfig_bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .map(|b| b.0.clone())
            .ok_or_else(|| {
                Error::MissingField(format!("secret {}/{} has no '{}' key", self.namespace, name, KUBECONFIG_SECRET_KEY))
            })?;

        let kubeconfig: Kubeconfig = serde_yaml::from_slice(&kubeconfig_bytes)
            .map_err(|e| Error::Validation(format!("kubeconfig in secret {}/{} is malformed: {}", self.namespace, name, e)))?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        debug!(cluster = %cluster.name_any(), server = %config.cluster_url, "Built downstream client");
        Ok(Client::try_from(config)?)
    }
}
