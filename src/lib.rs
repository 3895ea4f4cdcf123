//! k3s-upgrade-operator library crate
//!
//! This module exports the upgrade controller, CRD definitions, the
//! registration command composer and the settings layer.

pub mod controller;
pub mod crd;
pub mod downstream;
pub mod health;
pub mod registration;
pub mod settings;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use controller::requeue::RequeueScheduler;
use controller::{context::Context, reconciler};
use crd::Cluster;
use downstream::{DownstreamClientFactory, KubeconfigSecretFactory};

/// Namespace the operator itself runs in, holding settings and kubeconfig
/// secrets for registered clusters.
pub const OPERATOR_NAMESPACE: &str = "cattle-system";

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test
/// environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Turn the re-enqueue channel into a trigger stream for the controller.
fn requeue_trigger_stream(
    rx: mpsc::UnboundedReceiver<ObjectRef<Cluster>>,
) -> impl Stream<Item = ObjectRef<Cluster>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|obj_ref| (obj_ref, rx))
    })
}

/// Run the upgrade controller.
///
/// Watches Cluster resources cluster-wide and reconciles their downstream
/// upgrade plans. Can be called from main.rs or spawned as a background
/// task during integration tests.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(client: Client, health_state: Option<Arc<HealthState>>) {
    let downstream: Arc<dyn DownstreamClientFactory> = Arc::new(KubeconfigSecretFactory::new(
        client.clone(),
        OPERATOR_NAMESPACE,
    ));
    run_controller_with_factory(client, downstream, health_state).await
}

/// Run the upgrade controller with a caller-supplied downstream factory.
///
/// Integration tests substitute a factory pointing at a local test cluster.
pub async fn run_controller_with_factory(
    client: Client,
    downstream: Arc<dyn DownstreamClientFactory>,
    health_state: Option<Arc<HealthState>>,
) {
    info!("Starting controller for Cluster resources");

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let (requeue, requeue_rx) = RequeueScheduler::new();
    let ctx = Arc::new(Context::new(
        client.clone(),
        downstream,
        requeue,
        health_state,
    ));

    let clusters: Api<Cluster> = Api::all(client);
    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config);

    // Plan progress happens downstream and never surfaces as an upstream
    // watch event; the scheduler's trigger stream fills that gap.
    Controller::for_stream(cluster_stream, reader)
        .reconcile_on(requeue_trigger_stream(requeue_rx))
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after deletion when
                    // re-enqueue triggers fire for a deleted cluster.
                    // Log these at debug level instead of error.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Cluster no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
