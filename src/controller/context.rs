//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the upstream Kubernetes client, the downstream client factory, the
//! re-enqueue scheduler and the event recorder identity.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::controller::requeue::RequeueScheduler;
use crate::crd::Cluster;
use crate::downstream::DownstreamClientFactory;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "k3s-upgrade-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Client bound to the upstream (management) cluster
    pub client: Client,
    /// Builds clients for downstream cluster API servers
    pub downstream: Arc<dyn DownstreamClientFactory>,
    /// Scheduler for cooperative re-enqueues of clusters
    pub requeue: Arc<RequeueScheduler>,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        downstream: Arc<dyn DownstreamClientFactory>,
        requeue: Arc<RequeueScheduler>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            downstream,
            requeue,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        cluster: &Cluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        cluster: &Cluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}
