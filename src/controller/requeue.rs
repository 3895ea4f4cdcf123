//! Cooperative re-enqueue scheduler.
//!
//! The controller watches upstream `Cluster` objects only; downstream plan
//! progress never produces an upstream event. When a reconcile observes
//! pending progress without a persistable change, it asks this scheduler
//! to trigger the same cluster again after a bounded delay.
//!
//! Repeated schedules for the same cluster collapse to the earliest
//! pending deadline, so a hot reconcile loop cannot pile up triggers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::reflector::ObjectRef;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::debug;

use crate::crd::Cluster;

pub struct RequeueScheduler {
    tx: mpsc::UnboundedSender<ObjectRef<Cluster>>,
    pending: Mutex<HashMap<String, Instant>>,
}

impl RequeueScheduler {
    /// Create a scheduler and the receiver feeding the controller's
    /// trigger stream (see `Controller::reconcile_on` wiring in `lib.rs`).
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ObjectRef<Cluster>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                pending: Mutex::new(HashMap::new()),
            }),
            rx,
        )
    }

    /// Request that `name` be reconciled again after at least `delay`.
    ///
    /// If a trigger for the same cluster is already pending at an earlier
    /// or equal deadline, this call is a no-op.
    pub async fn enqueue_after(self: &Arc<Self>, name: &str, delay: Duration) {
        let deadline = Instant::now() + delay;
        {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(name)
                && *existing <= deadline
            {
                debug!(name = %name, "Re-enqueue already pending");
                return;
            }
            pending.insert(name.to_string(), deadline);
        }

        debug!(name = %name, delay_secs = delay.as_secs(), "Scheduling re-enqueue");
        let scheduler = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut pending = scheduler.pending.lock().await;
                // an earlier reschedule owns the entry now; stand down so
                // only one trigger fires per pending deadline
                if pending.get(&name) != Some(&deadline) {
                    return;
                }
                pending.remove(&name);
            }
            // receiver dropped means the controller is shutting down
            let _ = scheduler.tx.send(ObjectRef::new(&name));
        });
    }
}
