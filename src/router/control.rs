//! Control plane: routes mutation signals and poll wakeups to workers.
//!
//! The control channel is cheap — it never invokes a handler. It looks
//! up observers depending on a mutated table, runs evaluate requests
//! through the [`ThrottleController`](super::throttle::ThrottleController)
//! and posts worker messages. Deferred throttle evaluations are
//! re-injected through the control channel after their delay.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::messages::{ControlMessage, WorkerMessage};
use super::throttle::{ThrottleController, ThrottleDecision};
use crate::domain::request::ObserverId;
use crate::persistence::ObserverStore;

/// The control plane task.
///
/// Owns the control receiver; sends evaluate messages to the worker
/// channel. A send failure means the workers are gone, which only
/// happens at shutdown and is logged, never propagated.
#[derive(Debug)]
pub struct ControlPlane {
    store: Arc<ObserverStore>,
    throttle: Arc<ThrottleController>,
    worker_tx: mpsc::Sender<WorkerMessage>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlPlane {
    /// Creates a control plane over the given store, throttle and
    /// channels. `control_tx` is the loopback used for deferred
    /// evaluations and poll wakeups.
    #[must_use]
    pub fn new(
        store: Arc<ObserverStore>,
        throttle: Arc<ThrottleController>,
        worker_tx: mpsc::Sender<WorkerMessage>,
        control_tx: mpsc::UnboundedSender<ControlMessage>,
    ) -> Self {
        Self {
            store,
            throttle,
            worker_tx,
            control_tx,
        }
    }

    /// Spawns the control loop, consuming messages until the channel
    /// closes.
    pub fn spawn(self, mut control_rx: mpsc::UnboundedReceiver<ControlMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = control_rx.recv().await {
                self.handle(message).await;
            }
            tracing::debug!("control channel closed, control plane stopping");
        })
    }

    /// Dispatches one control message.
    async fn handle(&self, message: ControlMessage) {
        match message {
            ControlMessage::Mutation(signal) => {
                let observers = match self.store.dependents_of_table(&signal.table).await {
                    Ok(observers) => observers,
                    Err(err) => {
                        tracing::error!(table = %signal.table, error = %err,
                            "failed to look up observers for mutated table");
                        return;
                    }
                };
                tracing::debug!(table = %signal.table, kind = ?signal.kind,
                    observers = observers.len(), "table mutation routed");
                for observer in observers {
                    self.dispatch(observer).await;
                }
            }
            ControlMessage::SchedulePoll { observer, interval } => {
                let control_tx = self.control_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(interval).await;
                    let _ = control_tx.send(ControlMessage::Evaluate { observer });
                });
            }
            ControlMessage::Evaluate { observer } => {
                self.dispatch(observer).await;
            }
            ControlMessage::Deferred { observer } => {
                // The one deferred evaluation of a throttle window.
                self.send_to_worker(observer).await;
            }
        }
    }

    /// Runs an evaluate request through the throttle and acts on the
    /// decision.
    async fn dispatch(&self, observer: ObserverId) {
        match self.throttle.admit(&observer) {
            ThrottleDecision::Proceed => self.send_to_worker(observer).await,
            ThrottleDecision::Defer(delay) => {
                let control_tx = self.control_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = control_tx.send(ControlMessage::Deferred { observer });
                });
            }
            ThrottleDecision::Coalesced => {}
        }
    }

    async fn send_to_worker(&self, observer: ObserverId) {
        if self
            .worker_tx
            .send(WorkerMessage::Evaluate { observer })
            .await
            .is_err()
        {
            tracing::warn!("worker channel closed, dropping evaluate message");
        }
    }
}
