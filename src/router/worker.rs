//! Worker pool: executes observer evaluations.
//!
//! N tasks drain a shared worker channel. Each message re-executes one
//! observer's handler, diffs against the snapshot and notifies
//! subscribers. A failure in one evaluation is logged and never affects
//! another observer or the pool's ability to process the next message.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::messages::WorkerMessage;
use crate::service::ObserverService;

/// Spawns `count` worker tasks draining `worker_rx`.
///
/// The receiver is shared behind a mutex; each worker locks it only
/// long enough to take the next message, so a long evaluation on one
/// worker never blocks the others from receiving.
pub fn spawn_workers(
    service: Arc<ObserverService>,
    worker_rx: mpsc::Receiver<WorkerMessage>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let worker_rx = Arc::new(Mutex::new(worker_rx));
    (0..count.max(1))
        .map(|worker| {
            let service = Arc::clone(&service);
            let worker_rx = Arc::clone(&worker_rx);
            tokio::spawn(async move {
                loop {
                    let message = { worker_rx.lock().await.recv().await };
                    let Some(message) = message else {
                        tracing::debug!(worker, "worker channel closed, stopping");
                        break;
                    };
                    match message {
                        WorkerMessage::Evaluate { observer } => {
                            if let Err(err) = service.evaluate(&observer).await {
                                tracing::error!(worker, observer = %observer, error = %err,
                                    "observer evaluation failed");
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
