//! Mutation signal intake from storage commit hooks.
//!
//! [`MutationHub`] is the entry point the storage layer calls after a
//! transaction commits. Signals must never be emitted mid-transaction:
//! observers would evaluate against uncommitted data. Suppression
//! (e.g. during schema migrations or bulk loads) is explicit per-call
//! state in [`SignalContext`], not a process-wide flag.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::protocol::MutationSignal;
use crate::error::GatewayError;
use crate::persistence::ObserverStore;
use crate::router::messages::ControlMessage;

/// Per-invocation context for signal emission.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalContext {
    /// When set, the signal is dropped without touching the router.
    /// Threaded through by callers running migrations or bulk imports.
    pub suppress: bool,
}

/// Receives table-level mutation announcements and forwards them to
/// the control plane when any observer depends on the table.
#[derive(Debug, Clone)]
pub struct MutationHub {
    store: Arc<ObserverStore>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl MutationHub {
    /// Creates a hub forwarding into the given control channel.
    #[must_use]
    pub fn new(store: Arc<ObserverStore>, control_tx: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self { store, control_tx }
    }

    /// Announces a committed table mutation.
    ///
    /// Returns `true` when the signal was forwarded to the control
    /// plane, `false` when it was suppressed or no observer depends on
    /// the table.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] when the dependency
    /// existence check fails.
    pub async fn notify(
        &self,
        signal: MutationSignal,
        ctx: SignalContext,
    ) -> Result<bool, GatewayError> {
        if ctx.suppress {
            return Ok(false);
        }

        // Don't wake the router when nobody is listening.
        if !self.store.table_has_dependents(&signal.table).await? {
            tracing::trace!(table = %signal.table, "no observers depend on table, dropping signal");
            return Ok(false);
        }

        if self
            .control_tx
            .send(ControlMessage::Mutation(signal))
            .is_err()
        {
            tracing::warn!("control channel closed, unable to notify workers");
            return Ok(false);
        }
        Ok(true)
    }
}
