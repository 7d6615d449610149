//! Observer orchestration: subscribe and evaluate.
//!
//! [`ObserverService`] binds the durable state store, the handler
//! registry and the session event bus together. `subscribe` is the
//! synchronous path serving the initial result set; `evaluate` is the
//! worker path re-executing the handler, diffing against the persisted
//! snapshot and fanning the delta out to subscribed sessions.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ObserverSettings;
use crate::domain::diff::{self, Diff};
use crate::domain::event_bus::{EventBus, SessionNotice};
use crate::domain::handler::{ChangeDetection, HandlerError, HandlerRegistry};
use crate::domain::interceptor;
use crate::domain::protocol::ObserverUpdate;
use crate::domain::request::{ObserverId, RequestDescriptor};
use crate::error::GatewayError;
use crate::persistence::ObserverStore;
use crate::router::messages::ControlMessage;

/// Result of a successful subscribe: the observer fingerprint and the
/// full current row set.
#[derive(Debug)]
pub struct Subscription {
    /// Fingerprint of the (possibly shared) observer.
    pub observer: ObserverId,
    /// Current rows, in result order.
    pub items: Vec<Value>,
}

/// Orchestration layer for observer subscription and evaluation.
///
/// Stateless coordinator: all mutable state lives in the
/// [`ObserverStore`]; notifications go out through the [`EventBus`];
/// poll scheduling goes through the control channel.
#[derive(Debug)]
pub struct ObserverService {
    store: Arc<ObserverStore>,
    registry: Arc<HandlerRegistry>,
    bus: EventBus,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    settings: ObserverSettings,
}

impl ObserverService {
    /// Creates a new `ObserverService`.
    #[must_use]
    pub fn new(
        store: Arc<ObserverStore>,
        registry: Arc<HandlerRegistry>,
        bus: EventBus,
        control_tx: mpsc::UnboundedSender<ControlMessage>,
        settings: ObserverSettings,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            control_tx,
            settings,
        }
    }

    /// Returns a reference to the inner [`ObserverStore`].
    #[must_use]
    pub fn store(&self) -> &Arc<ObserverStore> {
        &self.store
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Executes a handler without observing: the non-reactive
    /// passthrough path.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownHandler`] for unregistered
    /// handlers, [`GatewayError::NotFound`] when the handler reports a
    /// missing resource, and [`GatewayError::Internal`] for other
    /// handler failures.
    pub async fn execute_once(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<Value, GatewayError> {
        let (handler, _config) = self.registry.get(&descriptor.handler)?;
        match handler.execute(descriptor).await {
            Ok(value) => Ok(value),
            Err(HandlerError::NotFound | HandlerError::Gone) => Err(GatewayError::NotFound),
            Err(HandlerError::Failed(message)) => Err(GatewayError::Internal(message)),
        }
    }

    /// Subscribes a session to the observer identified by the request
    /// descriptor's fingerprint and returns the current result set.
    ///
    /// Idempotent: subscribing the same session twice, or two sessions
    /// subscribing to the same fingerprint, share one observer row and
    /// one dependency set. The handler runs once under the dependency
    /// interceptor; discovered (or statically configured) tables become
    /// the observer's dependencies in push mode, while poll mode
    /// schedules its first timer wakeup. The initial snapshot is
    /// persisted before returning.
    ///
    /// # Errors
    ///
    /// Fails only for configuration and bad-input errors (unknown
    /// handler, malformed result, missing primary key) and for
    /// persistence failures. Handler-side failures degrade to an empty
    /// result set, as they do during steady-state evaluation.
    pub async fn subscribe(
        &self,
        descriptor: &RequestDescriptor,
        session_id: &str,
    ) -> Result<Subscription, GatewayError> {
        let (handler, config) = self.registry.get(&descriptor.handler)?;
        let config = config.clone();
        let observer_id = descriptor.observer_id();

        let poll_interval = config
            .poll_interval()
            .map(|interval| i32::try_from(interval.as_secs()).unwrap_or(i32::MAX));
        let request_json = serde_json::to_value(descriptor)
            .map_err(|err| GatewayError::Internal(err.to_string()))?;

        self.store
            .subscribe(&observer_id, &request_json, poll_interval, session_id)
            .await?;

        // Execute the handler once under the dependency interceptor.
        let mut touched = HashSet::new();
        let rows = match interceptor::intercept(&mut touched, handler.execute(descriptor)).await {
            Ok(value) => diff::normalize_rows(value, &config.primary_key)?,
            Err(HandlerError::NotFound | HandlerError::Gone) => Vec::new(),
            Err(HandlerError::Failed(message)) => {
                tracing::error!(observer = %observer_id, handler = %descriptor.handler,
                    path = %descriptor.path, query = ?descriptor.query, error = %message,
                    "handler failed during subscribe");
                Vec::new()
            }
        };

        match config.change_detection {
            ChangeDetection::Push => {
                let tables: Vec<String> = if config.dependencies.is_empty() {
                    touched.into_iter().collect()
                } else {
                    config.dependencies.clone()
                };

                if tables.is_empty() {
                    // No table reads observed: the observer stays valid
                    // as a one-shot but nothing will ever re-evaluate
                    // it via mutation signals.
                    tracing::debug!(observer = %observer_id, handler = %descriptor.handler,
                        "push observer discovered no table dependencies");
                } else if !self.store.insert_dependencies(&observer_id, &tables).await? {
                    // Observer removed before dependencies were
                    // created; return the results we already have.
                    return Ok(Subscription {
                        observer: observer_id,
                        items: rows.into_iter().map(Value::Object).collect(),
                    });
                }
            }
            ChangeDetection::Poll { interval } => {
                let _ = self.control_tx.send(ControlMessage::SchedulePoll {
                    observer: observer_id.clone(),
                    interval,
                });
            }
        }

        self.warn_on_result_length(&observer_id, descriptor, rows.len());

        // Initial evaluation: persist the snapshot. The diff (added =
        // everything) is not broadcast; the caller gets the full result
        // synchronously.
        self.store
            .replace_snapshot(&observer_id, rows.clone(), &config.primary_key)
            .await?;

        Ok(Subscription {
            observer: observer_id,
            items: rows.into_iter().map(Value::Object).collect(),
        })
    }

    /// Removes one subscription; deletes the observer (items and
    /// dependencies cascade) when the subscriber set becomes empty.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    pub async fn unsubscribe(
        &self,
        observer_id: &ObserverId,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        self.store.remove_subscriber(observer_id, session_id).await
    }

    /// Re-evaluates an observer: re-executes its handler from the
    /// persisted request descriptor, diffs against the snapshot,
    /// atomically replaces it and notifies subscribed sessions.
    ///
    /// Returns `Ok(None)` when the evaluation was skipped (observer
    /// gone, zero subscribers) or abandoned after a logged handler
    /// failure. A non-`None` diff may still be empty, in which case no
    /// notifications were emitted.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure
    /// around the skip checks or snapshot replacement; handler errors
    /// never propagate.
    pub async fn evaluate(&self, observer_id: &ObserverId) -> Result<Option<Diff>, GatewayError> {
        let Some(record) = self.store.get(observer_id).await? else {
            return Ok(None);
        };

        // Cheap existence check before any handler work.
        if self.store.subscriber_count(observer_id).await? == 0 {
            tracing::trace!(observer = %observer_id, "observer has no subscribers, skipping");
            return Ok(None);
        }

        let descriptor: RequestDescriptor = match serde_json::from_value(record.request) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::error!(observer = %observer_id, error = %err,
                    "persisted request descriptor failed to decode");
                return Ok(None);
            }
        };

        let (handler, config) = match self.registry.get(&descriptor.handler) {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(observer = %observer_id, handler = %descriptor.handler,
                    path = %descriptor.path, query = ?descriptor.query, error = %err,
                    "observer references an unregistered handler");
                return Ok(None);
            }
        };
        let config = config.clone();

        // Dependencies were persisted on first evaluation and are
        // treated as stable for this fingerprint; no re-interception.
        let start = Instant::now();
        let rows: Vec<Map<String, Value>> = match handler.execute(&descriptor).await {
            Ok(value) => match diff::normalize_rows(value, &config.primary_key) {
                Ok(rows) => rows,
                Err(err) => {
                    self.log_evaluation_error(observer_id, &descriptor, &err);
                    return Ok(None);
                }
            },
            Err(HandlerError::NotFound | HandlerError::Gone) => Vec::new(),
            Err(HandlerError::Failed(message)) => {
                self.log_evaluation_error(
                    observer_id,
                    &descriptor,
                    &GatewayError::Internal(message),
                );
                return Ok(None);
            }
        };

        self.warn_on_result_length(observer_id, &descriptor, rows.len());

        let delta = match self
            .store
            .replace_snapshot(observer_id, rows, &config.primary_key)
            .await
        {
            Ok(Some(delta)) => delta,
            // Observer removed mid-flight; nothing to notify.
            Ok(None) => return Ok(None),
            Err(err @ GatewayError::MissingPrimaryKeyField(_)) => {
                self.log_evaluation_error(observer_id, &descriptor, &err);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let duration = start.elapsed();
        if duration > self.settings.warn_processing_time {
            tracing::warn!(observer = %observer_id, handler = %descriptor.handler,
                path = %descriptor.path, duration_ms = duration.as_millis() as u64,
                "slow observed handler");
        }
        if duration > self.settings.error_processing_time {
            tracing::error!(observer = %observer_id, handler = %descriptor.handler,
                path = %descriptor.path, duration_ms = duration.as_millis() as u64,
                "removing subscribers of extremely slow observed handler");
            self.store.remove_all_subscribers(observer_id).await?;
        }

        if let ChangeDetection::Poll { interval } = config.change_detection {
            let _ = self.control_tx.send(ControlMessage::SchedulePoll {
                observer: observer_id.clone(),
                interval,
            });
        }

        if !delta.is_empty() {
            let sessions = self.store.subscriber_sessions(observer_id).await?;
            if !sessions.is_empty() {
                let update = ObserverUpdate::from_diff(
                    observer_id.clone(),
                    config.primary_key.clone(),
                    delta.clone(),
                );
                for session_id in sessions {
                    self.bus.publish(SessionNotice {
                        session_id,
                        update: update.clone(),
                    });
                }
            }
        }

        Ok(Some(delta))
    }

    fn warn_on_result_length(
        &self,
        observer_id: &ObserverId,
        descriptor: &RequestDescriptor,
        length: usize,
    ) {
        if length > self.settings.warn_result_length {
            tracing::warn!(observer = %observer_id, handler = %descriptor.handler,
                path = %descriptor.path, results = length,
                "observed handler returns too many results");
        }
    }

    fn log_evaluation_error(
        &self,
        observer_id: &ObserverId,
        descriptor: &RequestDescriptor,
        err: &GatewayError,
    ) {
        tracing::error!(observer = %observer_id, handler = %descriptor.handler,
            path = %descriptor.path, query = ?descriptor.query, error = %err,
            "error while evaluating observer");
    }
}
