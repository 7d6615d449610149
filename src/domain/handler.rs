//! Query handler seam: the opaque `(request) -> rows` collaborator.
//!
//! The engine never executes queries itself. Embedders register
//! [`QueryHandler`] implementations under a name; the engine replays a
//! [`RequestDescriptor`] against the registered handler and treats the
//! returned JSON as the observed result set. Per-handler observation
//! options are resolved once at registration time through
//! [`HandlerConfig`], never by runtime introspection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::request::RequestDescriptor;
use crate::error::GatewayError;

/// Change detection mode of an observable handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDetection {
    /// Re-evaluate when a mutation signal hits one of the observer's
    /// tracked table dependencies.
    Push,
    /// Re-evaluate on a fixed interval timer.
    Poll {
        /// Seconds between evaluations.
        interval: Duration,
    },
}

/// Observation options attached to a handler at registration time.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Name of the field identifying each row.
    pub primary_key: String,
    /// Push (dependency-driven) or poll (timer-driven) detection.
    pub change_detection: ChangeDetection,
    /// Static table dependencies. When non-empty, these replace the
    /// tables discovered by interception during the first evaluation.
    pub dependencies: Vec<String>,
}

impl HandlerConfig {
    /// Push-mode config with interception-discovered dependencies.
    #[must_use]
    pub fn push(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            change_detection: ChangeDetection::Push,
            dependencies: Vec::new(),
        }
    }

    /// Push-mode config with an explicit static dependency list.
    #[must_use]
    pub fn push_with_dependencies(
        primary_key: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            primary_key: primary_key.into(),
            change_detection: ChangeDetection::Push,
            dependencies,
        }
    }

    /// Poll-mode config evaluating every `interval`.
    #[must_use]
    pub fn poll(primary_key: impl Into<String>, interval: Duration) -> Self {
        Self {
            primary_key: primary_key.into(),
            change_detection: ChangeDetection::Poll { interval },
            dependencies: Vec::new(),
        }
    }

    /// Poll interval when in poll mode.
    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.change_detection {
            ChangeDetection::Poll { interval } => Some(interval),
            ChangeDetection::Push => None,
        }
    }
}

/// Failure classification a handler reports to the engine.
///
/// The engine needs to distinguish "the resource is not there" from
/// "the query blew up": the former yields an empty result set, the
/// latter abandons the evaluation cycle.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The requested resource does not exist (404-equivalent). Treated
    /// as an empty result, not an error.
    #[error("not found")]
    NotFound,
    /// An object the query depends on (e.g. the caller's account) no
    /// longer exists. Collapsed into the empty-result path, same as
    /// [`HandlerError::NotFound`].
    #[error("referenced object no longer exists")]
    Gone,
    /// Any other failure. Logged with full context; the evaluation
    /// cycle is abandoned.
    #[error("handler failed: {0}")]
    Failed(String),
}

/// A replayable query execution: takes a request descriptor, returns
/// row data as JSON (a list of flat objects, a single object, or a
/// paginated `{"results": [...]}` envelope).
///
/// Implementations run their storage reads through
/// [`super::interceptor::record_table`] so push-mode dependency
/// discovery works.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Executes the query for the given request.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] classifying the failure; see the
    /// variant docs for how the engine reacts to each.
    async fn execute(&self, request: &RequestDescriptor) -> Result<Value, HandlerError>;
}

/// Named registry of observable handlers with their configs.
///
/// Built once at startup; shared immutably across the engine.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, (Arc<dyn QueryHandler>, HandlerConfig)>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `name`, replacing any previous
    /// registration with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn QueryHandler>,
        config: HandlerConfig,
    ) {
        self.handlers.insert(name.into(), (handler, config));
    }

    /// Looks up a handler and its config by name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownHandler`] when no handler is
    /// registered under `name`.
    pub fn get(&self, name: &str) -> Result<(Arc<dyn QueryHandler>, &HandlerConfig), GatewayError> {
        self.handlers
            .get(name)
            .map(|(handler, config)| (Arc::clone(handler), config))
            .ok_or_else(|| GatewayError::UnknownHandler(name.to_string()))
    }

    /// Returns the registered handler names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
