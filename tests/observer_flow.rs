//! End-to-end observer flow tests against a real PostgreSQL instance.
//!
//! These tests exercise the full subscribe → mutate → notify → evaluate
//! → deliver pipeline and the concurrency-sensitive store operations.
//! They require a running PostgreSQL reachable via `DATABASE_URL` and
//! are ignored by default.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{Mutex, mpsc};
use tokio_test::assert_ok;

use livequery_gateway::config::ObserverSettings;
use livequery_gateway::domain::handler::{
    HandlerConfig, HandlerError, HandlerRegistry, QueryHandler,
};
use livequery_gateway::domain::interceptor;
use livequery_gateway::domain::protocol::{ItemAction, ItemMessage, MutationKind, MutationSignal};
use livequery_gateway::domain::request::RequestDescriptor;
use livequery_gateway::domain::EventBus;
use livequery_gateway::persistence::ObserverStore;
use livequery_gateway::router::{ControlPlane, ThrottleController, spawn_workers};
use livequery_gateway::service::{MutationHub, ObserverService, SignalContext};

/// Handler backed by an in-memory row list the test mutates directly,
/// standing in for the external query-execution framework.
#[derive(Debug)]
struct TableHandler {
    table: String,
    rows: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl QueryHandler for TableHandler {
    async fn execute(&self, _request: &RequestDescriptor) -> Result<Value, HandlerError> {
        interceptor::record_table(&self.table);
        Ok(Value::Array(self.rows.lock().await.clone()))
    }
}

struct Harness {
    store: Arc<ObserverStore>,
    service: Arc<ObserverService>,
    hub: MutationHub,
    bus: EventBus,
    rows: Arc<Mutex<Vec<Value>>>,
    table: String,
}

/// Builds a full engine stack (store, service, control plane, workers)
/// around one in-memory handler observing `table`.
async fn harness(handler_name: &str, table: &str, throttle: Duration) -> Harness {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let store = Arc::new(ObserverStore::new(pool));
    let bus = EventBus::new(256);
    let rows = Arc::new(Mutex::new(Vec::new()));

    let mut registry = HandlerRegistry::new();
    registry.register(
        handler_name,
        Arc::new(TableHandler {
            table: table.to_string(),
            rows: Arc::clone(&rows),
        }),
        HandlerConfig::push("id"),
    );
    let registry = Arc::new(registry);

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (worker_tx, worker_rx) = mpsc::channel(64);

    let service = Arc::new(ObserverService::new(
        Arc::clone(&store),
        registry,
        bus.clone(),
        control_tx.clone(),
        ObserverSettings {
            throttle_rate: throttle,
            ..ObserverSettings::default()
        },
    ));

    ControlPlane::new(
        Arc::clone(&store),
        Arc::new(ThrottleController::new(throttle)),
        worker_tx,
        control_tx.clone(),
    )
    .spawn(control_rx);
    spawn_workers(Arc::clone(&service), worker_rx, 2);

    let hub = MutationHub::new(Arc::clone(&store), control_tx);

    Harness {
        store,
        service,
        hub,
        bus,
        rows,
        table: table.to_string(),
    }
}

fn descriptor(handler: &str, query: &[(&str, &str)]) -> RequestDescriptor {
    RequestDescriptor::new(
        handler,
        "list",
        "GET",
        query
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        format!("/api/v1/query/{handler}"),
        None,
    )
}

fn create_signal(table: &str) -> MutationSignal {
    MutationSignal {
        table: table.to_string(),
        kind: MutationKind::Create,
        primary_key: Some("1".to_string()),
    }
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn subscribe_is_idempotent() {
    let h = harness("idempotent_list", "idempotent_rows", Duration::ZERO).await;
    let descriptor = descriptor("idempotent_list", &[]);

    let first = assert_ok!(h.service.subscribe(&descriptor, "sess-idem").await);
    let second = assert_ok!(h.service.subscribe(&descriptor, "sess-idem").await);

    assert_eq!(first.observer, second.observer);
    assert_eq!(h.store.subscriber_count(&first.observer).await.unwrap(), 1);

    h.store.remove_session("sess-idem").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn identical_queries_share_one_observer() {
    let h = harness("dedup_list", "dedup_rows", Duration::ZERO).await;
    let descriptor = descriptor("dedup_list", &[("enabled", "true")]);

    let a = assert_ok!(h.service.subscribe(&descriptor, "sess-dedup-a").await);
    let b = assert_ok!(h.service.subscribe(&descriptor, "sess-dedup-b").await);

    assert_eq!(a.observer, b.observer);
    assert_eq!(h.store.subscriber_count(&a.observer).await.unwrap(), 2);

    h.store.remove_session("sess-dedup-a").await.unwrap();
    h.store.remove_session("sess-dedup-b").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn end_to_end_insert_delivers_one_added_event() {
    let h = harness("e2e_list", "e2e_rows", Duration::ZERO).await;
    let descriptor = descriptor("e2e_list", &[]);

    let mut bus_rx = h.bus.subscribe();

    // Subscribe against an empty table.
    let subscription = h.service.subscribe(&descriptor, "sess-e2e").await.unwrap();
    assert!(subscription.items.is_empty());

    // Insert one row, then fire the commit hook.
    h.rows
        .lock()
        .await
        .push(json!({"id": 1, "enabled": true, "name": "hello world"}));
    let forwarded = h
        .hub
        .notify(create_signal(&h.table), SignalContext::default())
        .await
        .unwrap();
    assert!(forwarded);

    // Exactly one added event with order 0 and the inserted fields.
    let notice = tokio::time::timeout(Duration::from_secs(5), bus_rx.recv())
        .await
        .expect("no update within 5s")
        .unwrap();
    assert_eq!(notice.session_id, "sess-e2e");
    let messages = ItemMessage::demultiplex(&notice.update);
    assert_eq!(messages.len(), 1);
    let first = messages.first().unwrap();
    assert_eq!(first.msg, ItemAction::Added);
    assert_eq!(first.order, 0);
    assert_eq!(
        first.item,
        json!({"id": 1, "enabled": true, "name": "hello world"})
    );

    // The persisted snapshot now matches the delivered state.
    let snapshot = h.store.snapshot(&subscription.observer).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.first().unwrap().primary_key, "1");

    h.store.remove_session("sess-e2e").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn change_and_removal_produce_matching_events() {
    let h = harness("mutate_list", "mutate_rows", Duration::ZERO).await;
    let descriptor = descriptor("mutate_list", &[]);

    h.rows.lock().await.push(json!({"id": 1, "name": "before"}));
    let subscription = h.service.subscribe(&descriptor, "sess-mutate").await.unwrap();
    assert_eq!(subscription.items.len(), 1);

    // Mutate the tracked row.
    {
        let mut rows = h.rows.lock().await;
        rows.clear();
        rows.push(json!({"id": 1, "name": "after"}));
    }
    let delta = h.service.evaluate(&subscription.observer).await.unwrap().unwrap();
    assert_eq!(delta.changed.len(), 1);
    assert!(delta.added.is_empty() && delta.removed.is_empty());

    // Remove it and add two others in the same cycle.
    {
        let mut rows = h.rows.lock().await;
        rows.clear();
        rows.push(json!({"id": 2, "name": "x"}));
        rows.push(json!({"id": 3, "name": "y"}));
    }
    let delta = h.service.evaluate(&subscription.observer).await.unwrap().unwrap();
    assert_eq!(delta.added.len(), 2);
    assert_eq!(delta.removed.len(), 1);
    assert!(delta.changed.is_empty());

    h.store.remove_session("sess-mutate").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn evaluation_skips_observer_without_subscribers() {
    let h = harness("skip_list", "skip_rows", Duration::ZERO).await;
    let descriptor = descriptor("skip_list", &[]);

    let subscription = h.service.subscribe(&descriptor, "sess-skip").await.unwrap();
    h.service
        .unsubscribe(&subscription.observer, "sess-skip")
        .await
        .unwrap();

    // Observer was garbage-collected with its last subscriber.
    assert!(h.store.get(&subscription.observer).await.unwrap().is_none());
    assert!(h.service.evaluate(&subscription.observer).await.unwrap().is_none());

    h.store.remove_session("sess-skip").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn dependencies_are_recorded_from_interception() {
    let h = harness("dep_list", "dep_rows", Duration::ZERO).await;
    let descriptor = descriptor("dep_list", &[]);

    let subscription = h.service.subscribe(&descriptor, "sess-dep").await.unwrap();

    assert!(h.store.table_has_dependents("dep_rows").await.unwrap());
    let dependents = h.store.dependents_of_table("dep_rows").await.unwrap();
    assert!(dependents.contains(&subscription.observer));

    h.store.remove_session("sess-dep").await.unwrap();
    // Cascade removed the dependency rows with the observer.
    assert!(h.store.dependents_of_table("dep_rows").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn clear_drops_all_observer_state() {
    let h = harness("reset_list", "reset_rows", Duration::ZERO).await;
    let descriptor = descriptor("reset_list", &[]);

    let subscription = h.service.subscribe(&descriptor, "sess-reset").await.unwrap();
    assert!(h.store.get(&subscription.observer).await.unwrap().is_some());

    h.store.clear().await.unwrap();

    assert!(h.store.get(&subscription.observer).await.unwrap().is_none());
    assert!(!h.store.table_has_dependents("reset_rows").await.unwrap());
    assert_eq!(h.store.subscriber_count(&subscription.observer).await.unwrap(), 0);
}

/// Handler that takes far longer than the error threshold used below.
#[derive(Debug)]
struct SlowHandler;

#[async_trait]
impl QueryHandler for SlowHandler {
    async fn execute(&self, _request: &RequestDescriptor) -> Result<Value, HandlerError> {
        interceptor::record_table("slow_rows");
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!([{"id": 1, "name": "slow"}]))
    }
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn slow_evaluation_strips_subscribers_but_keeps_the_observer() {
    let h = harness("slow_base_list", "slow_base_rows", Duration::ZERO).await;

    let mut registry = HandlerRegistry::new();
    registry.register("slow_list", Arc::new(SlowHandler), HandlerConfig::push("id"));
    let (control_tx, _control_rx) = mpsc::unbounded_channel();
    let service = Arc::new(ObserverService::new(
        Arc::clone(&h.store),
        Arc::new(registry),
        h.bus.clone(),
        control_tx,
        ObserverSettings {
            warn_processing_time: Duration::from_millis(1),
            error_processing_time: Duration::from_millis(1),
            ..ObserverSettings::default()
        },
    ));

    let descriptor = descriptor("slow_list", &[]);
    let subscription = service.subscribe(&descriptor, "sess-slow").await.unwrap();
    assert_eq!(h.store.subscriber_count(&subscription.observer).await.unwrap(), 1);

    let delta = service.evaluate(&subscription.observer).await.unwrap();
    assert!(delta.is_some());

    // Circuit breaker: every subscriber stripped, observer row and
    // snapshot preserved.
    assert_eq!(h.store.subscriber_count(&subscription.observer).await.unwrap(), 0);
    assert!(h.store.get(&subscription.observer).await.unwrap().is_some());
    assert_eq!(h.store.snapshot(&subscription.observer).await.unwrap().len(), 1);

    h.store.remove_session("sess-slow").await.unwrap();
}

/// Handler that never reports a table read.
#[derive(Debug)]
struct UntrackedHandler;

#[async_trait]
impl QueryHandler for UntrackedHandler {
    async fn execute(&self, _request: &RequestDescriptor) -> Result<Value, HandlerError> {
        Ok(json!([{"id": 1, "name": "static"}]))
    }
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn push_observer_without_dependencies_stays_subscribed_but_inert() {
    let h = harness("inert_list", "inert_rows", Duration::ZERO).await;

    let mut registry = HandlerRegistry::new();
    registry.register("untracked_list", Arc::new(UntrackedHandler), HandlerConfig::push("id"));
    let service = Arc::new(ObserverService::new(
        Arc::clone(&h.store),
        Arc::new(registry),
        h.bus.clone(),
        {
            let (control_tx, _control_rx) = mpsc::unbounded_channel();
            control_tx
        },
        ObserverSettings::default(),
    ));

    let descriptor = descriptor("untracked_list", &[]);
    let subscription = service.subscribe(&descriptor, "sess-inert").await.unwrap();

    // The initial result is served and the subscription persists, but
    // no table dependency exists, so no mutation can ever wake it.
    assert_eq!(subscription.items.len(), 1);
    assert_eq!(h.store.subscriber_count(&subscription.observer).await.unwrap(), 1);
    assert!(h.store.dependents_of_table("inert_rows").await.unwrap().is_empty());
    let forwarded = h
        .hub
        .notify(create_signal("inert_rows"), SignalContext::default())
        .await
        .unwrap();
    assert!(!forwarded);

    h.store.remove_session("sess-inert").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn impossible_filters_collapse_to_the_same_empty_behavior() {
    let h = harness("empty_list", "empty_rows", Duration::ZERO).await;

    let a = descriptor("empty_list", &[("id__in", "")]);
    let b = descriptor("empty_list", &[("name", "no-such-row")]);

    let sub_a = h.service.subscribe(&a, "sess-empty").await.unwrap();
    let sub_b = h.service.subscribe(&b, "sess-empty").await.unwrap();

    // Different impossible predicates: distinct observers, identical
    // empty behavior.
    assert_ne!(sub_a.observer, sub_b.observer);
    assert!(sub_a.items.is_empty());
    assert!(sub_b.items.is_empty());
    assert!(h.service.evaluate(&sub_a.observer).await.unwrap().unwrap().is_empty());
    assert!(h.service.evaluate(&sub_b.observer).await.unwrap().unwrap().is_empty());

    h.store.remove_session("sess-empty").await.unwrap();
}
