//! End-to-end behaviour of the sync layer against a fake backend.

mod common;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::json;

use common::{agent, config, record, FakeBackend};
use farmshop_core::MODE_PREFERENCE_KEY;
use farmshop_sync::events::drain_events;
use farmshop_sync::{Layer, Mode, Operation, Request, Response, ResponseSource, SyncEvent, WriteOutcome};

#[tokio::test]
async fn force_local_overrides_stored_remote_preference() {
    let mut config = config();
    config.mode.force_local = true;
    let backend = FakeBackend::status(StatusCode::OK);
    let (agent, mut events) = agent(config, backend.clone());

    agent
        .context()
        .db()
        .preferences()
        .set(MODE_PREFERENCE_KEY, "remote")
        .await
        .unwrap();

    assert_eq!(agent.initialize().await.unwrap(), Mode::Local);
    assert_eq!(agent.mode_controller().current_mode(), Mode::Local);
    assert!(agent.mode_controller().is_interceptor_installed());
    assert_eq!(drain_events(&mut events), vec![SyncEvent::Mode { mode: Mode::Local }]);

    // Reads are served locally; the backend never hears about them.
    agent.fetch_table("orders").await.unwrap();
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn switching_to_remote_under_force_local_is_rejected() {
    let mut config = config();
    config.mode.force_local = true;
    let (agent, mut events) = agent(config, FakeBackend::status(StatusCode::OK));
    agent.initialize().await.unwrap();
    drain_events(&mut events);

    let modes = agent.mode_controller();
    assert!(!modes.switch_mode(Mode::Remote).await.unwrap());
    assert_eq!(modes.current_mode(), Mode::Local);
    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [SyncEvent::Notice { .. }]
    ));

    assert!(modes.switch_mode(Mode::Local).await.unwrap());
}

#[tokio::test]
async fn switching_without_override_changes_and_persists_mode() {
    let (agent, _events) = agent(config(), FakeBackend::status(StatusCode::OK));
    assert_eq!(agent.initialize().await.unwrap(), Mode::Remote);

    assert!(agent.mode_controller().switch_mode(Mode::Local).await.unwrap());
    assert_eq!(agent.mode_controller().current_mode(), Mode::Local);

    // Re-initializing picks the stored preference up.
    assert_eq!(agent.initialize().await.unwrap(), Mode::Local);
}

#[tokio::test]
async fn initializing_twice_never_stacks_interceptors() {
    let mut config = config();
    config.mode.default = Mode::Local;
    let (agent, _events) = agent(config, FakeBackend::status(StatusCode::OK));

    let first = agent.initialize().await.unwrap();
    let layers_once = agent.mode_controller().transport().layers();

    let second = agent.initialize().await.unwrap();
    let layers_twice = agent.mode_controller().transport().layers();

    assert_eq!(first, second);
    assert_eq!(layers_once, layers_twice);
    assert_eq!(layers_twice, vec![Layer::LocalInterceptor, Layer::Auth]);

    agent.mode_controller().apply_mode(Mode::Local);
    assert_eq!(agent.mode_controller().transport().layers(), layers_once);
}

#[tokio::test]
async fn server_error_on_customers_returns_cached_rows() {
    let backend = FakeBackend::status(StatusCode::INTERNAL_SERVER_ERROR);
    let (agent, mut events) = agent(config(), backend.clone());
    agent.initialize().await.unwrap();
    drain_events(&mut events);

    let cached = vec![
        record(json!({ "id": "c-1", "name": "Camille", "phone": "+33612345678" })),
        record(json!({ "id": "c-2", "name": "Idris" })),
    ];
    agent.context().db().cache().set("customers", &cached).await.unwrap();

    let url = format!("{}?limit=1", agent.context().config().table_url("farm_customers", None));
    let response = agent.mode_controller().transport().send(Request::get(url)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.source(), ResponseSource::Fallback);
    assert_eq!(response.envelope().data, cached);
    assert!(!agent.status().await.unwrap().reachable);

    // The backend did see the request, under its physical table name.
    assert!(backend.requests()[0].url.contains("/tables/farm_customers?limit=1"));

    // Repeated failures still fall back but notify only once.
    agent.fetch_table("customers").await.unwrap();
    let unreachable = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Unreachable { .. }))
        .count();
    assert_eq!(unreachable, 1);
}

#[tokio::test]
async fn caller_apikey_is_never_overwritten() {
    let backend = FakeBackend::status(StatusCode::OK);
    let (agent, _events) = agent(config(), backend.clone());
    agent.initialize().await.unwrap();

    let url = agent.context().config().table_url("orders", None);
    let request = Request::get(url)
        .with_header(HeaderName::from_static("apikey"), HeaderValue::from_static("service-key"));
    agent.mode_controller().transport().send(request).await.unwrap();

    let seen = &backend.requests()[0];
    assert_eq!(seen.header("apikey"), Some("service-key"));
    assert_eq!(seen.header("authorization"), Some("Bearer anon-123"));
}

#[tokio::test]
async fn outbox_preserves_fifo_order_across_partial_replay() {
    let backend = FakeBackend::status(StatusCode::OK);
    let (agent, _events) = agent(config(), backend.clone());
    let outbox = agent.context().db().outbox();

    let row = record(json!({ "id": "o-1", "status": "new" }));
    let ids = [
        outbox.enqueue("orders", Operation::Insert, &row).await.unwrap(),
        outbox.enqueue("orders", Operation::Update, &row).await.unwrap(),
        outbox.enqueue("orders", Operation::Delete, &row).await.unwrap(),
    ];
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let pending = outbox.list_pending().await.unwrap();
    let ops: Vec<Operation> = pending.iter().map(|i| i.operation).collect();
    assert_eq!(ops, vec![Operation::Insert, Operation::Update, Operation::Delete]);

    // Replay and acknowledge the first item by hand.
    let first = &pending[0];
    let url = agent.context().config().table_url("orders", None);
    agent
        .mode_controller()
        .base_transport()
        .send(Request::for_operation(first.operation, url, &first.payload))
        .await
        .unwrap();
    assert!(outbox.remove(first.id).await.unwrap());
    assert!(!outbox.remove(first.id).await.unwrap());

    let rest: Vec<(i64, Operation)> = outbox
        .list_pending()
        .await
        .unwrap()
        .into_iter()
        .map(|i| (i.id, i.operation))
        .collect();
    assert_eq!(rest, vec![(ids[1], Operation::Update), (ids[2], Operation::Delete)]);
}

#[tokio::test]
async fn offline_writes_replay_in_order_once_backend_returns() {
    let backend = FakeBackend::new(|_| {
        Err(farmshop_sync::SyncError::ConnectionFailed("connection refused".into()))
    });
    let (agent, _events) = agent(config(), backend.clone());
    agent.initialize().await.unwrap();

    let outcome = agent
        .write("orders", Operation::Insert, record(json!({ "id": "o-1", "status": "new" })))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Queued);
    agent
        .write("orders", Operation::Update, record(json!({ "id": "o-1", "status": "packed" })))
        .await
        .unwrap();

    // Still down: the probe fails and nothing is replayed.
    let report = agent.sync_now().await.unwrap();
    assert_eq!(report.replayed, 0);
    assert_eq!(report.remaining, 2);

    backend.respond_with(|_| Ok(Response::new(StatusCode::OK, json!({}))));
    let before = backend.table_requests().len();

    let report = agent.sync_now().await.unwrap();
    assert_eq!(report.replayed, 2);
    assert!(agent.status().await.unwrap().reachable);

    let replayed: Vec<Method> = backend.table_requests()[before..]
        .iter()
        .map(|r| r.method.clone())
        .collect();
    assert_eq!(replayed, vec![Method::POST, Method::PATCH]);
}

#[tokio::test]
async fn local_mode_writes_land_in_cache_and_outbox() {
    let mut config = config();
    config.mode.default = Mode::Local;
    let backend = FakeBackend::status(StatusCode::OK);
    let (agent, _events) = agent(config, backend.clone());
    agent.initialize().await.unwrap();

    agent
        .write("customers", Operation::Insert, record(json!({ "id": "c-1", "name": "Ana" })))
        .await
        .unwrap();
    agent
        .write("customers", Operation::Delete, record(json!({ "id": "c-1" })))
        .await
        .unwrap();

    assert!(backend.requests().is_empty());
    assert!(agent.fetch_table("customers").await.unwrap().is_empty());
    assert_eq!(agent.status().await.unwrap().pending_count, 2);

    // Back to remote: queued writes replay against the physical table.
    agent.mode_controller().switch_mode(Mode::Remote).await.unwrap();
    let report = agent.sync_now().await.unwrap();
    assert_eq!(report.replayed, 2);
    assert!(backend
        .table_requests()
        .iter()
        .all(|r| r.url.contains("/tables/farm_customers")));
}

#[tokio::test]
async fn write_after_recovery_never_overtakes_queued_writes() {
    let backend = FakeBackend::new(|_| {
        Err(farmshop_sync::SyncError::ConnectionFailed("connection refused".into()))
    });
    let (agent, _events) = agent(config(), backend.clone());
    agent.initialize().await.unwrap();

    let outcome = agent
        .write("orders", Operation::Insert, record(json!({ "id": "o-1", "status": "new" })))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Queued);

    backend.respond_with(|_| Ok(Response::new(StatusCode::OK, json!({}))));
    let before = backend.table_requests().len();

    let outcome = agent
        .write("orders", Operation::Update, record(json!({ "id": "o-1", "status": "packed" })))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Queued);

    let report = agent.sync_now().await.unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.remaining, 0);

    let sent: Vec<(Method, String)> = backend.table_requests()[before..]
        .iter()
        .map(|r| (r.method.clone(), r.body.as_ref().unwrap()["status"].to_string()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (Method::POST, "\"new\"".to_string()),
            (Method::PATCH, "\"packed\"".to_string()),
        ]
    );
}

#[tokio::test]
async fn local_writes_survive_a_remote_refresh_until_replayed() {
    let mut config = config();
    config.mode.default = Mode::Local;
    let backend = FakeBackend::status(StatusCode::OK);
    let (agent, _events) = agent(config, backend.clone());
    agent.initialize().await.unwrap();

    let row = record(json!({ "id": "o-9", "status": "new" }));
    agent.write("orders", Operation::Insert, row.clone()).await.unwrap();

    agent.mode_controller().switch_mode(Mode::Remote).await.unwrap();
    assert_eq!(agent.fetch_table("orders").await.unwrap(), vec![row.clone()]);
    assert_eq!(agent.context().db().cache().get("orders").await.unwrap(), Some(vec![row]));
    assert_eq!(agent.status().await.unwrap().pending_count, 1);

    // Once replayed, the backend's snapshot is the whole truth again.
    agent.sync_now().await.unwrap();
    assert!(agent.fetch_table("orders").await.unwrap().is_empty());
}
