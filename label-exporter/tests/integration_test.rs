//! Integration tests for the label exporter.
//!
//! These tests verify the full flow from entity events to the rendered
//! `/metrics` output, over the HTTP server and over Zenoh.
//!
//! Zenoh tests require a multi-thread tokio runtime and use a unique key
//! prefix each.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use label_exporter::config::{CleanupStrategy, LabelConfig};
use label_exporter::dispatcher::DispatchOutcome;
use label_exporter::index::RemoveOutcome;
use label_exporter::metrics::EventOutcome;
use label_exporter::watcher::decode_sample;
use label_exporter::{
    EntityWatcher, EventDispatcher, ExporterMetrics, HttpServer, LabelEvent, LabelFilter,
    LabelIndex, SharedDispatcher, SyncStatus, WatchError, build_registry,
};
use label_exporter_common::{
    EntityKey, EntityKind, EntityObject, Format, KeyExprBuilder, ZenohConfig, connect, encode,
};
use prometheus_client::encoding::text::encode as render;
use tokio::sync::watch;
use zenoh::sample::SampleKind;

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn added(namespace: &str, name: &str, pairs: &[(&str, &str)]) -> LabelEvent {
    LabelEvent::Added {
        kind: EntityKind::Pod,
        key: EntityKey::new(namespace, name),
        labels: labels(pairs),
    }
}

fn removed(namespace: &str, name: &str) -> LabelEvent {
    LabelEvent::Removed {
        kind: EntityKind::Pod,
        key: EntityKey::new(namespace, name),
    }
}

fn create_dispatcher(config: LabelConfig) -> SharedDispatcher {
    Arc::new(EventDispatcher::new(
        Arc::new(LabelIndex::new(config.cleanup)),
        LabelFilter::new(&config),
        ExporterMetrics::default(),
    ))
}

fn render_metrics(dispatcher: &EventDispatcher) -> String {
    let registry = build_registry(dispatcher.index().clone(), dispatcher.metrics());
    let mut output = String::new();
    render(&mut output, &registry).unwrap();
    output
}

/// Lines of the `label_exporter` family, without the self-metrics.
fn label_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter(|line| line.starts_with("label_exporter{"))
        .collect()
}

#[test]
fn test_full_flow_rendering() {
    let dispatcher = create_dispatcher(LabelConfig::default());

    dispatcher.dispatch(added(
        "shop",
        "cart-0",
        &[
            ("export-labels", "true"),
            ("le__team", "checkout"),
            ("app", "cart"),
        ],
    ));
    dispatcher.dispatch(added(
        "shop",
        "web-0",
        &[("export-labels", "true"), ("le__tier", "front")],
    ));
    dispatcher.dispatch(added("shop", "batch-0", &[("le__team", "data")]));

    let output = render_metrics(&dispatcher);
    let lines = label_lines(&output);

    assert_eq!(
        lines,
        vec![
            "label_exporter{pod_name=\"cart-0\",pod_namespace=\"shop\",le__team=\"checkout\",le__tier=\"\"} 0",
            "label_exporter{pod_name=\"web-0\",pod_namespace=\"shop\",le__team=\"\",le__tier=\"front\"} 0",
        ]
    );
    assert!(output.contains("label_exporter_entities 2"));
    assert!(output.contains("label_exporter_known_labels 2"));
    assert!(output.contains(
        "label_exporter_events_total{event=\"added\",outcome=\"not_opted_in\"} 1"
    ));
}

#[test]
fn test_columns_shrink_after_removal() {
    let dispatcher = create_dispatcher(LabelConfig::default());

    dispatcher.dispatch(added("ns", "a", &[("export-labels", ""), ("le__l1", "v1")]));
    dispatcher.dispatch(added("ns", "b", &[("export-labels", ""), ("le__l2", "v2")]));
    assert!(render_metrics(&dispatcher).contains("le__l1=\"v1\""));

    dispatcher.dispatch(removed("ns", "a"));
    let output = render_metrics(&dispatcher);
    assert!(!output.contains("le__l1"));
    assert_eq!(
        label_lines(&output),
        vec!["label_exporter{pod_name=\"b\",pod_namespace=\"ns\",le__l2=\"v2\"} 0"]
    );

    dispatcher.dispatch(removed("ns", "b"));
    assert!(label_lines(&render_metrics(&dispatcher)).is_empty());
    assert_eq!(dispatcher.index().counts(), (0, 0));
}

#[test]
fn test_early_exit_stops_at_first_label_in_use() {
    let dispatcher = create_dispatcher(LabelConfig {
        cleanup: CleanupStrategy::EarlyExit,
        ..Default::default()
    });

    dispatcher.dispatch(added(
        "ns",
        "a",
        &[("export-labels", ""), ("le__l1", "x"), ("le__l2", "y")],
    ));
    dispatcher.dispatch(added("ns", "b", &[("export-labels", ""), ("le__l1", "x")]));
    dispatcher.dispatch(added("ns", "c", &[("export-labels", ""), ("le__l2", "y")]));

    let outcome = dispatcher.dispatch(removed("ns", "a"));
    assert_eq!(
        outcome,
        DispatchOutcome::Removed(RemoveOutcome::Removed { purged: vec![] })
    );
    assert_eq!(dispatcher.index().snapshot().columns, vec!["le__l1", "le__l2"]);

    dispatcher.dispatch(removed("ns", "b"));
    assert_eq!(dispatcher.index().snapshot().columns, vec!["le__l2"]);

    dispatcher.dispatch(removed("ns", "c"));
    assert_eq!(dispatcher.index().counts(), (0, 0));
}

#[test]
fn test_independent_cleanup_purges_every_orphan() {
    let dispatcher = create_dispatcher(LabelConfig::default());

    dispatcher.dispatch(added(
        "ns",
        "a",
        &[("export-labels", ""), ("le__l1", "x"), ("le__l2", "y")],
    ));
    dispatcher.dispatch(added("ns", "b", &[("export-labels", ""), ("le__l1", "x")]));
    dispatcher.dispatch(removed("ns", "a"));

    assert_eq!(dispatcher.index().snapshot().columns, vec!["le__l1"]);
}

#[test]
fn test_sanitized_and_escaped_output() {
    let dispatcher = create_dispatcher(LabelConfig {
        expose_all: true,
        ..Default::default()
    });

    dispatcher.dispatch(added(
        "ns",
        "a",
        &[("app.kubernetes.io/name", "say \"hi\""), ("pod_name", "shadow")],
    ));

    let output = render_metrics(&dispatcher);
    assert_eq!(
        label_lines(&output),
        vec![
            "label_exporter{pod_name=\"a\",pod_namespace=\"ns\",app_kubernetes_io_name=\"say \\\"hi\\\"\",pod_name_1=\"shadow\"} 0"
        ]
    );
}

#[test]
fn test_kubernetes_style_payload() {
    let payload = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "namespace": "shop",
            "name": "cart-0",
            "uid": "5f1c1f0e-0000-0000-0000-000000000000",
            "labels": {
                "export-labels": "",
                "le__team": "checkout",
                "app.kubernetes.io/name": "cart"
            }
        },
        "spec": { "nodeName": "worker-1" }
    });
    let bytes = serde_json::to_vec(&payload).unwrap();

    let event = decode_sample("labels", "labels/pods/shop/cart-0", SampleKind::Put, &bytes)
        .expect("payload should decode");

    let dispatcher = create_dispatcher(LabelConfig::default());
    dispatcher.dispatch(event);

    assert_eq!(dispatcher.index().snapshot().columns, vec!["le__team"]);
    assert_eq!(
        label_lines(&render_metrics(&dispatcher)),
        vec!["label_exporter{pod_name=\"cart-0\",pod_namespace=\"shop\",le__team=\"checkout\"} 0"]
    );
}

#[tokio::test]
async fn test_http_server_serves_metrics() {
    let dispatcher = create_dispatcher(LabelConfig::default());
    dispatcher.dispatch(added(
        "shop",
        "cart-0",
        &[("export-labels", ""), ("le__team", "checkout")],
    ));

    let registry = build_registry(dispatcher.index().clone(), dispatcher.metrics());
    let status = SyncStatus::default();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = HttpServer::new(registry, status.clone(), addr, "/metrics".to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.serve(listener, shutdown_rx));

    let response = reqwest::get(format!("http://{}/ready", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 503);

    status.mark_synced();
    let response = reqwest::get(format!("http://{}/ready", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("le__team=\"checkout\""));

    // Index changes show up on the next scrape
    dispatcher.dispatch(removed("shop", "cart-0"));
    let body = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!body.contains("le__team"));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

/// Poll `condition` until it holds or five seconds have passed.
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_sync_then_live_events() {
    let prefix = unique_prefix();
    let builder = KeyExprBuilder::with_prefix(&prefix, EntityKind::Pod);

    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    // Serve the initial listing
    let queryable = session
        .declare_queryable(builder.kind_wildcard())
        .await
        .expect("Failed to declare queryable");
    let listing = vec![
        EntityObject::new("shop", "cart-0")
            .with_label("export-labels", "")
            .with_label("le__team", "checkout"),
        EntityObject::new("shop", "web-0").with_label("le__team", "frontend"),
    ];
    let listing_builder = builder.clone();
    let queryable_task = tokio::spawn(async move {
        while let Ok(query) = queryable.recv_async().await {
            for object in &listing {
                let payload = encode(object, Format::Json).unwrap();
                query
                    .reply(listing_builder.build(&object.key()), payload)
                    .await
                    .unwrap();
            }
        }
    });

    let dispatcher = create_dispatcher(LabelConfig::default());
    let watcher = Arc::new(
        EntityWatcher::new(dispatcher.clone(), ZenohConfig::default())
            .with_key_prefix(&prefix)
            .with_sync_timeout(Duration::from_secs(5)),
    );
    let status = watcher.sync_status();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watch_session = session.clone();
    let watch_task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.watch(&watch_session, shutdown_rx).await })
    };

    assert!(wait_for(|| status.is_synced()).await, "initial sync timed out");
    assert_eq!(dispatcher.index().counts(), (1, 1));
    assert_eq!(
        dispatcher.metrics().event_count(EventOutcome::NotOptedIn),
        1
    );

    // Live add
    let object = EntityObject::new("shop", "db-0")
        .with_label("export-labels", "")
        .with_label("le__team", "storage")
        .with_label("le__tier", "data");
    session
        .put(
            builder.build(&object.key()),
            encode(&object, Format::Cbor).unwrap(),
        )
        .await
        .unwrap();
    assert!(wait_for(|| dispatcher.index().counts().0 == 2).await);
    assert_eq!(
        dispatcher.index().snapshot().columns,
        vec!["le__team", "le__tier"]
    );

    // Live remove
    session
        .delete(builder.build(&EntityKey::new("shop", "db-0")))
        .await
        .unwrap();
    assert!(wait_for(|| dispatcher.index().counts().0 == 1).await);
    assert_eq!(dispatcher.index().snapshot().columns, vec!["le__team"]);

    // Malformed and unsupported events are discarded
    session
        .put(format!("{}/pods/shop/broken", prefix), "{not json")
        .await
        .unwrap();
    session
        .delete(format!("{}/nodes/cluster/node-1", prefix))
        .await
        .unwrap();
    assert!(
        wait_for(|| {
            dispatcher.metrics().event_count(EventOutcome::Malformed) == 1
                && dispatcher.metrics().event_count(EventOutcome::UnsupportedKind) == 1
        })
        .await
    );
    assert_eq!(dispatcher.index().counts().0, 1);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), watch_task)
        .await
        .expect("watcher did not stop")
        .unwrap();
    assert!(result.is_ok());

    queryable_task.abort();
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_sync_timeout_is_fatal() {
    let prefix = unique_prefix();
    let builder = KeyExprBuilder::with_prefix(&prefix, EntityKind::Pod);

    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    // Accept queries but never finish them
    let queryable = session
        .declare_queryable(builder.kind_wildcard())
        .await
        .expect("Failed to declare queryable");
    let queryable_task = tokio::spawn(async move {
        let mut pending = Vec::new();
        while let Ok(query) = queryable.recv_async().await {
            pending.push(query);
        }
    });

    let dispatcher = create_dispatcher(LabelConfig::default());
    let watcher = EntityWatcher::new(dispatcher, ZenohConfig::default())
        .with_key_prefix(&prefix)
        .with_sync_timeout(Duration::from_millis(300));
    let status = watcher.sync_status();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        watcher.watch(&session, shutdown_rx),
    )
    .await
    .expect("watcher hung");

    assert!(matches!(result, Err(WatchError::SyncTimeout { .. })));
    assert!(!status.is_synced());

    queryable_task.abort();
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zenoh_shutdown_during_initial_sync() {
    let prefix = unique_prefix();
    let builder = KeyExprBuilder::with_prefix(&prefix, EntityKind::Pod);

    let session = connect(&ZenohConfig::default())
        .await
        .expect("Failed to open Zenoh session");

    // Hold the listing open so the watcher stays in its initial sync
    let queryable = session
        .declare_queryable(builder.kind_wildcard())
        .await
        .expect("Failed to declare queryable");
    let queryable_task = tokio::spawn(async move {
        let mut pending = Vec::new();
        while let Ok(query) = queryable.recv_async().await {
            pending.push(query);
        }
    });

    let dispatcher = create_dispatcher(LabelConfig::default());
    let watcher = EntityWatcher::new(dispatcher, ZenohConfig::default())
        .with_key_prefix(&prefix)
        .with_sync_timeout(Duration::from_secs(60));
    let status = watcher.sync_status();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watch_session = session.clone();
    let watch_task = tokio::spawn(async move { watcher.watch(&watch_session, shutdown_rx).await });

    // A value change that is not a shutdown keeps the sync running
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(false).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!watch_task.is_finished());

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), watch_task)
        .await
        .expect("watcher did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(!status.is_synced());

    queryable_task.abort();
    session.close().await.expect("Failed to close session");
}
