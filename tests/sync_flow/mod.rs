use std::collections::HashMap;

use d_confsync::gather_metrics;
use d_confsync::SyncState;
use d_confsync::WatchState;

use crate::common::*;

#[tokio::test]
async fn test_service_lifecycle_from_empty_tree_to_live_updates() {
    enable_logger();
    let backend = backend_with(&[]);
    let mut engine = engine_for(&backend);
    let (on_change, mut deliveries) = collector();

    let initial = engine.start(on_change).await.unwrap();
    assert!(initial.is_empty());
    assert_eq!(engine.state(), SyncState::Watching);

    // The service node appears and points at two shared nodes
    backend.put("/shared/db", r#"{"dbhost":"10.0.0.1"}"#);
    backend.put("/shared/cache", r#"{"ttl":"30"}"#);
    wait_until_armed(&backend, SERVICE_PATH).await;
    backend.put(SERVICE_PATH, r#"["/shared/db","/shared/cache"]"#);

    let mut merged = HashMap::new();
    for expected in ["/shared/db", "/shared/cache"] {
        let (path, snapshot) = next(&mut deliveries).await;
        assert_eq!(path, expected);
        merged.extend(snapshot);
    }
    assert_eq!(merged.len(), 2);

    // Globals keep flowing after a malformed write
    wait_until_armed(&backend, GLOBALS_PATH).await;
    backend.put(GLOBALS_PATH, "not json");
    wait_until_armed(&backend, GLOBALS_PATH).await;
    backend.put(GLOBALS_PATH, r#"{"log_level":"warn"}"#);
    let (path, snapshot) = next(&mut deliveries).await;
    assert_eq!(path, GLOBALS_PATH);
    assert_eq!(snapshot.get("log_level").map(String::as_str), Some("warn"));

    engine.shutdown().await;
    assert_eq!(engine.state(), SyncState::Stopped);
    assert!(gather_metrics().contains("confsync_deliveries_total"));
}

#[tokio::test]
async fn test_outage_is_survived_and_changes_made_meanwhile_are_picked_up() {
    enable_logger();
    let backend = backend_with(&[(GLOBALS_PATH, r#"{"rev":"1"}"#)]);
    let mut engine = engine_for(&backend);
    let (on_change, mut deliveries) = collector();
    engine.start(on_change).await.unwrap();
    wait_until_armed(&backend, GLOBALS_PATH).await;

    backend.go_offline();
    let mut globals = engine.subscribe_watch(GLOBALS_PATH).unwrap();
    globals
        .wait_for(|s| *s == WatchState::Reconnecting)
        .await
        .unwrap();
    // Written while the watch loops are disconnected
    backend.put(GLOBALS_PATH, r#"{"rev":"2"}"#);
    backend.go_online();

    loop {
        let (path, snapshot) = next(&mut deliveries).await;
        if path == GLOBALS_PATH {
            assert_eq!(snapshot.get("rev").map(String::as_str), Some("2"));
            break;
        }
    }
    engine.shutdown().await;
}
