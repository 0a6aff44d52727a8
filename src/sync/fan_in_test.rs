use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_utils::as_session;
use crate::test_utils::fast_policy;
use crate::test_utils::seeded_backend;
use crate::test_utils::wait_for_state;
use crate::test_utils::wait_until_armed;
use crate::test_utils::GLOBALS_PATH;
use crate::test_utils::SERVICE_PATH;
use crate::Error;
use crate::WatchError;

fn watched() -> Vec<String> {
    vec![SERVICE_PATH.to_string(), GLOBALS_PATH.to_string()]
}

async fn next_path(rx: &mut mpsc::Receiver<WatchSignal>) -> String {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no signal within 3s")
        .expect("signal channel closed")
        .path
}

#[tokio::test]
async fn test_firings_of_all_paths_reach_one_channel() {
    let backend = seeded_backend(&[]);
    let (mut fan_in, mut rx) = NotificationFanIn::start(
        as_session(&backend),
        &watched(),
        fast_policy(0),
        8,
        CancellationToken::new(),
    );
    wait_until_armed(&backend, SERVICE_PATH).await;
    wait_until_armed(&backend, GLOBALS_PATH).await;

    backend.put(SERVICE_PATH, "[]");
    backend.put(GLOBALS_PATH, "{}");

    let received: HashSet<_> = [next_path(&mut rx).await, next_path(&mut rx).await].into();
    assert_eq!(received, watched().into_iter().collect());

    fan_in.shutdown().await;
}

#[tokio::test]
async fn test_signals_of_one_path_keep_firing_order() {
    let backend = seeded_backend(&[]);
    let (mut fan_in, mut rx) = NotificationFanIn::start(
        as_session(&backend),
        &watched(),
        fast_policy(0),
        8,
        CancellationToken::new(),
    );

    for _ in 0..3 {
        wait_until_armed(&backend, GLOBALS_PATH).await;
        backend.put(GLOBALS_PATH, "{}");
        assert_eq!(next_path(&mut rx).await, GLOBALS_PATH);
    }

    fan_in.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_paths_get_a_single_loop() {
    let backend = seeded_backend(&[]);
    let paths = vec![
        GLOBALS_PATH.to_string(),
        GLOBALS_PATH.to_string(),
        SERVICE_PATH.to_string(),
    ];

    let (mut fan_in, _rx) = NotificationFanIn::start(
        as_session(&backend),
        &paths,
        fast_policy(0),
        8,
        CancellationToken::new(),
    );

    assert_eq!(fan_in.paths(), vec![GLOBALS_PATH.to_string(), SERVICE_PATH.to_string()]);
    wait_until_armed(&backend, GLOBALS_PATH).await;
    assert_eq!(backend.watcher_count(GLOBALS_PATH), 1);

    fan_in.shutdown().await;
}

#[tokio::test]
async fn test_failed_loop_does_not_stop_its_sibling_and_can_be_restarted() {
    let backend = seeded_backend(&[]);
    let (mut fan_in, mut rx) = NotificationFanIn::start(
        as_session(&backend),
        &watched(),
        fast_policy(0),
        8,
        CancellationToken::new(),
    );
    wait_until_armed(&backend, SERVICE_PATH).await;
    wait_until_armed(&backend, GLOBALS_PATH).await;

    // No reconnect budget: both loops fail on the session loss
    backend.go_offline();
    let mut service_state = fan_in.subscribe(SERVICE_PATH).unwrap();
    let mut globals_state = fan_in.subscribe(GLOBALS_PATH).unwrap();
    wait_for_state(&mut service_state, WatchState::Failed).await;
    wait_for_state(&mut globals_state, WatchState::Failed).await;
    backend.go_online();

    fan_in.restart(GLOBALS_PATH).unwrap();
    wait_until_armed(&backend, GLOBALS_PATH).await;
    backend.put(GLOBALS_PATH, "{}");

    assert_eq!(next_path(&mut rx).await, GLOBALS_PATH);
    assert_eq!(fan_in.state(SERVICE_PATH), Some(WatchState::Failed));

    fan_in.shutdown().await;
}

#[tokio::test]
async fn test_restart_of_unknown_path_is_rejected() {
    let backend = seeded_backend(&[]);
    let (mut fan_in, _rx) = NotificationFanIn::start(
        as_session(&backend),
        &watched(),
        fast_policy(0),
        8,
        CancellationToken::new(),
    );

    let err = fan_in.restart("/service/unknown").unwrap_err();

    assert!(matches!(err, Error::Watch(WatchError::UnknownPath(_))));
    fan_in.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_every_loop() {
    let backend = seeded_backend(&[]);
    let (mut fan_in, _rx) = NotificationFanIn::start(
        as_session(&backend),
        &watched(),
        fast_policy(0),
        8,
        CancellationToken::new(),
    );
    wait_until_armed(&backend, SERVICE_PATH).await;
    wait_until_armed(&backend, GLOBALS_PATH).await;

    fan_in.shutdown().await;

    assert!(fan_in
        .states()
        .iter()
        .all(|(_, state)| *state == WatchState::Stopped));
    assert_eq!(backend.watcher_count(SERVICE_PATH), 0);
}
