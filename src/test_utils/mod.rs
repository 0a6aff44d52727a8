//! Helpers shared by the unit tests: an in-memory backend seeded with nodes,
//! fast retry policies and waiters for background watch loops.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use crate::BackoffPolicy;
use crate::ConfigSnapshot;
use crate::MemBackend;
use crate::Session;
use crate::SyncConfig;
use crate::SyncPaths;

pub const SERVICE_PATH: &str = "/service/billing";
pub const GLOBALS_PATH: &str = "/service/globals";

type Delivery = (String, ConfigSnapshot);

static LOGGER_INIT: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

pub fn seeded_backend(nodes: &[(&str, &str)]) -> Arc<MemBackend> {
    let backend = MemBackend::new();
    for (path, data) in nodes {
        backend.put(path, *data);
    }
    Arc::new(backend)
}

pub fn as_session(backend: &Arc<MemBackend>) -> Session {
    backend.clone()
}

pub fn test_paths() -> SyncPaths {
    SyncPaths::new(SERVICE_PATH, "globals")
}

pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        signal_buffer_size: 16,
        connect_timeout_ms: 500,
        ..SyncConfig::default()
    }
}

/// Millisecond delays so reconnect tests finish quickly.
pub fn fast_policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 500,
        base_delay_ms: 5,
        max_delay_ms: 20,
    }
}

pub fn snapshot(pairs: &[(&str, &str)]) -> ConfigSnapshot {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Wait until a watch is armed on `path`, so a following write is observed.
pub async fn wait_until_armed(
    backend: &MemBackend,
    path: &str,
) {
    for _ in 0..400 {
        if backend.watcher_count(path) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("watch on {path} was never armed");
}

pub async fn wait_for_state<T>(
    rx: &mut watch::Receiver<T>,
    expected: T,
) where
    T: PartialEq + std::fmt::Debug,
{
    let outcome = match timeout(Duration::from_secs(3), rx.wait_for(|s| *s == expected)).await {
        Ok(Ok(_)) => None,
        Ok(Err(_)) => Some("state channel closed"),
        Err(_) => Some("timed out"),
    };
    if let Some(reason) = outcome {
        panic!("{reason} waiting for {expected:?}, still {:?}", *rx.borrow());
    }
}

/// A subscriber callback that forwards every delivery to a channel.
pub fn recording_callback() -> (
    impl FnMut(&str, ConfigSnapshot) + Send + 'static,
    mpsc::UnboundedReceiver<Delivery>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |path: &str, snapshot: ConfigSnapshot| {
        let _ = tx.send((path.to_string(), snapshot));
    };
    (callback, rx)
}

pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no delivery within 3s")
        .expect("delivery channel closed")
}

/// Assert nothing else is delivered for a short while.
pub async fn assert_no_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) {
    if let Ok(Some(delivery)) = timeout(Duration::from_millis(150), rx.recv()).await {
        panic!("unexpected delivery {delivery:?}");
    }
}
