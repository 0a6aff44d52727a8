use std::sync::Arc;
use std::time::Duration;

use d_confsync::BackoffPolicy;
use d_confsync::ConfigSnapshot;
use d_confsync::MemBackend;
use d_confsync::Session;
use d_confsync::SyncConfig;
use d_confsync::SyncEngine;
use d_confsync::SyncPaths;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

pub const SERVICE_PATH: &str = "/service/billing";
pub const GLOBALS_PATH: &str = "/service/globals";

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

pub fn backend_with(nodes: &[(&str, &str)]) -> Arc<MemBackend> {
    let backend = MemBackend::new();
    for (path, data) in nodes {
        backend.put(path, *data);
    }
    Arc::new(backend)
}

pub fn quick_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 100,
        timeout_ms: 500,
        base_delay_ms: 5,
        max_delay_ms: 20,
    }
}

pub fn engine_for(backend: &Arc<MemBackend>) -> SyncEngine {
    let session: Session = backend.clone();
    SyncEngine::new(
        session,
        SyncPaths::new(SERVICE_PATH, "globals"),
        SyncConfig::default(),
        quick_policy(),
    )
}

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

pub type Deliveries = mpsc::UnboundedReceiver<(String, ConfigSnapshot)>;

pub fn collector() -> (impl FnMut(&str, ConfigSnapshot) + Send + 'static, Deliveries) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |path: &str, snapshot: ConfigSnapshot| {
            let _ = tx.send((path.to_string(), snapshot));
        },
        rx,
    )
}

pub async fn next(rx: &mut Deliveries) -> (String, ConfigSnapshot) {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no delivery within 3s")
        .expect("delivery channel closed")
}
