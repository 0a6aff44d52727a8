//! Coordination backends.
//!
//! Every backend exposes the same capability set so the sync engine never needs to
//! know whether it talks to ZooKeeper, etcd or the in-process store:
//!
//! - `exists` / `children` / `read`: point-in-time reads
//! - `watch`: arm a one-shot watch on a path and wait until it fires
//! - `reconnect`: re-establish the session after a connection level failure
//!
//! Implementations must be safe for concurrent use: watch loops for different
//! paths issue reads and watch registrations at the same time.

mod mem;
#[cfg(any(feature = "zk", feature = "etcd"))]
mod session;
pub use mem::*;

#[cfg(feature = "etcd")]
mod etcd;
#[cfg(feature = "etcd")]
pub use etcd::*;

#[cfg(feature = "zk")]
mod zk;
#[cfg(feature = "zk")]
pub use zk::*;

#[cfg(all(test, feature = "zk"))]
mod zk_test;

//---
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackendKind;
use crate::ConnectionError;
use crate::Result;
use crate::Settings;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Short backend label used in logs and metrics
    fn name(&self) -> &'static str;

    async fn exists(
        &self,
        path: &str,
    ) -> Result<bool>;

    /// Names (not full paths) of the immediate children of `path`.
    ///
    /// # Errors
    /// `Error::NotFound` when `path` does not exist.
    async fn children(
        &self,
        path: &str,
    ) -> Result<Vec<String>>;

    /// Raw payload stored at `path`.
    ///
    /// # Errors
    /// `Error::NotFound` when `path` does not exist.
    async fn read(
        &self,
        path: &str,
    ) -> Result<Vec<u8>>;

    /// Arm a one-shot watch on `path` and wait until it fires.
    ///
    /// Fires on creation, deletion and data change of the node itself. Works on
    /// paths that do not exist yet. The caller must call again to keep watching.
    ///
    /// # Errors
    /// A connection level error when the session is lost while armed or while
    /// registering, `WatchError::Registration` for any other registration failure.
    async fn watch(
        &self,
        path: &str,
    ) -> Result<()>;

    /// Re-establish the session after a connection level failure.
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to a connected backend. The session lives as long as the last clone.
pub type Session = Arc<dyn CoordinationBackend>;

/// Establish a session against the backend selected by `discovery_mode`.
///
/// Attempts are bounded by `sync.connect_attempts`, each one by `sync.connect_timeout_ms`.
pub async fn connect(settings: &Settings) -> Result<Session> {
    if settings.config_hosts.is_empty() {
        return Err(ConnectionError::NoHosts.into());
    }

    let hosts = settings.config_hosts.clone();
    let policy = settings.connect_policy();
    info!(backend = %settings.discovery_mode, hosts = ?hosts, "connecting to coordination service");

    match settings.discovery_mode {
        BackendKind::Zk => connect_zk(hosts, policy).await,
        BackendKind::Etcd => connect_etcd(hosts, policy).await,
    }
}

#[cfg(feature = "zk")]
async fn connect_zk(
    hosts: Vec<String>,
    policy: crate::BackoffPolicy,
) -> Result<Session> {
    let backend = task_with_timeout_and_exponential_backoff(
        || ZkBackend::connect(hosts.clone(), policy.timeout()),
        policy,
    )
    .await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "zk"))]
async fn connect_zk(
    _hosts: Vec<String>,
    _policy: crate::BackoffPolicy,
) -> Result<Session> {
    Err(ConnectionError::BackendUnavailable("zk").into())
}

#[cfg(feature = "etcd")]
async fn connect_etcd(
    hosts: Vec<String>,
    policy: crate::BackoffPolicy,
) -> Result<Session> {
    let backend = task_with_timeout_and_exponential_backoff(
        || EtcdBackend::connect(hosts.clone(), policy.timeout()),
        policy,
    )
    .await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "etcd"))]
async fn connect_etcd(
    _hosts: Vec<String>,
    _policy: crate::BackoffPolicy,
) -> Result<Session> {
    Err(ConnectionError::BackendUnavailable("etcd").into())
}
