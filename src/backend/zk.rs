//! ZooKeeper backend built on `zookeeper-client`.
//!
//! Watches are exists-watches: they fire on creation, deletion and data change
//! of the watched node, so a service node that does not exist yet is still
//! watched. A session event delivered to an armed watcher means the session is
//! gone and is reported as a connection level error.
//!
//! Watch loops share one client. A lost session is renewed once per epoch,
//! however many loops report it.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use zookeeper_client as zk;

use super::session::SessionEpoch;
use super::CoordinationBackend;
use crate::ConnectionError;
use crate::Error;
use crate::Result;
use crate::WatchError;

pub struct ZkBackend {
    cluster: String,
    connect_timeout: Duration,
    client: ArcSwap<zk::Client>,
    epoch: SessionEpoch,
}

impl std::fmt::Debug for ZkBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ZkBackend")
            .field("cluster", &self.cluster)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ZkBackend {
    pub async fn connect(
        hosts: Vec<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let cluster = hosts.join(",");
        let client = Self::open(&cluster, connect_timeout).await?;
        info!(cluster = %cluster, "zookeeper session established");
        Ok(Self {
            cluster,
            connect_timeout,
            client: ArcSwap::from_pointee(client),
            epoch: SessionEpoch::default(),
        })
    }

    async fn open(
        cluster: &str,
        connect_timeout: Duration,
    ) -> Result<zk::Client> {
        match tokio::time::timeout(connect_timeout, zk::Client::connect(cluster)).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(ConnectionError::ConnectFailed {
                hosts: cluster.to_string(),
                reason: e.to_string(),
            }
            .into()),
            Err(_) => Err(ConnectionError::Timeout(connect_timeout).into()),
        }
    }

    /// Current client with the epoch it belongs to.
    fn client(&self) -> (u64, Arc<zk::Client>) {
        let epoch = self.epoch.current();
        (epoch, self.client.load_full())
    }

    fn map_error(
        &self,
        epoch: u64,
        path: &str,
        e: zk::Error,
    ) -> Error {
        let e = map_zk_error(path, e);
        if e.is_connection_level() {
            self.epoch.mark_lost(epoch);
        }
        e
    }
}

pub(super) fn map_zk_error(
    path: &str,
    e: zk::Error,
) -> Error {
    match e {
        zk::Error::NoNode => Error::NotFound(path.to_string()),
        zk::Error::ConnectionLoss | zk::Error::SessionExpired | zk::Error::ClientClosed => {
            ConnectionError::SessionLost(format!("{path}: {e}")).into()
        }
        other => Error::Backend(format!("{path}: {other}")),
    }
}

#[async_trait]
impl CoordinationBackend for ZkBackend {
    fn name(&self) -> &'static str {
        "zk"
    }

    async fn exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        let (epoch, client) = self.client();
        let stat = client
            .check_stat(path)
            .await
            .map_err(|e| self.map_error(epoch, path, e))?;
        Ok(stat.is_some())
    }

    async fn children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let (epoch, client) = self.client();
        client
            .list_children(path)
            .await
            .map_err(|e| self.map_error(epoch, path, e))
    }

    async fn read(
        &self,
        path: &str,
    ) -> Result<Vec<u8>> {
        let (epoch, client) = self.client();
        let (data, _stat) = client
            .get_data(path)
            .await
            .map_err(|e| self.map_error(epoch, path, e))?;
        Ok(data)
    }

    async fn watch(
        &self,
        path: &str,
    ) -> Result<()> {
        let (epoch, client) = self.client();
        let (_stat, watcher) = client.check_and_watch_stat(path).await.map_err(|e| {
            match self.map_error(epoch, path, e) {
                e @ Error::Connection(_) => e,
                e => WatchError::Registration {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
                .into(),
            }
        })?;

        let event = watcher.changed().await;
        debug!(path, event_type = ?event.event_type, "zookeeper watch fired");
        match event.event_type {
            zk::EventType::Session => {
                self.epoch.mark_lost(epoch);
                Err(ConnectionError::SessionLost(format!(
                    "{path}: session state {:?}",
                    event.session_state
                ))
                .into())
            }
            _ => Ok(()),
        }
    }

    async fn reconnect(&self) -> Result<()> {
        let renewed = self
            .epoch
            .renew(|| async move {
                let client = Self::open(&self.cluster, self.connect_timeout).await?;
                self.client.store(Arc::new(client));
                Ok(())
            })
            .await?;
        if renewed {
            info!(cluster = %self.cluster, epoch = self.epoch.current(), "zookeeper session re-established");
        }
        Ok(())
    }
}
