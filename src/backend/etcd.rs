//! etcd v3 backend built on `etcd-client`.
//!
//! etcd has a flat keyspace, so the node hierarchy is emulated with `/`-separated
//! keys: the children of `p` are the keys `p/<name>` with no further separator.
//! A watch is opened per call and cancelled after the first response that carries
//! events, which gives the same one-shot semantics as ZooKeeper.
//!
//! The client channel connects lazily, so an unreachable cluster shows up as gRPC
//! `Unavailable` on the next call rather than as a transport error. Opening a
//! client therefore checks liveness with a status call, and watch registration
//! is bounded by the connect timeout.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use etcd_client::Client;
use etcd_client::ConnectOptions;
use etcd_client::GetOptions;
use etcd_client::KvClient;
use tonic::Code;
use tracing::debug;
use tracing::info;

use super::session::SessionEpoch;
use super::CoordinationBackend;
use crate::utils::path::child_name;
use crate::utils::path::normalize;
use crate::ConnectionError;
use crate::Error;
use crate::Result;
use crate::WatchError;

pub struct EtcdBackend {
    hosts: Vec<String>,
    connect_timeout: Duration,
    client: ArcSwap<Client>,
    epoch: SessionEpoch,
}

impl std::fmt::Debug for EtcdBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EtcdBackend")
            .field("hosts", &self.hosts)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl EtcdBackend {
    pub async fn connect(
        hosts: Vec<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Self::open(&hosts, connect_timeout).await?;
        info!(hosts = ?hosts, "etcd session established");
        Ok(Self {
            hosts,
            connect_timeout,
            client: ArcSwap::from_pointee(client),
            epoch: SessionEpoch::default(),
        })
    }

    async fn open(
        hosts: &[String],
        connect_timeout: Duration,
    ) -> Result<Client> {
        let options = ConnectOptions::new().with_connect_timeout(connect_timeout);
        let mut client = Client::connect(hosts.to_vec(), Some(options))
            .await
            .map_err(|e| -> Error {
                ConnectionError::ConnectFailed {
                    hosts: hosts.join(","),
                    reason: e.to_string(),
                }
                .into()
            })?;

        match tokio::time::timeout(connect_timeout, client.status()).await {
            Ok(Ok(status)) => {
                debug!(version = status.version(), "etcd member reachable");
                Ok(client)
            }
            Ok(Err(e)) => Err(map_etcd_error("/", e)),
            Err(_) => Err(ConnectionError::Timeout(connect_timeout).into()),
        }
    }

    fn kv(&self) -> (u64, KvClient) {
        let epoch = self.epoch.current();
        (epoch, self.client.load().kv_client())
    }

    fn map_error(
        &self,
        epoch: u64,
        path: &str,
        e: etcd_client::Error,
    ) -> Error {
        self.note(epoch, map_etcd_error(path, e))
    }

    /// Record a connection level error against the client it came from.
    fn note(
        &self,
        epoch: u64,
        e: Error,
    ) -> Error {
        if e.is_connection_level() {
            self.epoch.mark_lost(epoch);
        }
        e
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            path.to_string()
        } else {
            format!("{path}/")
        }
    }

    async fn has_descendants(
        &self,
        path: &str,
    ) -> Result<bool> {
        let (epoch, mut kv) = self.kv();
        let resp = kv
            .get(
                Self::child_prefix(path),
                Some(GetOptions::new().with_prefix().with_count_only()),
            )
            .await
            .map_err(|e| self.map_error(epoch, path, e))?;
        Ok(resp.count() > 0)
    }
}

/// gRPC statuses the client reports while the cluster is unreachable.
const CONNECTION_CODES: [Code; 4] = [
    Code::Unavailable,
    Code::DeadlineExceeded,
    Code::Cancelled,
    Code::Unknown,
];

pub(super) fn map_etcd_error(
    path: &str,
    e: etcd_client::Error,
) -> Error {
    match e {
        etcd_client::Error::TransportError(e) => {
            ConnectionError::SessionLost(format!("{path}: {e}")).into()
        }
        etcd_client::Error::GRpcStatus(status) if CONNECTION_CODES.contains(&status.code()) => {
            ConnectionError::SessionLost(format!(
                "{path}: {:?}: {}",
                status.code(),
                status.message()
            ))
            .into()
        }
        other => Error::Backend(format!("{path}: {other}")),
    }
}

#[async_trait]
impl CoordinationBackend for EtcdBackend {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        let path = normalize(path);
        let (epoch, mut kv) = self.kv();
        let exact = kv
            .get(path.as_str(), Some(GetOptions::new().with_count_only()))
            .await
            .map_err(|e| self.map_error(epoch, &path, e))?;
        if exact.count() > 0 {
            return Ok(true);
        }
        self.has_descendants(&path).await
    }

    async fn children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let path = normalize(path);
        let (epoch, mut kv) = self.kv();
        let resp = kv
            .get(
                Self::child_prefix(&path),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await
            .map_err(|e| self.map_error(epoch, &path, e))?;

        if resp.kvs().is_empty() && !self.exists(&path).await? {
            return Err(Error::NotFound(path));
        }

        let mut names = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| Error::Backend(format!("{path}: non UTF-8 key: {e}")))?;
            if let Some(name) = child_name(&path, key) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn read(
        &self,
        path: &str,
    ) -> Result<Vec<u8>> {
        let path = normalize(path);
        let (epoch, mut kv) = self.kv();
        let resp = kv
            .get(path.as_str(), None)
            .await
            .map_err(|e| self.map_error(epoch, &path, e))?;

        match resp.kvs().first() {
            Some(kv) => Ok(kv.value().to_vec()),
            None if self.has_descendants(&path).await? => Ok(vec![]),
            None => Err(Error::NotFound(path)),
        }
    }

    async fn watch(
        &self,
        path: &str,
    ) -> Result<()> {
        let path = normalize(path);
        let epoch = self.epoch.current();
        let mut watch_client = self.client.load().watch_client();
        let registration =
            tokio::time::timeout(self.connect_timeout, watch_client.watch(path.as_str(), None)).await;
        let (mut watcher, mut stream) = match registration {
            Ok(Ok(watch)) => watch,
            Ok(Err(e)) => {
                return Err(match self.map_error(epoch, &path, e) {
                    e @ Error::Connection(_) => e,
                    e => WatchError::Registration {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                });
            }
            Err(_) => {
                return Err(self.note(epoch, ConnectionError::Timeout(self.connect_timeout).into()));
            }
        };

        loop {
            let message = stream.message().await.map_err(|e| {
                self.note(
                    epoch,
                    ConnectionError::SessionLost(format!("{path}: {e}")).into(),
                )
            })?;

            match message {
                Some(resp) if resp.canceled() => {
                    return Err(WatchError::Registration {
                        path,
                        reason: resp.cancel_reason().to_string(),
                    }
                    .into());
                }
                Some(resp) if !resp.events().is_empty() => {
                    debug!(path = %path, events = resp.events().len(), "etcd watch fired");
                    // One-shot: stop the server side stream, the caller re-arms
                    if let Err(e) = watcher.cancel().await {
                        debug!(path = %path, "failed to cancel etcd watch: {}", e);
                    }
                    return Ok(());
                }
                // Creation acknowledgement or progress notify
                Some(_) => continue,
                None => {
                    return Err(self.note(
                        epoch,
                        ConnectionError::SessionLost(format!("{path}: watch stream closed")).into(),
                    ));
                }
            }
        }
    }

    async fn reconnect(&self) -> Result<()> {
        let renewed = self
            .epoch
            .renew(|| async move {
                let client = Self::open(&self.hosts, self.connect_timeout).await?;
                self.client.store(Arc::new(client));
                Ok(())
            })
            .await?;
        if renewed {
            info!(hosts = ?self.hosts, epoch = self.epoch.current(), "etcd session re-established");
        }
        Ok(())
    }
}
