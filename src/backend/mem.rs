//! In-process coordination backend.
//!
//! Holds a `/`-separated node tree in a `BTreeMap` so child listings come back
//! sorted, and keeps one-shot watchers in a `DashMap` keyed by path. Nodes that
//! only exist as ancestors of stored nodes behave like ZooKeeper parents: they
//! exist, list their children and carry an empty payload.
//!
//! `go_offline()` drops the session: pending watches fail with a connection
//! level error and every call fails until `go_online()`.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::trace;

use super::CoordinationBackend;
use crate::constants::PATH_SEPARATOR;
use crate::utils::path::normalize;
use crate::ConnectionError;
use crate::Error;
use crate::Result;

#[derive(Debug)]
pub struct MemBackend {
    nodes: RwLock<BTreeMap<String, Vec<u8>>>,
    watchers: DashMap<String, Vec<oneshot::Sender<()>>>,
    online: AtomicBool,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            watchers: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Create or overwrite a node and fire its watchers.
    pub fn put(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
    ) {
        let path = normalize(path);
        self.nodes.write().insert(path.clone(), data.into());
        self.fire(&path);
    }

    /// Remove a node and fire its watchers. Returns whether the node was stored.
    pub fn delete(
        &self,
        path: &str,
    ) -> bool {
        let path = normalize(path);
        let removed = self.nodes.write().remove(&path).is_some();
        if removed {
            self.fire(&path);
        }
        removed
    }

    /// Lose the session: pending watches fail, new calls fail until `go_online`.
    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        // Dropping the senders wakes every armed watcher with an error
        self.watchers.clear();
    }

    pub fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of watches currently armed on `path`.
    pub fn watcher_count(
        &self,
        path: &str,
    ) -> usize {
        self.watchers
            .get(&normalize(path))
            .map(|w| w.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn fire(
        &self,
        path: &str,
    ) {
        if let Some((_, senders)) = self.watchers.remove(path) {
            trace!(path, watchers = senders.len(), "firing watchers");
            for tx in senders {
                let _ = tx.send(());
            }
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ConnectionError::SessionLost("in-memory session is offline".into()).into())
        }
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            path.to_string()
        } else {
            format!("{path}{PATH_SEPARATOR}")
        }
    }

    fn has_descendants(
        nodes: &BTreeMap<String, Vec<u8>>,
        path: &str,
    ) -> bool {
        let prefix = Self::child_prefix(path);
        nodes
            .range(prefix.clone()..)
            .next()
            .map(|(k, _)| k.starts_with(&prefix))
            .unwrap_or(false)
    }
}

#[async_trait]
impl CoordinationBackend for MemBackend {
    fn name(&self) -> &'static str {
        "mem"
    }

    async fn exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        self.ensure_online()?;
        let path = normalize(path);
        let nodes = self.nodes.read();
        Ok(path == "/" || nodes.contains_key(&path) || Self::has_descendants(&nodes, &path))
    }

    async fn children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        self.ensure_online()?;
        let path = normalize(path);
        let nodes = self.nodes.read();
        if path != "/" && !nodes.contains_key(&path) && !Self::has_descendants(&nodes, &path) {
            return Err(Error::NotFound(path));
        }

        let prefix = Self::child_prefix(&path);
        let names: BTreeSet<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split(PATH_SEPARATOR).next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn read(
        &self,
        path: &str,
    ) -> Result<Vec<u8>> {
        self.ensure_online()?;
        let path = normalize(path);
        let nodes = self.nodes.read();
        match nodes.get(&path) {
            Some(data) => Ok(data.clone()),
            None if path == "/" || Self::has_descendants(&nodes, &path) => Ok(vec![]),
            None => Err(Error::NotFound(path)),
        }
    }

    async fn watch(
        &self,
        path: &str,
    ) -> Result<()> {
        self.ensure_online()?;
        let path = normalize(path);
        let (tx, rx) = oneshot::channel();
        {
            let mut entry = self.watchers.entry(path.clone()).or_default();
            entry.retain(|w| !w.is_closed());
            entry.push(tx);
        }
        // Went offline between the check and the registration
        self.ensure_online()?;

        rx.await.map_err(|_| -> Error {
            ConnectionError::SessionLost(format!("watch on {path} dropped with the session")).into()
        })
    }

    async fn reconnect(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ConnectionError::ConnectFailed {
                hosts: "mem".into(),
                reason: "in-memory session is offline".into(),
            }
            .into())
        }
    }
}
