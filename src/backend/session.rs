use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tracing::debug;

use crate::Result;

/// Generation counter of a backend client, used to reconnect once per lost session.
///
/// Every watch loop sharing a session sees the same loss and calls `reconnect()`.
/// Callers record the epoch they observed the loss on; only the first reconnect
/// for that epoch opens a new client, later ones find it already replaced.
#[derive(Debug, Default)]
pub(crate) struct SessionEpoch {
    current: AtomicU64,
    /// One past the newest epoch reported lost
    lost: AtomicU64,
    renewing: Mutex<()>,
}

impl SessionEpoch {
    /// Read before loading the client, so a loss is never blamed on a newer client.
    pub(crate) fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub(crate) fn mark_lost(
        &self,
        epoch: u64,
    ) {
        self.lost.fetch_max(epoch + 1, Ordering::AcqRel);
    }

    /// Whether the current client is known to be lost.
    pub(crate) fn is_stale(&self) -> bool {
        self.lost.load(Ordering::Acquire) > self.current()
    }

    /// Run `open` unless the lost client was already replaced.
    ///
    /// `open` must swap in the new client before returning `Ok`. Returns whether
    /// this call replaced the client.
    pub(crate) async fn renew<F, Fut>(
        &self,
        open: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _guard = self.renewing.lock().await;
        if !self.is_stale() {
            debug!(epoch = self.current(), "session already renewed");
            return Ok(false);
        }
        open().await?;
        self.current.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }
}
