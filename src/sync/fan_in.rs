use std::collections::HashMap;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::WatchArmer;
use super::WatchSignal;
use super::WatchState;
use crate::utils::async_task::spawn_task;
use crate::BackoffPolicy;
use crate::Result;
use crate::Session;
use crate::WatchError;

struct WatcherSlot {
    handle: JoinHandle<()>,
    state: watch::Receiver<WatchState>,
}

/// Arena of watch loops, one per path, all publishing into one signal channel.
///
/// Signals from a single path arrive in firing order. Signals from different
/// paths interleave in arrival order.
pub struct NotificationFanIn {
    session: Session,
    policy: BackoffPolicy,
    signals: mpsc::Sender<WatchSignal>,
    cancel: CancellationToken,
    slots: HashMap<String, WatcherSlot>,
}

impl NotificationFanIn {
    /// Spawn one watch loop per distinct path.
    ///
    /// Loops stop when `cancel` fires. The receiver is the only consumer of signals.
    pub fn start(
        session: Session,
        paths: &[String],
        policy: BackoffPolicy,
        buffer: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<WatchSignal>) {
        let (signals, rx) = mpsc::channel(buffer.max(1));
        let mut fan_in = Self {
            session,
            policy,
            signals,
            cancel,
            slots: HashMap::with_capacity(paths.len()),
        };

        for path in paths {
            if fan_in.slots.contains_key(path) {
                debug!(path = %path, "path already watched");
                continue;
            }
            fan_in.spawn_watcher(path);
        }
        info!(paths = ?fan_in.paths(), "watch loops started");

        (fan_in, rx)
    }

    fn spawn_watcher(
        &mut self,
        path: &str,
    ) {
        let (armer, state) = WatchArmer::new(self.session.clone(), path, self.policy);
        let signals = self.signals.clone();
        let cancel = self.cancel.child_token();
        let handle = spawn_task(&format!("watch {path}"), move || armer.run(signals, cancel));

        self.slots.insert(path.to_string(), WatcherSlot { handle, state });
    }

    /// Replace the loop of `path` with a fresh one.
    ///
    /// A loop that is still running is aborted first, so a path never has two
    /// armed watches.
    pub fn restart(
        &mut self,
        path: &str,
    ) -> Result<()> {
        let slot = self
            .slots
            .remove(path)
            .ok_or_else(|| WatchError::UnknownPath(path.to_string()))?;
        slot.handle.abort();

        let previous = *slot.state.borrow();
        info!(path, ?previous, "restarting watch loop");
        self.spawn_watcher(path);
        Ok(())
    }

    /// Current state of every loop, sorted by path.
    pub fn states(&self) -> Vec<(String, WatchState)> {
        let mut states: Vec<_> = self
            .slots
            .iter()
            .map(|(path, slot)| (path.clone(), *slot.state.borrow()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn state(
        &self,
        path: &str,
    ) -> Option<WatchState> {
        self.slots.get(path).map(|slot| *slot.state.borrow())
    }

    /// Follow the state transitions of one loop.
    pub fn subscribe(
        &self,
        path: &str,
    ) -> Option<watch::Receiver<WatchState>> {
        self.slots.get(path).map(|slot| slot.state.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.slots.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.slots.values_mut().map(|slot| &mut slot.handle).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    debug!("watch loop ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for NotificationFanIn {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
