use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::fetch_sources;
use super::merge_sources;
use super::ChangeResolver;
use super::ConfigSnapshot;
use super::NotificationFanIn;
use super::SyncPaths;
use super::WatchSignal;
use super::WatchState;
use crate::backend;
use crate::metrics::DELIVERIES_TOTAL;
use crate::utils::async_task::spawn_task;
use crate::BackendKind;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::Session;
use crate::Settings;
use crate::SyncConfig;
use crate::WatchError;

/// Lifecycle of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No session handed over yet
    #[default]
    Disconnected,
    /// Session established, initial pull not run yet
    Connecting,
    InitialSync,
    /// Watch loops armed, responder delivering changes
    Watching,
    /// Cancelled or shut down
    Stopped,
}

/// Owns one session, its watch loops and the responder that calls the subscriber.
///
/// Dropping the engine cancels every background task.
pub struct SyncEngine {
    session: Session,
    paths: SyncPaths,
    config: SyncConfig,
    policy: BackoffPolicy,
    state: Arc<watch::Sender<SyncState>>,
    cancel: CancellationToken,
    fan_in: Option<NotificationFanIn>,
    responder: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("backend", &self.session.name())
            .field("paths", &self.paths)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        session: Session,
        paths: SyncPaths,
        config: SyncConfig,
        policy: BackoffPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Connecting);
        Self {
            session,
            paths,
            config,
            policy,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            fan_in: None,
            responder: None,
        }
    }

    /// Establish the session described by `settings`.
    ///
    /// # Errors
    /// Connection level errors once the connect attempts are spent.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let session = backend::connect(settings).await?;
        Ok(Self::new(
            session,
            settings.sync_paths(),
            settings.sync.clone(),
            settings.reconnect,
        ))
    }

    /// Pull the initial snapshot, then start watching the service and globals paths.
    ///
    /// A missing service node is not an error: the snapshot is empty and the
    /// watches still fire when the node is created. `on_change` runs on the
    /// responder task, one call at a time, in signal order.
    ///
    /// # Errors
    /// Connection level errors from the initial pull.
    pub async fn start<F>(
        &mut self,
        on_change: F,
    ) -> Result<ConfigSnapshot>
    where
        F: FnMut(&str, ConfigSnapshot) + Send + 'static,
    {
        self.start_seeded(|_| {}, on_change).await
    }

    /// Like [`SyncEngine::start`], but first hands every child of the service node
    /// to `seed` as `(child_path, snapshot)`.
    ///
    /// `seed` returns before any watch is armed, so `on_change` never observes a
    /// change older than the seeded data.
    pub async fn start_seeded<S, F>(
        &mut self,
        seed: S,
        on_change: F,
    ) -> Result<ConfigSnapshot>
    where
        S: FnOnce(Vec<(String, ConfigSnapshot)>) + Send,
        F: FnMut(&str, ConfigSnapshot) + Send + 'static,
    {
        if self.fan_in.is_some() {
            return Err(Error::Fatal("sync engine is already started".into()));
        }

        self.set_state(SyncState::InitialSync);
        let sources = match fetch_sources(self.session.as_ref(), self.paths.service()).await {
            Ok(sources) => sources,
            Err(e) if e.is_not_found() => {
                warn!(
                    path = self.paths.service(),
                    "service node does not exist yet, starting with empty remote config"
                );
                Vec::new()
            }
            Err(e) => {
                self.set_state(SyncState::Disconnected);
                return Err(e);
            }
        };
        let initial = merge_sources(&sources);
        seed(sources);
        info!(
            path = self.paths.service(),
            keys = initial.len(),
            "initial snapshot fetched"
        );

        let (fan_in, signals) = NotificationFanIn::start(
            self.session.clone(),
            &self.paths.watched(),
            self.policy,
            self.config.signal_buffer_size,
            self.cancel.child_token(),
        );
        let resolver = ChangeResolver::new(self.session.clone(), self.config.max_indirection_depth);
        let cancel = self.cancel.clone();
        let state = self.state.clone();

        self.responder = Some(spawn_task("sync responder", move || async move {
            let result = respond(resolver, signals, on_change, cancel).await;
            state.send_replace(SyncState::Stopped);
            result
        }));
        self.fan_in = Some(fan_in);
        self.set_state(SyncState::Watching);

        Ok(initial)
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// State of every watch loop, sorted by path. Empty before `start`.
    pub fn watch_states(&self) -> Vec<(String, WatchState)> {
        self.fan_in.as_ref().map(|f| f.states()).unwrap_or_default()
    }

    pub fn subscribe_watch(
        &self,
        path: &str,
    ) -> Option<watch::Receiver<WatchState>> {
        self.fan_in.as_ref().and_then(|f| f.subscribe(path))
    }

    /// Replace the watch loop of `path`, typically one that ended `Failed`.
    ///
    /// The fresh loop publishes nothing until its first firing.
    pub fn restart_watch(
        &mut self,
        path: &str,
    ) -> Result<()> {
        match self.fan_in.as_mut() {
            Some(fan_in) => fan_in.restart(path),
            None => Err(WatchError::UnknownPath(path.to_string()).into()),
        }
    }

    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Cancel the watch loops and the responder and wait for all of them.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(mut fan_in) = self.fan_in.take() {
            fan_in.shutdown().await;
        }
        if let Some(responder) = self.responder.take() {
            if let Err(e) = responder.await {
                debug!("responder ended abnormally: {}", e);
            }
        }
        self.set_state(SyncState::Stopped);
        info!(path = self.paths.service(), "sync engine stopped");
    }

    fn set_state(
        &self,
        state: SyncState,
    ) {
        debug!(?state, "sync engine state");
        self.state.send_replace(state);
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn respond<F>(
    resolver: ChangeResolver,
    mut signals: mpsc::Receiver<WatchSignal>,
    mut on_change: F,
    cancel: CancellationToken,
) -> Result<()>
where
    F: FnMut(&str, ConfigSnapshot) + Send + 'static,
{
    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            s = signals.recv() => match s {
                Some(s) => s,
                None => return Err(WatchError::SignalChannelClosed.into()),
            },
        };

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            r = resolver.resolve(&signal.path) => r,
        };

        match resolved {
            Ok(resolution) if resolution.is_empty() => {
                warn!(path = %signal.path, "no listed target resolved, nothing delivered");
            }
            Ok(resolution) => {
                for change in resolution.changes {
                    debug!(path = %change.path, keys = change.snapshot.len(), "delivering change");
                    DELIVERIES_TOTAL.with_label_values(&[&change.path]).inc();
                    on_change(&change.path, change.snapshot);
                }
            }
            Err(e) => ChangeResolver::record_failure(&signal.path, &e),
        }
    }
}

/// Connect to `hosts`, pull the initial snapshot of `service_path` and keep it in sync.
///
/// The backend is chosen by `MICRO_DISCOVERY_MODE` (`zk` or `etcd`, default etcd).
/// The returned engine must be kept alive for updates to keep flowing.
///
/// # Errors
/// Connection level errors; a missing `service_path` yields an empty snapshot instead.
pub async fn start_sync<F>(
    hosts: Vec<String>,
    service_path: &str,
    on_change: F,
) -> Result<(ConfigSnapshot, SyncEngine)>
where
    F: FnMut(&str, ConfigSnapshot) + Send + 'static,
{
    let settings = Settings {
        config_hosts: hosts,
        discovery_mode: BackendKind::from_env(),
        ..Settings::default()
    };
    let paths = SyncPaths::new(service_path, &settings.sync.globals_node);

    let session = backend::connect(&settings).await?;
    let mut engine = SyncEngine::new(session, paths, settings.sync, settings.reconnect);
    let initial = engine.start(on_change).await?;
    Ok((initial, engine))
}
