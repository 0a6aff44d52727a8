//! Assembles the process configuration.
//!
//! Layers, lowest priority first:
//! 1. `config_data` from the local settings file
//! 2. the remote snapshot of the service node, then every delivered change
//! 3. `MICRO_*` environment variables, lower-cased with the prefix removed
//!
//! Remote sync is skipped in local mode or without hosts. A remote that cannot be
//! reached is logged and the process runs on local and environment values.

use std::env;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use tracing::warn;

use crate::constants::ENV_PREFIX;
use crate::ConfigEvent;
use crate::ConfigSnapshot;
use crate::ConfigStore;
use crate::MergePolicy;
use crate::Result;
use crate::Session;
use crate::Settings;
use crate::SyncEngine;

/// Source name of the `config_data` layer
pub const LOCAL_SOURCE: &str = "local";

#[derive(Debug)]
pub struct ConfigLoader {
    settings: Settings,
    store: Arc<ConfigStore>,
    engine: Option<SyncEngine>,
}

impl ConfigLoader {
    /// Load settings from `config_file` (or `CONFIG_PATH` / `service.conf`) and
    /// the environment, then start remote sync when enabled.
    ///
    /// # Errors
    /// Only settings errors. Remote failures fall back to local config.
    pub async fn load(config_file: Option<&str>) -> Result<Self> {
        let settings = Settings::load(config_file)?;
        Self::with_settings(settings, MergePolicy::default()).await
    }

    pub async fn with_settings(
        settings: Settings,
        policy: MergePolicy,
    ) -> Result<Self> {
        settings.validate()?;
        let engine = if settings.remote_enabled() {
            match SyncEngine::connect(&settings).await {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!(
                        hosts = ?settings.config_hosts,
                        "coordination service unreachable, using local config only: {}",
                        e
                    );
                    None
                }
            }
        } else {
            info!(
                local_only = settings.local_only,
                "remote config disabled, using local config only"
            );
            None
        };

        Ok(Self::assemble(settings, policy, engine).await)
    }

    /// Sync over an already established session.
    pub async fn with_session(
        settings: Settings,
        session: Session,
        policy: MergePolicy,
    ) -> Self {
        let engine = SyncEngine::new(
            session,
            settings.sync_paths(),
            settings.sync.clone(),
            settings.reconnect,
        );
        Self::assemble(settings, policy, Some(engine)).await
    }

    async fn assemble(
        settings: Settings,
        policy: MergePolicy,
        engine: Option<SyncEngine>,
    ) -> Self {
        let store = Arc::new(ConfigStore::new(policy));
        store.seed(LOCAL_SOURCE, settings.config_data.clone());
        store.set_overrides(env_overrides());

        let engine = match engine {
            Some(engine) => Self::start_remote(&settings, &store, engine).await,
            None => None,
        };

        Self {
            settings,
            store,
            engine,
        }
    }

    async fn start_remote(
        settings: &Settings,
        store: &Arc<ConfigStore>,
        mut engine: SyncEngine,
    ) -> Option<SyncEngine> {
        // Each child is its own source, so a later change of one child or of the
        // service node never removes keys another child contributed
        let seeded = store.clone();
        let seed = move |sources: Vec<(String, ConfigSnapshot)>| {
            for (path, snapshot) in sources {
                seeded.seed(&path, snapshot);
            }
        };
        let sink = store.clone();
        let on_change = move |path: &str, snapshot: ConfigSnapshot| {
            sink.apply_change(path, snapshot);
        };

        match engine.start_seeded(seed, on_change).await {
            Ok(initial) => {
                info!(
                    path = %settings.service_path(),
                    keys = initial.len(),
                    "remote config loaded"
                );
                Some(engine)
            }
            Err(e) => {
                warn!("initial remote sync failed, using local config only: {}", e);
                None
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    /// Whether remote sync is running.
    pub fn is_remote(&self) -> bool {
        self.engine.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.store.subscribe()
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown().await;
        }
    }
}

/// `MICRO_DBHOST=x` becomes `dbhost = x`. Nested settings keys (`__`) are skipped.
pub(crate) fn env_overrides() -> ConfigSnapshot {
    let prefix = format!("{}_", ENV_PREFIX.to_ascii_lowercase());
    env::vars()
        .filter_map(|(key, value)| {
            let key = key.to_ascii_lowercase();
            let name = key.strip_prefix(&prefix)?;
            if name.is_empty() || name.contains("__") {
                return None;
            }
            Some((name.to_string(), value))
        })
        .collect()
}
