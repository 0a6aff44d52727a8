//! Settings for the configuration sync engine.
//!
//! Provides hierarchical settings loading with priority:
//! 1. Default values (hardcoded)
//! 2. Local JSON file (`service.conf`, or the file named by `CONFIG_PATH`)
//! 3. Environment variables with the `MICRO_` prefix (highest priority)
//!
//! Nested fields are reachable from the environment with `__`, e.g.
//! `MICRO_SYNC__SIGNAL_BUFFER_SIZE=128`. `MICRO_CONFIGHOSTS` is a comma list.

mod backend;
mod retry;
mod sync;
pub use backend::*;
pub use retry::*;
pub use sync::*;

#[cfg(test)]
mod config_test;

//---
use std::collections::HashMap;
use std::env;

use config::Config;
use config::Environment;
use config::File;
use config::FileFormat;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_PATH_ENV;
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::constants::DEFAULT_SERVICE_ROOT;
use crate::constants::ENV_PREFIX;
use crate::Error;
use crate::Result;
use crate::SyncPaths;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    /// Name of the node holding this service's configuration children
    #[serde(default, alias = "ServiceName", alias = "servicename")]
    pub service_name: String,

    /// Parent of every service node
    #[serde(
        default = "default_service_root",
        alias = "ServiceRoot",
        alias = "serviceroot"
    )]
    pub service_root: String,

    /// Coordination service endpoints (`host:port`)
    #[serde(default, alias = "ConfigHosts", alias = "confighosts")]
    pub config_hosts: Vec<String>,

    /// Local key-values, lowest priority data layer
    #[serde(default, alias = "ConfigData", alias = "configdata")]
    pub config_data: HashMap<String, String>,

    #[serde(default)]
    pub discovery_mode: BackendKind,

    /// Skip the coordination service entirely
    #[serde(default)]
    pub local_only: bool,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default = "default_reconnect_policy")]
    pub reconnect: BackoffPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            service_root: default_service_root(),
            config_hosts: vec![],
            config_data: HashMap::new(),
            discovery_mode: BackendKind::default(),
            local_only: false,
            sync: SyncConfig::default(),
            reconnect: default_reconnect_policy(),
        }
    }
}

impl Settings {
    /// Load settings from the local file and the environment.
    ///
    /// # Arguments
    /// * `config_file` - Explicit settings file. When given it must exist; otherwise `CONFIG_PATH`
    ///   or `service.conf` is used if present.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let (path, required) = match config_file {
            Some(p) => (p.to_string(), true),
            None => (
                env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string()),
                false,
            ),
        };

        let settings: Settings = Config::builder()
            .add_source(File::new(&path, FileFormat::Json).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("confighosts")
                    .with_list_parse_key("config_hosts")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validates settings consistency
    /// # Errors
    /// Returns `Error::InvalidConfig` if any rule is violated
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(Error::InvalidConfig("service_name must have a value".into()));
        }

        if self.service_name.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "service_name {} must be a single path segment",
                self.service_name
            )));
        }

        if !self.service_root.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "service_root {} must be an absolute path",
                self.service_root
            )));
        }

        if self.config_hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(Error::InvalidConfig("config_hosts contains an empty entry".into()));
        }

        self.sync.validate()?;
        self.reconnect.validate()
    }

    /// Remote sync only runs when hosts are configured and local mode is off.
    pub fn remote_enabled(&self) -> bool {
        !self.local_only && !self.config_hosts.is_empty()
    }

    /// `<service_root>/<service_name>`
    pub fn service_path(&self) -> String {
        format!(
            "{}/{}",
            self.service_root.trim_end_matches('/'),
            self.service_name
        )
    }

    /// Reconnect delays with the session establishment timeout and attempt count.
    pub fn connect_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.sync.connect_attempts,
            timeout_ms: self.sync.connect_timeout_ms,
            ..self.reconnect
        }
    }

    pub fn sync_paths(&self) -> SyncPaths {
        SyncPaths::new(self.service_path(), &self.sync.globals_node)
    }
}

fn default_service_root() -> String {
    DEFAULT_SERVICE_ROOT.to_string()
}
