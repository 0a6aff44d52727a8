use std::env;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::constants::DISCOVERY_MODE_ENV;
use crate::Error;
use crate::Result;

/// Which coordination service the hosts belong to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "zookeeper")]
    Zk,
    #[default]
    Etcd,
}

impl fmt::Display for BackendKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            BackendKind::Zk => write!(f, "zk"),
            BackendKind::Etcd => write!(f, "etcd"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zk" | "zookeeper" => Ok(BackendKind::Zk),
            "etcd" => Ok(BackendKind::Etcd),
            other => Err(Error::InvalidConfig(format!("unknown discovery mode {other:?}"))),
        }
    }
}

impl BackendKind {
    /// Backend named by `MICRO_DISCOVERY_MODE`, etcd when unset or unknown.
    pub fn from_env() -> Self {
        match env::var(DISCOVERY_MODE_ENV) {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                warn!("{}, falling back to etcd", e);
                BackendKind::Etcd
            }),
            Err(_) => BackendKind::default(),
        }
    }
}
