//! Process wide key-value configuration.
//!
//! Reads are lock free: the map lives behind an `ArcSwap` and every write
//! publishes a fresh map. Writers are serialized by one mutex that also guards
//! which keys each source path contributed.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use tracing::warn;

use crate::constants::DEFAULT_LIST_SEPARATOR;
use crate::ConfigSnapshot;

/// Well known keys shared by services.
pub mod keys {
    pub const DATABASE: &str = "database";
    pub const DB_HOST: &str = "dbhost";
    pub const DB_PORT: &str = "dbport";
    pub const DB_NAME: &str = "dbname";
    pub const DB_UID: &str = "dbuid";
    pub const DB_PWD: &str = "dbpwd";
}

const EVENT_BUFFER_SIZE: usize = 64;

/// How a change from a path is merged into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Keys the path contributed earlier but no longer carries are removed
    #[default]
    Replace,
    /// Only insert and overwrite, never remove
    Overlay,
}

/// Published after every applied change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub path: String,
    /// Keys added, updated or removed, sorted
    pub keys: Vec<String>,
}

#[derive(Default)]
struct Sources {
    attributed: HashMap<String, HashSet<String>>,
    overrides: ConfigSnapshot,
    last_event_path: Option<String>,
}

pub struct ConfigStore {
    data: ArcSwap<ConfigSnapshot>,
    sources: Mutex<Sources>,
    policy: MergePolicy,
    events: broadcast::Sender<ConfigEvent>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("policy", &self.policy)
            .field("keys", &self.data.load().len())
            .finish()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(MergePolicy::default())
    }
}

impl ConfigStore {
    pub fn new(policy: MergePolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            data: ArcSwap::from_pointee(ConfigSnapshot::new()),
            sources: Mutex::new(Sources::default()),
            policy,
            events,
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Merge `snapshot` as the content of `source` without publishing an event.
    pub fn seed(
        &self,
        source: &str,
        snapshot: ConfigSnapshot,
    ) {
        let mut sources = self.sources.lock();
        let changed = self.merge(&mut sources, source, snapshot);
        debug!(source, keys = changed.len(), "store seeded");
    }

    /// Merge a delivered change and notify subscribers.
    pub fn apply_change(
        &self,
        path: &str,
        snapshot: ConfigSnapshot,
    ) -> ConfigEvent {
        let event = {
            let mut sources = self.sources.lock();
            let keys = self.merge(&mut sources, path, snapshot);
            sources.last_event_path = Some(path.to_string());
            ConfigEvent {
                path: path.to_string(),
                keys,
            }
        };

        debug!(path, keys = ?event.keys, "config changed");
        // No subscriber is fine
        let _ = self.events.send(event.clone());
        event
    }

    /// Keys that always win over every source, e.g. `MICRO_*` environment values.
    pub fn set_overrides(
        &self,
        overrides: ConfigSnapshot,
    ) {
        let mut sources = self.sources.lock();
        let mut data = ConfigSnapshot::clone(&self.data.load());
        data.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        sources.overrides = overrides;
        self.data.store(Arc::new(data));
    }

    fn merge(
        &self,
        sources: &mut Sources,
        source: &str,
        snapshot: ConfigSnapshot,
    ) -> Vec<String> {
        let mut data = ConfigSnapshot::clone(&self.data.load());
        let mut changed = BTreeSet::new();

        let incoming: HashSet<String> = snapshot.keys().cloned().collect();
        if self.policy == MergePolicy::Replace {
            let previous = sources.attributed.remove(source).unwrap_or_default();
            for stale in previous.difference(&incoming) {
                let still_owned = sources.attributed.values().any(|keys| keys.contains(stale));
                if !still_owned && data.remove(stale).is_some() {
                    changed.insert(stale.clone());
                }
            }
        }

        for (key, value) in snapshot {
            if data.get(&key) != Some(&value) {
                changed.insert(key.clone());
            }
            data.insert(key, value);
        }
        sources
            .attributed
            .entry(source.to_string())
            .or_default()
            .extend(incoming);

        // Overridden keys never change their effective value
        for (key, value) in &sources.overrides {
            changed.remove(key);
            data.insert(key.clone(), value.clone());
        }

        self.data.store(Arc::new(data));
        changed.into_iter().collect()
    }

    /// Value of `key`, or `default` when it is missing.
    pub fn get(
        &self,
        key: &str,
        default: &str,
    ) -> String {
        self.data
            .load()
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// `key` split into a list.
    ///
    /// The separator is `,` unless `default` is a single character, which then
    /// doubles as the separator. An empty value is an empty list.
    pub fn get_list(
        &self,
        key: &str,
        default: &str,
    ) -> Vec<String> {
        let value = self.get(key, default);
        if value.is_empty() {
            return vec![];
        }
        let separator = if default.chars().count() == 1 {
            default
        } else {
            DEFAULT_LIST_SEPARATOR
        };
        value.split(separator).map(str::to_string).collect()
    }

    pub fn get_int(
        &self,
        key: &str,
        default: i64,
    ) -> i64 {
        self.parse_or(key, default)
    }

    /// Accepts `1`, `t`, `true`, `0`, `f`, `false` in any case.
    pub fn get_bool(
        &self,
        key: &str,
        default: bool,
    ) -> bool {
        self.parse_or::<Flag>(key, Flag(default)).0
    }

    fn parse_or<T>(
        &self,
        key: &str,
        default: T,
    ) -> T
    where
        T: FromStr,
    {
        let data = self.data.load();
        let Some(raw) = data.get(key) else {
            return default;
        };
        raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "malformed value, using default");
            default
        })
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.data.load().contains_key(key)
    }

    /// Point in time copy of the whole map.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.data.load_full()
    }

    /// Path of the most recent applied change.
    pub fn last_event_path(&self) -> Option<String> {
        self.sources.lock().last_event_path.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }
}

struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "t" | "true" => Ok(Flag(true)),
            "0" | "f" | "false" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}
