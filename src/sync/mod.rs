//! Watch based synchronization engine.
//!
//! ```text
//!   SnapshotFetcher ──(initial pull)──────────────────────────┐
//!                                                             ▼
//!   WatchArmer(service) ─┐                                 caller
//!                        ├─► mpsc<WatchSignal> ─► responder ─► ChangeResolver ─► on_change
//!   WatchArmer(globals) ─┘    (NotificationFanIn)   (single task, serial delivery)
//! ```
//!
//! Watches are one-shot. Each armer re-arms right after publishing its signal, and
//! the resolver always re-reads current data, so a change landing between firing
//! and re-arming is still picked up by the next read.

mod armer;
mod engine;
mod fan_in;
mod fetcher;
mod payload;
mod resolver;

pub use armer::*;
pub use engine::*;
pub use fan_in::*;
pub use fetcher::*;
pub use payload::*;
pub use resolver::*;

#[cfg(test)]
mod fan_in_test;

use std::collections::HashMap;

use crate::utils::path::globals_path;
use crate::utils::path::normalize;

/// Flat key-value configuration, replaced wholesale on every resolve.
pub type ConfigSnapshot = HashMap<String, String>;

/// Identity of a path whose watch fired. Receipt only means "re-read this path now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSignal {
    pub path: String,
}

/// The two watched nodes of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPaths {
    service: String,
    globals: String,
}

impl SyncPaths {
    pub fn new(
        service_path: impl AsRef<str>,
        globals_node: &str,
    ) -> Self {
        let service = normalize(service_path.as_ref());
        let globals = globals_path(&service, globals_node);
        Self { service, globals }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn globals(&self) -> &str {
        &self.globals
    }

    pub fn watched(&self) -> Vec<String> {
        vec![self.service.clone(), self.globals.clone()]
    }
}
