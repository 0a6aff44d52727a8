//! Watch based configuration sync for ZooKeeper and etcd.
//!
//! A service's configuration lives under `<root>/<service>` in the coordination
//! service, shared values under the sibling `globals` node. [`start_sync`] pulls
//! the initial snapshot and keeps calling back with every resolved change;
//! [`ConfigLoader`] wires that into a [`ConfigStore`] layered with local file and
//! environment values.

pub mod backend;
mod config;
mod constants;
mod errors;
mod loader;
mod metrics;
mod store;
mod sync;
pub mod utils;

pub use backend::*;
pub use config::*;
pub use errors::*;
pub use loader::*;
pub use metrics::gather_metrics;
pub use store::*;
pub use sync::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
