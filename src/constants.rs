// -
// Settings sources

/// Local JSON settings file, read from the working directory
pub(crate) const DEFAULT_CONFIG_FILE: &str = "service.conf";

/// Overrides the location of the local settings file
pub(crate) const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Prefix shared by settings env vars and data overrides (`MICRO_DBHOST` -> `dbhost`)
pub(crate) const ENV_PREFIX: &str = "MICRO";

/// Backend selector read by `start_sync` (`zk` or `etcd`)
pub(crate) const DISCOVERY_MODE_ENV: &str = "MICRO_DISCOVERY_MODE";

// -
// Path layout

/// Default parent of every service node
pub(crate) const DEFAULT_SERVICE_ROOT: &str = "/service";

/// Sibling node shared by all services under the same parent
pub(crate) const DEFAULT_GLOBALS_NODE: &str = "globals";

pub(crate) const PATH_SEPARATOR: char = '/';

// -
// Accessors

pub(crate) const DEFAULT_LIST_SEPARATOR: &str = ",";
