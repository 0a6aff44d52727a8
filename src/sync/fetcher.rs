use tracing::debug;
use tracing::warn;

use super::decode_snapshot;
use super::ConfigSnapshot;
use crate::metrics::DECODE_ERRORS_TOTAL;
use crate::utils::path::join;
use crate::CoordinationBackend;
use crate::Error;
use crate::Result;

/// Pull the initial configuration of a service.
///
/// Lists every immediate child of `service_path`, decodes each child payload as a
/// key-value object and merges them in listing order (last listed wins on key
/// collisions). Undecodable children are logged and skipped.
///
/// # Errors
/// `Error::NotFound` when `service_path` does not exist; connection level errors
/// from the backend.
pub async fn fetch_snapshot(
    session: &dyn CoordinationBackend,
    service_path: &str,
) -> Result<ConfigSnapshot> {
    let sources = fetch_sources(session, service_path).await?;
    Ok(merge_sources(&sources))
}

/// Decoded payload of every child of `service_path`, keyed by child path, in
/// listing order. Same errors as [`fetch_snapshot`].
pub async fn fetch_sources(
    session: &dyn CoordinationBackend,
    service_path: &str,
) -> Result<Vec<(String, ConfigSnapshot)>> {
    if !session.exists(service_path).await? {
        return Err(Error::NotFound(service_path.to_string()));
    }

    let children = session.children(service_path).await?;
    debug!(path = service_path, children = children.len(), "fetching snapshot");

    let mut sources = Vec::with_capacity(children.len());
    for child in children {
        let child_path = join(service_path, &child);
        let data = match session.read(&child_path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!(path = %child_path, "child removed while fetching, skipped");
                continue;
            }
            Err(e) => return Err(e),
        };

        match decode_snapshot(&child_path, &data) {
            Ok(map) => sources.push((child_path, map)),
            Err(e) => {
                warn!(path = %child_path, "dropping undecodable child: {}", e);
                DECODE_ERRORS_TOTAL.with_label_values(&[&child_path]).inc();
            }
        }
    }

    Ok(sources)
}

/// Union of `sources`, later entries win on key collisions.
pub fn merge_sources(sources: &[(String, ConfigSnapshot)]) -> ConfigSnapshot {
    sources
        .iter()
        .flat_map(|(_, map)| map.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect()
}
