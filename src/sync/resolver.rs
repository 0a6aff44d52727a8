use std::collections::HashSet;

use tracing::debug;
use tracing::warn;

use super::ConfigSnapshot;
use super::Payload;
use crate::metrics::DECODE_ERRORS_TOTAL;
use crate::DecodeError;
use crate::Error;
use crate::Result;
use crate::Session;

/// One concrete key-value map and the node it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChange {
    pub path: String,
    pub snapshot: ConfigSnapshot,
}

/// Everything a single fired path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub fired_path: String,
    /// Direct payload: one change for the fired path. Indirection: one change per
    /// resolved target, in listing order.
    pub changes: Vec<ResolvedChange>,
}

impl Resolution {
    /// Union of every resolved map, later targets overwrite earlier ones.
    pub fn merged(&self) -> ConfigSnapshot {
        let mut merged = ConfigSnapshot::new();
        for change in &self.changes {
            merged.extend(change.snapshot.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Turns a fired path into concrete key-value maps, following indirection lists.
pub struct ChangeResolver {
    session: Session,
    max_depth: usize,
}

impl ChangeResolver {
    pub fn new(
        session: Session,
        max_depth: usize,
    ) -> Self {
        Self { session, max_depth }
    }

    /// Re-read `path` and resolve it.
    ///
    /// # Errors
    /// - `Error::Decode` when the fired path's own payload matches neither shape
    /// - `Error::NotFound` when the fired path no longer exists
    /// - connection level errors, also when hit while reading a listed target
    ///
    /// Decode or read failures of individual listed targets are logged and only
    /// drop that target.
    pub async fn resolve(
        &self,
        path: &str,
    ) -> Result<Resolution> {
        let data = self.session.read(path).await?;
        let targets = match Payload::decode(path, &data)? {
            Payload::Snapshot(snapshot) => {
                return Ok(Resolution {
                    fired_path: path.to_string(),
                    changes: vec![ResolvedChange {
                        path: path.to_string(),
                        snapshot,
                    }],
                });
            }
            Payload::Indirection(targets) => targets,
        };

        debug!(path, targets = ?targets, "resolving indirection");
        let mut visited = HashSet::from([path.to_string()]);
        let mut changes = Vec::with_capacity(targets.len());

        // Depth first, preserving listing order
        let mut stack: Vec<(String, usize)> = targets.into_iter().rev().map(|t| (t, 1)).collect();
        while let Some((target, depth)) = stack.pop() {
            if !visited.insert(target.clone()) {
                warn!(path, target = %target, "target already resolved for this change, skipped");
                continue;
            }

            let data = match self.session.read(&target).await {
                Ok(data) => data,
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(path, target = %target, "skipping unreadable target: {}", e);
                    continue;
                }
            };

            match Payload::decode(&target, &data) {
                Ok(Payload::Snapshot(snapshot)) => changes.push(ResolvedChange {
                    path: target,
                    snapshot,
                }),
                Ok(Payload::Indirection(next)) if depth < self.max_depth => {
                    stack.extend(next.into_iter().rev().map(|t| (t, depth + 1)));
                }
                Ok(Payload::Indirection(_)) => {
                    let e = DecodeError::TooDeep {
                        path: target.clone(),
                        max_depth: self.max_depth,
                    };
                    warn!(path, "skipping target: {}", e);
                }
                Err(e) => {
                    warn!(path, target = %target, "skipping undecodable target: {}", e);
                    DECODE_ERRORS_TOTAL.with_label_values(&[&target]).inc();
                }
            }
        }

        Ok(Resolution {
            fired_path: path.to_string(),
            changes,
        })
    }

    pub(crate) fn record_failure(
        path: &str,
        e: &Error,
    ) {
        match e {
            Error::Decode(decode) => {
                warn!(path, "change dropped: {}", decode);
                DECODE_ERRORS_TOTAL.with_label_values(&[path]).inc();
            }
            Error::NotFound(_) => {
                debug!(path, "fired path no longer exists, nothing to deliver");
            }
            other => {
                warn!(path, "change dropped, resolve failed: {}", other);
            }
        }
    }
}
