//! Optimistic concurrency for updates.
//!
//! Every update reads the current record first. A caller-supplied version
//! that differs from the current one is rejected before anything is
//! written; otherwise the version is forwarded as the write precondition.
//! A stale write detected upstream is reported with the latest version and
//! never retried.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::model::{Record, ResourceRef};
use crate::upstream::{TaigaApi, UpstreamError};

/// A record's version stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionStamp(pub u64);

impl std::fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read the version stamp carried by `record`.
pub fn current_version(reference: &ResourceRef, record: &Record) -> BridgeResult<VersionStamp> {
    let version = match record.get("version") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    version.map(VersionStamp).ok_or_else(|| {
        BridgeError::upstream(format!(
            "Unable to resolve version for {} update",
            reference.kind()
        ))
    })
}

/// Compare the caller's version with the current one.
///
/// Returns the version to send upstream.
pub fn check(
    reference: &ResourceRef,
    supplied: Option<VersionStamp>,
    current: VersionStamp,
) -> BridgeResult<VersionStamp> {
    match supplied {
        Some(supplied) if supplied != current => Err(BridgeError::VersionConflict {
            details: format!(
                "Conflict updating {reference}: supplied version {supplied} does not match current version {current}"
            ),
        }),
        _ => Ok(current),
    }
}

/// Reads current state and applies version-checked writes.
#[derive(Clone)]
pub struct ConcurrencyGuard {
    api: Arc<dyn TaigaApi>,
}

impl ConcurrencyGuard {
    pub fn new(api: Arc<dyn TaigaApi>) -> Self {
        Self { api }
    }

    /// Fetch the record to be updated together with its version.
    ///
    /// Only versioned kinds can be updated through the guard.
    pub async fn load(&self, reference: &ResourceRef) -> BridgeResult<(Record, VersionStamp)> {
        if !reference.kind().is_versioned() {
            return Err(BridgeError::internal(format!(
                "{} records carry no version stamp",
                reference.kind()
            )));
        }
        let record = self
            .api
            .get_resource(reference.kind(), reference.id())
            .await?;
        let version = current_version(reference, &record)?;
        Ok((record, version))
    }

    /// Write `payload` with `version` as the precondition.
    ///
    /// An upstream conflict triggers one read of the latest version for the
    /// error message; the write itself is not retried.
    pub async fn apply(
        &self,
        reference: &ResourceRef,
        payload: &Record,
        version: VersionStamp,
    ) -> BridgeResult<Record> {
        match self
            .api
            .update_resource(reference.kind(), reference.id(), payload, Some(version.0))
            .await
        {
            Ok(record) => Ok(record),
            Err(UpstreamError::Conflict { .. }) => {
                let latest = self
                    .api
                    .get_resource(reference.kind(), reference.id())
                    .await
                    .ok()
                    .and_then(|record| current_version(reference, &record).ok());
                warn!(
                    resource = %reference,
                    sent_version = version.0,
                    latest_version = ?latest.map(|v| v.0),
                    "Stale update rejected by Taiga"
                );
                let details = match latest {
                    Some(latest) => {
                        format!("Conflict updating {reference}: latest version is {latest}")
                    }
                    None => format!("Conflict updating {reference}: version {version} is stale"),
                };
                Err(BridgeError::VersionConflict { details })
            }
            Err(other) => {
                debug!(resource = %reference, error = %other, "Update failed");
                Err(other.into())
            }
        }
    }
}
