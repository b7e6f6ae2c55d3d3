//! Status reference resolution.
//!
//! Callers may name a status by numeric id or by its human-readable name or
//! slug. Text tokens are matched case-insensitively against the project's
//! status set for the relevant scope; a token must match exactly one status.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::model::{StatusRecord, StatusScope};
use crate::upstream::TaigaApi;

/// A status reference as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusToken {
    /// Already an upstream status id.
    Numeric(u64),
    /// A name or slug to look up.
    Text(String),
}

impl StatusToken {
    /// Interpret a JSON value as a status token.
    ///
    /// Digit-only strings (as produced by query strings) are numeric.
    /// Returns `None` for values that are neither integers nor strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self::Numeric),
            Value::String(s) => Some(Self::parse(s)),
            _ => None,
        }
    }

    /// Interpret a raw string as a status token.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse() {
                return Self::Numeric(id);
            }
        }
        Self::Text(raw.to_string())
    }
}

impl std::fmt::Display for StatusToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Match `candidate` against a status set.
///
/// Comparison trims surrounding whitespace and ignores ASCII/Unicode case on
/// both name and slug. A status matching on both fields counts once.
pub fn match_status(
    statuses: &[StatusRecord],
    candidate: &str,
    scope: StatusScope,
    project_id: u64,
) -> BridgeResult<u64> {
    let needle = candidate.trim().to_lowercase();

    let mut matches: Vec<u64> = statuses
        .iter()
        .filter(|status| {
            status.name.trim().to_lowercase() == needle
                || status.slug.trim().to_lowercase() == needle
        })
        .map(|status| status.id)
        .collect();
    matches.sort_unstable();
    matches.dedup();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(BridgeError::not_found(format!(
            "{} status '{}' not found for project {}",
            capitalize(scope),
            candidate,
            project_id
        ))),
        _ => Err(BridgeError::AmbiguousReference {
            token: candidate.to_string(),
            project_id,
            candidates: matches,
        }),
    }
}

fn capitalize(scope: StatusScope) -> &'static str {
    match scope {
        StatusScope::Story => "Story",
        StatusScope::Task => "Task",
        StatusScope::Epic => "Epic",
        StatusScope::Issue => "Issue",
    }
}

/// Resolves status tokens to ids, fetching status sets on demand.
///
/// Nothing is cached between calls; each resolution reads the current
/// status set so renamed statuses are picked up immediately.
#[derive(Clone)]
pub struct StatusResolver {
    api: Arc<dyn TaigaApi>,
}

impl StatusResolver {
    pub fn new(api: Arc<dyn TaigaApi>) -> Self {
        Self { api }
    }

    /// Resolve `token` within `project_id`'s status set for `scope`.
    ///
    /// Numeric tokens are returned unchanged without an upstream call.
    pub async fn resolve(
        &self,
        scope: StatusScope,
        project_id: u64,
        token: &StatusToken,
    ) -> BridgeResult<u64> {
        let candidate = match token {
            StatusToken::Numeric(id) => return Ok(*id),
            StatusToken::Text(text) => text,
        };

        let statuses = self.api.list_statuses(scope, project_id).await?;
        let resolved = match_status(&statuses, candidate, scope, project_id)?;
        debug!(
            scope = %scope,
            project_id,
            token = %candidate,
            status_id = resolved,
            "Resolved status reference"
        );
        Ok(resolved)
    }
}
