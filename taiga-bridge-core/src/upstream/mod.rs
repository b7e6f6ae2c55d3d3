//! The Taiga REST API as seen by the bridge.
//!
//! [`TaigaApi`] is the seam between the operations layer and the network;
//! [`TaigaClient`] is the reqwest implementation used in production.

mod client;

pub use client::{TaigaClient, TaigaConfig};

use serde_json::Value;
use thiserror::Error;

use crate::model::{Page, PageRequest, Record, ResourceKind, StatusRecord, StatusScope};

/// Query filters forwarded to a list endpoint. Keys may repeat.
pub type Filters = Vec<(String, String)>;

/// Failures talking to the upstream API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// 404 from the upstream.
    #[error("Taiga resource not found: {path}")]
    NotFound { path: String },

    /// 409 or 412: the write precondition failed.
    #[error("Taiga reported a version conflict on {path}")]
    Conflict { path: String },

    /// Other 4xx with the upstream's explanation.
    #[error("Taiga rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// 401/403 after re-authentication, or a failed login.
    #[error("Taiga denied the service account (HTTP {status})")]
    Denied { status: u16 },

    /// 5xx from the upstream.
    #[error("Taiga server error (HTTP {status})")]
    Server { status: u16 },

    #[error("Taiga request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Cannot connect to Taiga: {reason}")]
    Connect { reason: String },

    /// The body was not the JSON shape expected.
    #[error("Unexpected Taiga response: {details}")]
    Decode { details: String },

    /// The client itself is misconfigured.
    #[error("Taiga client misconfigured: {details}")]
    Config { details: String },
}

impl UpstreamError {
    /// Whether the upstream refused the service account's credentials.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}

/// Operations the bridge needs from Taiga.
///
/// Implementations must be shareable across tasks; the production client
/// caches its auth token internally.
#[async_trait::async_trait]
pub trait TaigaApi: Send + Sync {
    /// Id of the authenticated service account.
    async fn current_user_id(&self) -> Result<u64, UpstreamError>;

    /// Fetch one record.
    async fn get_resource(&self, kind: ResourceKind, id: u64) -> Result<Record, UpstreamError>;

    /// Fetch a project by slug.
    async fn get_project_by_slug(&self, slug: &str) -> Result<Record, UpstreamError>;

    /// List records of `kind`. A page past the end yields an empty page.
    async fn list_resources(
        &self,
        kind: ResourceKind,
        filters: &Filters,
        page: Option<PageRequest>,
    ) -> Result<Page, UpstreamError>;

    /// Create a record and return it.
    async fn create_resource(
        &self,
        kind: ResourceKind,
        payload: &Record,
    ) -> Result<Record, UpstreamError>;

    /// Patch a record. `expected_version` is sent as the write precondition.
    async fn update_resource(
        &self,
        kind: ResourceKind,
        id: u64,
        payload: &Record,
        expected_version: Option<u64>,
    ) -> Result<Record, UpstreamError>;

    /// Delete a record.
    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<(), UpstreamError>;

    /// The status set of a project for one scope.
    async fn list_statuses(
        &self,
        scope: StatusScope,
        project_id: u64,
    ) -> Result<Vec<StatusRecord>, UpstreamError>;

    /// Attach a story to an epic; returns the link record if any.
    async fn link_story_to_epic(
        &self,
        epic_id: u64,
        story_id: u64,
    ) -> Result<Option<Value>, UpstreamError>;

    /// Project membership entries (each may wrap a `user` object).
    async fn list_project_members(&self, project_id: u64) -> Result<Vec<Value>, UpstreamError>;
}
