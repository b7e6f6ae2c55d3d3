//! Resource operations shared by the action proxy and the MCP tools.
//!
//! Each operation takes loosely-typed [`Params`], validates them, resolves
//! status references, applies version checks and idempotency, calls the
//! upstream and shapes the result. Surfaces only differ in how they wrap
//! what these functions return.

mod directory;
mod epics;
mod issues;
mod projects;
mod stories;
mod tasks;

pub use tasks::TaskListing;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::concurrency::{self, ConcurrencyGuard, VersionStamp};
use crate::error::{BridgeError, BridgeResult};
use crate::idempotency::{IdempotencyCache, OperationKind};
use crate::model::{PageRequest, Record, ResourceKind, ResourceRef, StatusScope, slice};
use crate::pagination::PagingPolicy;
use crate::params::{Params, Patch};
use crate::resolution::{StatusResolver, StatusToken};
use crate::upstream::TaigaApi;

/// Field carrying the client's idempotency key on create requests.
pub const IDEMPOTENCY_KEY_FIELD: &str = "idempotency_key";

/// Taiga operations over one upstream.
#[derive(Clone)]
pub struct TaigaOps {
    api: Arc<dyn TaigaApi>,
    resolver: StatusResolver,
    guard: ConcurrencyGuard,
    idempotency: Arc<IdempotencyCache>,
    paging: PagingPolicy,
}

/// A status reference to resolve before a write.
struct StatusLookup {
    scope: StatusScope,
    project_id: u64,
    token: StatusToken,
}

/// A validated partial update.
struct UpdateRequest {
    reference: ResourceRef,
    payload: Record,
    status: Option<StatusToken>,
    scope: StatusScope,
    /// Project to resolve text statuses in; falls back to the record's own
    project_hint: Option<u64>,
    version: Option<u64>,
}

impl TaigaOps {
    pub fn new(
        api: Arc<dyn TaigaApi>,
        idempotency: Arc<IdempotencyCache>,
        paging: PagingPolicy,
    ) -> Self {
        Self {
            resolver: StatusResolver::new(Arc::clone(&api)),
            guard: ConcurrencyGuard::new(Arc::clone(&api)),
            api,
            idempotency,
            paging,
        }
    }

    fn page_request(&self, params: &Params) -> BridgeResult<Option<PageRequest>> {
        self.paging
            .resolve(params.opt_u64("page")?, params.opt_u64("page_size")?)
    }

    async fn get_one(&self, kind: ResourceKind, params: &Params) -> BridgeResult<Value> {
        let id = params.require_u64(kind.id_field())?;
        let record = self.api.get_resource(kind, id).await?;
        Ok(shape(kind, &record))
    }

    async fn delete(&self, kind: ResourceKind, params: &Params) -> BridgeResult<ResourceRef> {
        let reference = ResourceRef::new(kind, params.require_u64(kind.id_field())?);
        self.api.delete_resource(kind, reference.id()).await?;
        info!(resource = %reference, "Deleted");
        Ok(reference)
    }

    /// Create a record, at most once per idempotency key.
    ///
    /// Status resolution runs inside the idempotent section; a replay skips
    /// the status lookup as well as the create.
    async fn create(
        &self,
        op: OperationKind,
        kind: ResourceKind,
        params: &Params,
        payload: Record,
        status: Option<StatusLookup>,
    ) -> BridgeResult<Value> {
        let key = params.opt_str(IDEMPOTENCY_KEY_FIELD);

        self.idempotency
            .get_or_create(op, key.as_deref(), || async move {
                let mut payload = payload;
                if let Some(lookup) = status {
                    let status_id = self
                        .resolver
                        .resolve(lookup.scope, lookup.project_id, &lookup.token)
                        .await?;
                    payload.insert("status".into(), Value::from(status_id));
                }

                let record = self.api.create_resource(kind, &payload).await?;
                info!(
                    kind = %kind,
                    id = ?record.get("id").and_then(serde_json::Value::as_u64),
                    "Created"
                );
                Ok(shape(kind, &record))
            })
            .await
    }

    /// Apply a version-checked partial update.
    async fn update(&self, request: UpdateRequest) -> BridgeResult<Value> {
        let UpdateRequest {
            reference,
            mut payload,
            status,
            scope,
            project_hint,
            version,
        } = request;

        if payload.is_empty() && status.is_none() {
            return Err(BridgeError::validation(
                "At least one field must be provided to update",
            ));
        }

        let (existing, current) = self.guard.load(&reference).await?;
        let version = concurrency::check(&reference, version.map(VersionStamp), current)?;

        if let Some(token) = status {
            let project_id = match project_hint {
                Some(id) => id,
                None => existing
                    .get("project")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        BridgeError::upstream(format!(
                            "Unable to resolve project for {} status lookup",
                            reference.kind()
                        ))
                    })?,
            };
            let status_id = self.resolver.resolve(scope, project_id, &token).await?;
            payload.insert("status".into(), Value::from(status_id));
        }

        debug!(resource = %reference, version = %version, fields = payload.len(), "Applying update");
        let record = self.guard.apply(&reference, &payload, version).await?;
        Ok(shape(reference.kind(), &record))
    }
}

/// Keep the caller-visible fields of a record.
pub(crate) fn shape(kind: ResourceKind, record: &Record) -> Value {
    slice(record, kind.fields())
}

/// Copy a patch into an upstream payload under `field`.
fn put_patch<T: Into<Value>>(payload: &mut Record, field: &str, patch: Patch<T>) {
    if let Some(value) = patch.into_json() {
        payload.insert(field.to_string(), value);
    }
}

/// Subject for an update; clearing it is not allowed.
fn subject_patch(params: &Params) -> BridgeResult<Patch<String>> {
    match params.patch_string("subject") {
        Patch::Null => Err(BridgeError::validation("subject cannot be null")),
        other => Ok(other),
    }
}

/// Tags for a write; `null` clears to an empty list.
fn tags_patch(params: &Params) -> BridgeResult<Patch<Value>> {
    Ok(match params.tags("tags")? {
        Patch::Unset => Patch::Unset,
        Patch::Null => Patch::Value(Value::Array(Vec::new())),
        Patch::Value(tags) => Patch::Value(Value::Array(tags)),
    })
}

/// Case-insensitive substring match on any of `fields`.
fn text_matches(record: &Record, fields: &[&str], needle: &str) -> bool {
    let needle = needle.to_lowercase();
    fields.iter().any(|field| {
        record
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|value| value.to_lowercase().contains(&needle))
    })
}
