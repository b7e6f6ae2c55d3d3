//! Action proxy gateway (`/actions/*`).
//!
//! A synchronous REST facade over the same operations the MCP tools expose.
//! Reads take their parameters from the query string and writes from a
//! JSON object body. Every route sits behind [`auth::require_api_key`].

pub mod auth;
pub mod envelope;

use axum::{Json, Router};
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::Value;

use taiga_bridge_core::BridgeError;
use taiga_bridge_core::ops::IDEMPOTENCY_KEY_FIELD;
use taiga_bridge_core::params::Params;

use crate::AppState;
use envelope::{ActionResult, envelope};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Query pairs in order; repeated keys are kept. Rejections become envelopes.
type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

/// Body capped by the router's limit. Rejections become envelopes.
type RawBody = Result<Bytes, BytesRejection>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/list_projects", get(list_projects))
        .route("/get_project", get(get_project))
        .route("/get_project_by_slug", get(get_project_by_slug))
        .route("/list_epics", get(list_epics))
        .route("/get_epic", get(get_epic))
        .route("/list_stories", get(list_stories))
        .route("/get_story", get(get_story))
        .route("/list_tasks", get(list_tasks))
        .route("/get_task", get(get_task))
        .route("/list_issues", get(list_issues))
        .route("/get_issue", get(get_issue))
        .route("/list_milestones", get(list_milestones))
        .route("/list_users", get(list_users))
        .route("/statuses", get(list_statuses))
        .route("/create_story", post(create_story))
        .route("/update_story", post(update_story))
        .route("/delete_story", post(delete_story))
        .route("/add_story_to_epic", post(add_story_to_epic))
        .route("/create_epic", post(create_epic))
        .route("/update_epic", post(update_epic))
        .route("/delete_epic", post(delete_epic))
        .route("/create_task", post(create_task))
        .route("/update_task", post(update_task))
        .route("/delete_task", post(delete_task))
        .route("/create_issue", post(create_issue))
        .route("/update_issue", post(update_issue))
        .route("/delete_issue", post(delete_issue))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state)
}

/// `GET` handler returning a list under `$key`.
macro_rules! list_action {
    ($name:ident, $op:ident, $key:literal) => {
        async fn $name(State(state): State<AppState>, query: QueryPairs) -> ActionResult {
            let Query(query) = query?;
            let params = Params::from_query(query);
            let items = state.ops().$op(&params).await?;
            Ok(envelope($key, Value::Array(items)))
        }
    };
}

/// `GET` handler returning one record under `$key`.
macro_rules! get_action {
    ($name:ident, $op:ident, $key:literal) => {
        async fn $name(State(state): State<AppState>, query: QueryPairs) -> ActionResult {
            let Query(query) = query?;
            let params = Params::from_query(query);
            let record = state.ops().$op(&params).await?;
            Ok(envelope($key, record))
        }
    };
}

/// `POST` handler taking a JSON body and returning one record under `$key`.
macro_rules! write_action {
    ($name:ident, $op:ident, $key:literal) => {
        async fn $name(State(state): State<AppState>, body: RawBody) -> ActionResult {
            let body = body?;
            let params = Params::from_body(&body)?;
            let record = state.ops().$op(&params).await?;
            Ok(envelope($key, record))
        }
    };
}

/// Like `write_action!`, also honouring the `Idempotency-Key` header.
macro_rules! create_action {
    ($name:ident, $op:ident, $key:literal) => {
        async fn $name(
            State(state): State<AppState>,
            headers: HeaderMap,
            body: RawBody,
        ) -> ActionResult {
            let body = body?;
            let params = with_idempotency_header(Params::from_body(&body)?, &headers);
            let record = state.ops().$op(&params).await?;
            Ok(envelope($key, record))
        }
    };
}

/// `POST` handler returning `{"deleted": {"<id_field>": id}}`.
macro_rules! delete_action {
    ($name:ident, $op:ident) => {
        async fn $name(State(state): State<AppState>, body: RawBody) -> ActionResult {
            let body = body?;
            let params = Params::from_body(&body)?;
            let deleted = state.ops().$op(&params).await?;
            Ok(envelope("deleted", deleted.to_id_object()))
        }
    };
}

list_action!(list_projects, list_projects, "projects");
get_action!(get_project, get_project, "project");
get_action!(get_project_by_slug, get_project_by_slug, "project");
list_action!(list_epics, list_epics, "epics");
get_action!(get_epic, get_epic, "epic");
list_action!(list_stories, list_stories, "stories");
get_action!(get_story, get_story, "story");
get_action!(get_task, get_task, "task");
list_action!(list_issues, list_issues, "issues");
get_action!(get_issue, get_issue, "issue");
list_action!(list_milestones, list_milestones, "milestones");
list_action!(list_users, list_users, "users");
list_action!(list_statuses, list_statuses, "statuses");

create_action!(create_story, create_story, "story");
write_action!(update_story, update_story, "story");
delete_action!(delete_story, delete_story);
write_action!(add_story_to_epic, link_story_to_epic, "link");
create_action!(create_epic, create_epic, "epic");
write_action!(update_epic, update_epic, "epic");
delete_action!(delete_epic, delete_epic);
create_action!(create_task, create_task, "task");
write_action!(update_task, update_task, "task");
delete_action!(delete_task, delete_task);
create_action!(create_issue, create_issue, "issue");
write_action!(update_issue, update_issue, "issue");
delete_action!(delete_issue, delete_issue);

/// Tasks carry their pagination block next to the list.
async fn list_tasks(State(state): State<AppState>, query: QueryPairs) -> ActionResult {
    let Query(query) = query?;
    let params = Params::from_query(query);
    let listing = state.ops().list_tasks(&params).await?;
    let body = serde_json::to_value(&listing)
        .map_err(|e| BridgeError::internal(format!("task listing serialization: {e}")))?;
    Ok(Json(body))
}

/// Copy the `Idempotency-Key` header into the params unless the body
/// already names a key.
fn with_idempotency_header(mut params: Params, headers: &HeaderMap) -> Params {
    if params.contains(IDEMPOTENCY_KEY_FIELD) {
        return params;
    }
    if let Some(key) = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        params.insert(IDEMPOTENCY_KEY_FIELD, Value::String(key.to_string()));
    }
    params
}
