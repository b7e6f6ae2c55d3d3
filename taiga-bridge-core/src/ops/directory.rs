//! Lookup listings used to turn names into ids: statuses, users, milestones.

use serde_json::Value;
use tracing::debug;

use super::{TaigaOps, shape, text_matches};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{Record, ResourceKind, StatusScope, slice};
use crate::params::Params;
use crate::upstream::Filters;

const USER_SEARCH_FIELDS: &[&str] = &["full_name", "username", "email"];
const MILESTONE_SEARCH_FIELDS: &[&str] = &["name", "slug"];

impl TaigaOps {
    /// A project's status set for one scope (`kind`, stories by default).
    pub async fn list_statuses(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let project_id = params.require_u64("project_id")?;
        let scope = match params.opt_str("kind") {
            None => StatusScope::Story,
            Some(kind) => StatusScope::parse(&kind).ok_or_else(|| {
                BridgeError::validation("kind must be one of story, task, epic, issue")
            })?,
        };

        let statuses = self.api.list_statuses(scope, project_id).await?;
        statuses
            .iter()
            .map(|status| {
                serde_json::to_value(status).map_err(|e| BridgeError::internal(e.to_string()))
            })
            .collect()
    }

    /// Users visible to the service account, optionally within a project.
    ///
    /// When the account may not list users, a project's membership is used
    /// instead.
    pub async fn list_users(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let project_id = params.opt_u64("project_id")?;
        let search = params.opt_str("search");

        let mut filters: Filters = Vec::new();
        if let Some(project_id) = project_id {
            filters.push(("project".into(), project_id.to_string()));
        }
        if let Some(search) = &search {
            filters.push(("search".into(), search.clone()));
        }

        let entries: Vec<Value> = match self.api.list_resources(ResourceKind::User, &filters, None).await {
            Ok(page) => page.items.into_iter().map(Value::Object).collect(),
            Err(err) => match project_id {
                Some(project_id) if err.is_denied() => {
                    debug!(project_id, "User listing denied; using project membership");
                    self.api.list_project_members(project_id).await?
                }
                _ => return Err(err.into()),
            },
        };

        Ok(entries
            .into_iter()
            .filter_map(member_user)
            .filter(|user| {
                search
                    .as_deref()
                    .is_none_or(|needle| text_matches(user, USER_SEARCH_FIELDS, needle))
            })
            .map(|user| slice(&user, ResourceKind::User.fields()))
            .collect())
    }

    /// Milestones (sprints) of a project, optionally matched by name or slug.
    pub async fn list_milestones(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let project_id = params.require_u64("project_id")?;
        let filters: Filters = vec![("project".into(), project_id.to_string())];
        let page = self
            .api
            .list_resources(ResourceKind::Milestone, &filters, None)
            .await?;

        let search = params.opt_str("search");
        Ok(page
            .items
            .iter()
            .filter(|milestone| {
                search
                    .as_deref()
                    .is_none_or(|needle| text_matches(milestone, MILESTONE_SEARCH_FIELDS, needle))
            })
            .map(|milestone| shape(ResourceKind::Milestone, milestone))
            .collect())
    }
}

/// A user record, unwrapping membership entries of the form `{"user": {...}}`.
fn member_user(entry: Value) -> Option<Record> {
    match entry {
        Value::Object(mut map) => match map.remove("user") {
            Some(Value::Object(user)) => Some(user),
            _ => Some(map),
        },
        _ => None,
    }
}
