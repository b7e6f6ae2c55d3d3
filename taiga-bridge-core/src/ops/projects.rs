use serde_json::Value;

use super::{TaigaOps, shape, text_matches};
use crate::error::{BridgeError, BridgeResult};
use crate::model::ResourceKind;
use crate::params::Params;
use crate::upstream::Filters;

impl TaigaOps {
    /// Projects the service account is a member of.
    ///
    /// `member` defaults to the authenticated user; `search` filters by a
    /// case-insensitive substring of the project name.
    pub async fn list_projects(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let member = match params.opt_u64("member")? {
            Some(member) => member,
            None => self.api.current_user_id().await?,
        };
        let filters: Filters = vec![("member".into(), member.to_string())];
        let page = self.api.list_resources(ResourceKind::Project, &filters, None).await?;

        let search = params.opt_str("search");
        Ok(page
            .items
            .iter()
            .filter(|project| {
                search
                    .as_deref()
                    .is_none_or(|needle| text_matches(project, &["name"], needle))
            })
            .map(|project| shape(ResourceKind::Project, project))
            .collect())
    }

    /// Full project record by id.
    pub async fn get_project(&self, params: &Params) -> BridgeResult<Value> {
        let id = params.require_u64("project_id")?;
        let project = self.api.get_resource(ResourceKind::Project, id).await?;
        Ok(Value::Object(project))
    }

    /// Full project record by slug.
    pub async fn get_project_by_slug(&self, params: &Params) -> BridgeResult<Value> {
        let slug = params.require_str("slug")?;
        let project = self.api.get_project_by_slug(&slug).await?;
        Ok(Value::Object(project))
    }

    /// Project by exactly one of `project_id` or `slug`.
    pub async fn find_project(&self, params: &Params) -> BridgeResult<Value> {
        let by_id = params.opt_u64("project_id")?.is_some();
        let by_slug = params.opt_str("slug").is_some();
        match (by_id, by_slug) {
            (true, false) => self.get_project(params).await,
            (false, true) => self.get_project_by_slug(params).await,
            _ => Err(BridgeError::validation(
                "Provide either project_id or slug, but not both",
            )),
        }
    }
}
