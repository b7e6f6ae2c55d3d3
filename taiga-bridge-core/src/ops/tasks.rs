use serde::Serialize;
use serde_json::Value;

use super::{StatusLookup, TaigaOps, UpdateRequest, put_patch, shape, subject_patch, tags_patch};
use crate::error::{BridgeError, BridgeResult};
use crate::idempotency::OperationKind;
use crate::model::{Pagination, Record, ResourceKind, ResourceRef, StatusScope};
use crate::params::Params;
use crate::resolution::StatusToken;
use crate::upstream::Filters;

/// A page of tasks together with the upstream paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskListing {
    pub tasks: Vec<Value>,
    pub pagination: Pagination,
}

impl TaigaOps {
    /// Tasks matching every supplied filter.
    ///
    /// A text `status` is resolved in `project_id`'s task statuses, so it
    /// needs a project; numeric statuses are passed through.
    pub async fn list_tasks(&self, params: &Params) -> BridgeResult<TaskListing> {
        let project_id = params.opt_u64("project_id")?;
        let mut filters: Filters = Vec::new();
        if let Some(project_id) = project_id {
            filters.push(("project".into(), project_id.to_string()));
        }
        if let Some(story) = params.opt_u64("user_story_id")? {
            filters.push(("user_story".into(), story.to_string()));
        }
        if let Some(assignee) = params.opt_u64("assigned_to")? {
            filters.push(("assigned_to".into(), assignee.to_string()));
        }
        if let Some(search) = params.opt_str("search") {
            filters.push(("q".into(), search));
        }
        if let Some(token) = params.status("status")? {
            let status_id = match (&token, project_id) {
                (StatusToken::Numeric(id), _) => *id,
                (StatusToken::Text(_), Some(project_id)) => {
                    self.resolver
                        .resolve(StatusScope::Task, project_id, &token)
                        .await?
                }
                (StatusToken::Text(_), None) => {
                    return Err(BridgeError::validation(
                        "project_id is required when filtering by status name",
                    ));
                }
            };
            filters.push(("status".into(), status_id.to_string()));
        }

        let page = self
            .api
            .list_resources(ResourceKind::Task, &filters, self.page_request(params)?)
            .await?;
        Ok(TaskListing {
            tasks: page
                .items
                .iter()
                .map(|task| shape(ResourceKind::Task, task))
                .collect(),
            pagination: page.pagination,
        })
    }

    pub async fn get_task(&self, params: &Params) -> BridgeResult<Value> {
        self.get_one(ResourceKind::Task, params).await
    }

    /// Create a task in a project, a story, or both.
    ///
    /// With only `user_story_id` the project is taken from the story.
    pub async fn create_task(&self, params: &Params) -> BridgeResult<Value> {
        let subject = params.require_str("subject")?;
        let story_id = params.opt_u64("user_story_id")?;
        let project_id = match (params.opt_u64("project_id")?, story_id) {
            (Some(project_id), _) => project_id,
            (None, Some(story_id)) => self.story_project(story_id).await?,
            (None, None) => {
                return Err(BridgeError::validation(
                    "Field 'project_id' or 'user_story_id' is required",
                ));
            }
        };

        let mut payload = Record::new();
        payload.insert("project".into(), Value::from(project_id));
        payload.insert("subject".into(), Value::from(subject));
        if let Some(story_id) = story_id {
            payload.insert("user_story".into(), Value::from(story_id));
        }
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_patch(&mut payload, "due_date", params.date("due_date")?);

        let status = params.status("status")?.map(|token| StatusLookup {
            scope: StatusScope::Task,
            project_id,
            token,
        });
        self.create(OperationKind::CreateTask, ResourceKind::Task, params, payload, status)
            .await
    }

    pub async fn update_task(&self, params: &Params) -> BridgeResult<Value> {
        let reference = ResourceRef::new(ResourceKind::Task, params.require_u64("task_id")?);
        let mut payload = Record::new();
        put_patch(&mut payload, "subject", subject_patch(params)?);
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_patch(&mut payload, "user_story", params.patch_u64("user_story_id")?);
        put_patch(&mut payload, "due_date", params.date("due_date")?);

        self.update(UpdateRequest {
            reference,
            payload,
            status: params.status_update("status")?,
            scope: StatusScope::Task,
            project_hint: None,
            version: params.opt_u64("version")?,
        })
        .await
    }

    pub async fn delete_task(&self, params: &Params) -> BridgeResult<ResourceRef> {
        self.delete(ResourceKind::Task, params).await
    }

    async fn story_project(&self, story_id: u64) -> BridgeResult<u64> {
        let story = self.api.get_resource(ResourceKind::Story, story_id).await?;
        story
            .get("project")
            .and_then(Value::as_u64)
            .ok_or_else(|| BridgeError::upstream("Unable to resolve project for task creation"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{args, body, ops};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_task_derives_project_from_story() {
        let (ops, fake) = ops();
        let task = ops
            .create_task(&body(json!({
                "user_story_id": 5,
                "subject": "Add captcha",
                "status": "doing",
                "due_date": "2025-12-01"
            })))
            .await
            .unwrap();

        assert_eq!(task["project"], 3);
        assert_eq!(task["user_story"], 5);
        assert_eq!(task["status"], 21);
        assert_eq!(task["due_date"], "2025-12-01");
        assert_eq!(fake.count("get userstories 5"), 1);
    }

    #[tokio::test]
    async fn test_create_task_with_project_skips_story_lookup() {
        let (ops, fake) = ops();
        ops.create_task(&body(json!({"project_id": 9, "subject": "Standalone"})))
            .await
            .unwrap();
        assert_eq!(fake.count("get"), 0);
        let sent = fake.last_payload("create tasks").unwrap();
        assert!(sent.get("user_story").is_none());
    }

    #[tokio::test]
    async fn test_create_task_needs_a_parent() {
        let (ops, _) = ops();
        let err = ops
            .create_task(&body(json!({"subject": "Orphan"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Field 'project_id' or 'user_story_id' is required");
    }

    #[tokio::test]
    async fn test_create_task_rejects_bad_due_date() {
        let (ops, fake) = ops();
        let err = ops
            .create_task(&body(json!({"project_id": 3, "subject": "X", "due_date": "12/01/2025"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "due_date must be in YYYY-MM-DD format");
        assert_eq!(fake.count("create"), 0);
    }

    #[tokio::test]
    async fn test_list_tasks_resolves_status_name_in_project() {
        let (ops, fake) = ops();
        let listing = ops
            .list_tasks(&args(json!({"project_id": 3, "status": "new"})))
            .await
            .unwrap();
        assert_eq!(listing.tasks.len(), 1);
        assert_eq!(listing.tasks[0]["id"], 7);
        assert_eq!(fake.count("statuses task 3"), 1);

        let none = ops
            .list_tasks(&args(json!({"project_id": 3, "status": 21})))
            .await
            .unwrap();
        assert!(none.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_list_tasks_text_status_requires_project() {
        let (ops, fake) = ops();
        let err = ops
            .list_tasks(&args(json!({"status": "doing"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "project_id is required when filtering by status name");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_tasks_reports_pagination() {
        let (ops, _) = ops();
        let listing = ops
            .list_tasks(&args(json!({"user_story_id": 5, "page": 1, "page_size": 500})))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&listing.pagination).unwrap(),
            json!({"page": 1, "page_size": 100, "total": 1, "total_pages": 1})
        );
    }

    #[tokio::test]
    async fn test_update_task_moves_to_story_and_clears_due_date() {
        let (ops, fake) = ops();
        let task = ops
            .update_task(&body(json!({"task_id": 7, "user_story_id": 6, "due_date": null, "version": 2})))
            .await
            .unwrap();
        assert_eq!(task["user_story"], 6);
        assert_eq!(task["version"], 3);
        let sent = fake.last_payload("update tasks 7").unwrap();
        assert_eq!(sent.get("due_date"), Some(&json!(null)));
    }

    #[tokio::test]
    async fn test_update_task_resolves_status_in_record_project() {
        let (ops, fake) = ops();
        let task = ops
            .update_task(&body(json!({"task_id": 7, "status": "Doing"})))
            .await
            .unwrap();
        assert_eq!(task["status"], 21);
        assert_eq!(fake.count("statuses task 3"), 1);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (ops, _) = ops();
        let deleted = ops.delete_task(&body(json!({"task_id": 7}))).await.unwrap();
        assert_eq!(deleted.to_id_object(), json!({"task_id": 7}));
    }
}
