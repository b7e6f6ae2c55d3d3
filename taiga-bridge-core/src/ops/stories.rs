use serde_json::Value;

use super::{StatusLookup, TaigaOps, UpdateRequest, put_patch, shape, subject_patch, tags_patch};
use crate::error::BridgeResult;
use crate::idempotency::OperationKind;
use crate::model::{Record, ResourceKind, ResourceRef, StatusScope};
use crate::params::Params;
use crate::upstream::Filters;

impl TaigaOps {
    /// Stories in a project, optionally narrowed by epic, text and tags.
    pub async fn list_stories(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let project_id = params.require_u64("project_id")?;
        let mut filters: Filters = vec![("project".into(), project_id.to_string())];
        if let Some(key) = params.first_of(&["epic_id", "epic"])
            && let Some(epic) = params.opt_u64(key)?
        {
            filters.push(("epic".into(), epic.to_string()));
        }
        if let Some(key) = params.first_of(&["search", "q"])
            && let Some(text) = params.opt_str(key)
        {
            filters.push(("q".into(), text));
        }
        for tag in params.str_list(&["tag", "tags"]) {
            filters.push(("tags".into(), tag));
        }

        let page = self
            .api
            .list_resources(ResourceKind::Story, &filters, self.page_request(params)?)
            .await?;
        Ok(page
            .items
            .iter()
            .map(|story| shape(ResourceKind::Story, story))
            .collect())
    }

    pub async fn get_story(&self, params: &Params) -> BridgeResult<Value> {
        self.get_one(ResourceKind::Story, params).await
    }

    pub async fn create_story(&self, params: &Params) -> BridgeResult<Value> {
        let project_id = params.require_u64("project_id")?;
        let mut payload = Record::new();
        payload.insert("project".into(), Value::from(project_id));
        payload.insert("subject".into(), Value::from(params.require_str("subject")?));
        if let Some(description) = params.opt_str("description") {
            payload.insert("description".into(), Value::from(description));
        }
        put_patch(&mut payload, "tags", tags_patch(params)?);
        if let Some(assignee) = params.opt_u64("assigned_to")? {
            payload.insert("assigned_to".into(), Value::from(assignee));
        }

        let status = params.status("status")?.map(|token| StatusLookup {
            scope: StatusScope::Story,
            project_id,
            token,
        });
        self.create(OperationKind::CreateStory, ResourceKind::Story, params, payload, status)
            .await
    }

    /// Partial update; `user_story_id` is accepted in place of `story_id`.
    pub async fn update_story(&self, params: &Params) -> BridgeResult<Value> {
        let id_key = params
            .first_of(&["story_id", "user_story_id"])
            .unwrap_or("story_id");
        let reference = ResourceRef::new(ResourceKind::Story, params.require_u64(id_key)?);

        let project_hint = params.opt_u64("project_id")?;
        let mut payload = Record::new();
        if let Some(project_id) = project_hint {
            payload.insert("project".into(), Value::from(project_id));
        }
        put_patch(&mut payload, "subject", subject_patch(params)?);
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "epic", params.patch_u64("epic_id")?);
        put_patch(&mut payload, "milestone", params.patch_u64("milestone_id")?);
        put_patch(&mut payload, "custom_attributes", params.patch_value("custom_attributes"));

        self.update(UpdateRequest {
            reference,
            payload,
            status: params.status_update("status")?,
            scope: StatusScope::Story,
            project_hint,
            version: params.opt_u64("version")?,
        })
        .await
    }

    pub async fn delete_story(&self, params: &Params) -> BridgeResult<ResourceRef> {
        self.delete(ResourceKind::Story, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{args, body, ops};
    use crate::error::BridgeError;
    use crate::model::{ResourceKind, StatusScope};
    use crate::params::Params;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> Params {
        Params::from_query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_create_story_resolves_status_name() {
        let (ops, fake) = ops();
        let story = ops
            .create_story(&body(json!({
                "project_id": 3,
                "subject": "Signup flow",
                "status": "in progress",
                "tags": ["web", "auth"]
            })))
            .await
            .unwrap();

        assert_eq!(story["status"], 11);
        assert_eq!(story["subject"], "Signup flow");
        let sent = fake.last_payload("create userstories").unwrap();
        assert_eq!(sent.get("status"), Some(&json!(11)));
        assert_eq!(sent.get("tags"), Some(&json!(["web", "auth"])));
        assert!(sent.get("assigned_to").is_none());
    }

    #[tokio::test]
    async fn test_create_story_numeric_status_skips_lookup() {
        let (ops, fake) = ops();
        ops.create_story(&body(json!({"project_id": 3, "subject": "X", "status": "11"})))
            .await
            .unwrap();
        assert_eq!(fake.count("statuses"), 0);
    }

    #[tokio::test]
    async fn test_create_story_ambiguous_status_is_not_created() {
        let (ops, fake) = ops();
        fake.add_status(StatusScope::Story, 3, 12, "In progress", "in-progress-2");

        let err = ops
            .create_story(&body(json!({"project_id": 3, "subject": "X", "status": "In Progress"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::AmbiguousReference { ref candidates, .. } if candidates == &[11, 12]
        ));
        assert_eq!(err.status_code(), 409);
        assert_eq!(fake.count("create"), 0);
    }

    #[tokio::test]
    async fn test_create_story_unknown_status() {
        let (ops, _) = ops();
        let err = ops
            .create_story(&body(json!({"project_id": 3, "subject": "X", "status": "Blocked"})))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "Story status 'Blocked' not found for project 3");
    }

    #[tokio::test]
    async fn test_create_story_replays_idempotency_key() {
        let (ops, fake) = ops();
        let request = body(json!({"project_id": 3, "subject": "Once", "idempotency_key": "abc"}));
        let first = ops.create_story(&request).await.unwrap();
        let replay = ops
            .create_story(&body(json!({"project_id": 3, "subject": "Different", "idempotency_key": "abc"})))
            .await
            .unwrap();

        assert_eq!(first, replay);
        assert_eq!(fake.count("create userstories"), 1);
    }

    #[tokio::test]
    async fn test_create_story_requires_subject() {
        let (ops, _) = ops();
        let err = ops
            .create_story(&body(json!({"project_id": 3})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Field 'subject' is required");
    }

    #[tokio::test]
    async fn test_list_stories_filters_and_pages() {
        let (ops, fake) = ops();
        let stories = ops
            .list_stories(&query(&[("project_id", "3"), ("q", "login"), ("tag", "web")]))
            .await
            .unwrap();
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0]["id"], 5);

        let past_end = ops
            .list_stories(&query(&[("project_id", "3"), ("page", "50"), ("page_size", "20")]))
            .await
            .unwrap();
        assert!(past_end.is_empty());
        assert_eq!(fake.count("list userstories"), 2);
    }

    #[tokio::test]
    async fn test_list_stories_requires_project() {
        let (ops, _) = ops();
        let err = ops.list_stories(&query(&[])).await.unwrap_err();
        assert_eq!(err.to_string(), "project_id is required");
    }

    #[tokio::test]
    async fn test_update_story_accepts_user_story_id() {
        let (ops, fake) = ops();
        let story = ops
            .update_story(&body(json!({
                "user_story_id": 5,
                "status": "In Progress",
                "milestone_id": 30,
                "assigned_to": null
            })))
            .await
            .unwrap();
        assert_eq!(story["status"], 11);
        assert_eq!(story["milestone"], 30);
        assert_eq!(story["version"], 5);

        let sent = fake.last_payload("update userstories 5").unwrap();
        assert_eq!(sent.get("assigned_to"), Some(&json!(null)));
        assert!(sent.get("project").is_none());
    }

    #[tokio::test]
    async fn test_update_story_supplied_version_mismatch() {
        let (ops, fake) = ops();
        let err = ops
            .update_story(&body(json!({"story_id": 5, "subject": "Y", "version": 3})))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Conflict updating story 5: supplied version 3 does not match current version 4"
        );
        assert_eq!(fake.count("update"), 0);
    }

    #[tokio::test]
    async fn test_update_story_stale_write_reports_latest_version() {
        let (ops, fake) = ops();
        fake.reject_writes_as_stale();
        let err = ops
            .update_story(&body(json!({"story_id": 5, "subject": "Y"})))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.to_string(), "Conflict updating story 5: latest version is 5");
        assert_eq!(fake.count("update userstories 5"), 1);
    }

    #[tokio::test]
    async fn test_update_story_rejects_null_status() {
        let (ops, fake) = ops();
        let err = ops
            .update_story(&body(json!({"story_id": 5, "status": null})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "status cannot be null");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_story() {
        let (ops, fake) = ops();
        let deleted = ops.delete_story(&body(json!({"story_id": 5}))).await.unwrap();
        assert_eq!(deleted.to_id_object(), json!({"story_id": 5}));
        assert!(fake.get(ResourceKind::Story, 5).is_none());

        let err = ops.get_story(&args(json!({"story_id": 5}))).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
