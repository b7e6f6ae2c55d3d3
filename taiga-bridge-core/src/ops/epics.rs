use serde_json::Value;

use super::{StatusLookup, TaigaOps, UpdateRequest, put_patch, subject_patch, tags_patch};
use crate::error::{BridgeError, BridgeResult};
use crate::idempotency::OperationKind;
use crate::model::{Record, ResourceKind, ResourceRef, StatusScope, slice};
use crate::params::Params;
use crate::upstream::Filters;

impl TaigaOps {
    /// Epic summaries for one or more projects, each tagged with its project.
    pub async fn list_epics(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let project_ids = params.u64_list("project_id")?;
        if project_ids.is_empty() {
            return Err(BridgeError::validation(
                "At least one project_id is required",
            ));
        }

        let mut epics = Vec::new();
        for project_id in project_ids {
            let filters: Filters = vec![("project".into(), project_id.to_string())];
            let page = self.api.list_resources(ResourceKind::Epic, &filters, None).await?;
            epics.extend(page.items.iter().map(|epic| {
                let mut summary = slice(epic, ResourceKind::EPIC_SUMMARY_FIELDS);
                if let Value::Object(map) = &mut summary {
                    map.insert("project_id".into(), Value::from(project_id));
                }
                summary
            }));
        }
        Ok(epics)
    }

    pub async fn get_epic(&self, params: &Params) -> BridgeResult<Value> {
        self.get_one(ResourceKind::Epic, params).await
    }

    pub async fn create_epic(&self, params: &Params) -> BridgeResult<Value> {
        let project_id = params.require_u64("project_id")?;
        let mut payload = Record::new();
        payload.insert("project".into(), Value::from(project_id));
        payload.insert("subject".into(), Value::from(params.require_str("subject")?));
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_patch(&mut payload, "color", params.patch_value("color"));

        let status = params.status("status")?.map(|token| StatusLookup {
            scope: StatusScope::Epic,
            project_id,
            token,
        });
        self.create(OperationKind::CreateEpic, ResourceKind::Epic, params, payload, status)
            .await
    }

    pub async fn update_epic(&self, params: &Params) -> BridgeResult<Value> {
        let reference = ResourceRef::new(ResourceKind::Epic, params.require_u64("epic_id")?);
        let mut payload = Record::new();
        put_patch(&mut payload, "subject", subject_patch(params)?);
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_patch(&mut payload, "color", params.patch_value("color"));

        self.update(UpdateRequest {
            reference,
            payload,
            status: params.status_update("status")?,
            scope: StatusScope::Epic,
            project_hint: None,
            version: params.opt_u64("version")?,
        })
        .await
    }

    pub async fn delete_epic(&self, params: &Params) -> BridgeResult<ResourceRef> {
        self.delete(ResourceKind::Epic, params).await
    }

    /// Attach a story to an epic; returns the link record (or `null`).
    pub async fn link_story_to_epic(&self, params: &Params) -> BridgeResult<Value> {
        let epic_id = params.require_u64("epic_id")?;
        let story_id = params.require_u64("user_story_id")?;
        let link = self.api.link_story_to_epic(epic_id, story_id).await?;
        Ok(link.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{args, body, ops};
    use crate::model::ResourceKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_epics_requires_a_project() {
        let (ops, _) = ops();
        let err = ops.list_epics(&args(json!({}))).await.unwrap_err();
        assert_eq!(err.to_string(), "At least one project_id is required");
    }

    #[tokio::test]
    async fn test_list_epics_tags_each_with_project() {
        let (ops, _) = ops();
        let epics = ops
            .list_epics(&args(json!({"project_id": [3, 9]})))
            .await
            .unwrap();
        assert_eq!(
            epics,
            vec![json!({"id": 40, "ref": 1, "subject": "Onboarding", "status": 50, "project_id": 3})]
        );
    }

    #[tokio::test]
    async fn test_create_epic_resolves_status_name() {
        let (ops, fake) = ops();
        let epic = ops
            .create_epic(&body(json!({
                "project_id": 3,
                "subject": "Billing",
                "status": "new",
                "color": "#123456"
            })))
            .await
            .unwrap();
        assert_eq!(epic["status"], 50);
        assert_eq!(epic["color"], "#123456");
        let sent = fake.last_payload("create epics").unwrap();
        assert_eq!(sent.get("project"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_update_epic_sends_current_version() {
        let (ops, fake) = ops();
        let epic = ops
            .update_epic(&body(json!({"epic_id": 40, "subject": "Onboarding v2"})))
            .await
            .unwrap();
        assert_eq!(epic["subject"], "Onboarding v2");
        assert_eq!(epic["version"], 2);
        assert_eq!(fake.count("update epics 40"), 1);
    }

    #[tokio::test]
    async fn test_update_epic_needs_a_field() {
        let (ops, fake) = ops();
        let err = ops
            .update_epic(&body(json!({"epic_id": 40})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "At least one field must be provided to update");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_link_and_delete() {
        let (ops, fake) = ops();
        let link = ops
            .link_story_to_epic(&body(json!({"epic_id": 40, "user_story_id": 5})))
            .await
            .unwrap();
        assert_eq!(link["user_story"], 5);

        let deleted = ops.delete_epic(&body(json!({"epic_id": 40}))).await.unwrap();
        assert_eq!(deleted.to_id_object(), json!({"epic_id": 40}));
        assert!(fake.get(ResourceKind::Epic, 40).is_none());
    }
}
