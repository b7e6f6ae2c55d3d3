use serde_json::Value;

use super::{StatusLookup, TaigaOps, UpdateRequest, put_patch, shape, subject_patch, tags_patch};
use crate::error::BridgeResult;
use crate::idempotency::OperationKind;
use crate::model::{Record, ResourceKind, ResourceRef, StatusScope};
use crate::params::Params;
use crate::upstream::Filters;

/// Integer classification fields: (request key, upstream field).
const CLASSIFIERS: &[(&str, &str)] = &[
    ("priority", "priority"),
    ("severity", "severity"),
    ("type", "issue_type"),
];

fn put_classifiers(params: &Params, payload: &mut Record) -> BridgeResult<()> {
    for (key, field) in CLASSIFIERS {
        put_patch(payload, field, params.patch_u64(key)?);
    }
    Ok(())
}

impl TaigaOps {
    pub async fn list_issues(&self, params: &Params) -> BridgeResult<Vec<Value>> {
        let project_id = params.require_u64("project_id")?;
        let mut filters: Filters = vec![("project".into(), project_id.to_string())];
        if let Some(search) = params.opt_str("search") {
            filters.push(("q".into(), search));
        }
        if let Some(assignee) = params.opt_u64("assigned_to")? {
            filters.push(("assigned_to".into(), assignee.to_string()));
        }
        if let Some(token) = params.status("status")? {
            let status_id = self
                .resolver
                .resolve(StatusScope::Issue, project_id, &token)
                .await?;
            filters.push(("status".into(), status_id.to_string()));
        }

        let page = self
            .api
            .list_resources(ResourceKind::Issue, &filters, self.page_request(params)?)
            .await?;
        Ok(page
            .items
            .iter()
            .map(|issue| shape(ResourceKind::Issue, issue))
            .collect())
    }

    pub async fn get_issue(&self, params: &Params) -> BridgeResult<Value> {
        self.get_one(ResourceKind::Issue, params).await
    }

    pub async fn create_issue(&self, params: &Params) -> BridgeResult<Value> {
        let project_id = params.require_u64("project_id")?;
        let mut payload = Record::new();
        payload.insert("project".into(), Value::from(project_id));
        payload.insert("subject".into(), Value::from(params.require_str("subject")?));
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_classifiers(params, &mut payload)?;

        let status = params.status("status")?.map(|token| StatusLookup {
            scope: StatusScope::Issue,
            project_id,
            token,
        });
        self.create(OperationKind::CreateIssue, ResourceKind::Issue, params, payload, status)
            .await
    }

    pub async fn update_issue(&self, params: &Params) -> BridgeResult<Value> {
        let reference = ResourceRef::new(ResourceKind::Issue, params.require_u64("issue_id")?);
        let mut payload = Record::new();
        put_patch(&mut payload, "subject", subject_patch(params)?);
        put_patch(&mut payload, "description", params.patch_value("description"));
        put_patch(&mut payload, "assigned_to", params.patch_u64("assigned_to")?);
        put_patch(&mut payload, "tags", tags_patch(params)?);
        put_classifiers(params, &mut payload)?;

        self.update(UpdateRequest {
            reference,
            payload,
            status: params.status_update("status")?,
            scope: StatusScope::Issue,
            project_hint: None,
            version: params.opt_u64("version")?,
        })
        .await
    }

    pub async fn delete_issue(&self, params: &Params) -> BridgeResult<ResourceRef> {
        self.delete(ResourceKind::Issue, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{args, body, ops};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_issue_maps_type_to_issue_type() {
        let (ops, fake) = ops();
        let issue = ops
            .create_issue(&body(json!({
                "project_id": 3,
                "subject": "Timeout on save",
                "status": "OPEN",
                "priority": 3,
                "severity": "2",
                "type": 1
            })))
            .await
            .unwrap();
        assert_eq!(issue["status"], 70);
        assert_eq!(issue["issue_type"], 1);
        assert_eq!(issue["severity"], 2);

        let sent = fake.last_payload("create issues").unwrap();
        assert!(sent.get("type").is_none());
    }

    #[tokio::test]
    async fn test_create_issue_rejects_non_integer_priority() {
        let (ops, _) = ops();
        let err = ops
            .create_issue(&body(json!({"project_id": 3, "subject": "X", "priority": "high"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "priority must be an integer");
    }

    #[tokio::test]
    async fn test_list_issues_by_search() {
        let (ops, _) = ops();
        let issues = ops
            .list_issues(&args(json!({"project_id": 3, "search": "crash"})))
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["priority"], 2);

        let empty = ops
            .list_issues(&args(json!({"project_id": 9})))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_update_issue_with_matching_version() {
        let (ops, fake) = ops();
        let issue = ops
            .update_issue(&body(json!({"issue_id": 60, "severity": 4, "version": 3})))
            .await
            .unwrap();
        assert_eq!(issue["severity"], 4);
        assert_eq!(issue["version"], 4);
        assert_eq!(fake.count("update issues 60"), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_issue_is_not_found() {
        let (ops, _) = ops();
        let err = ops
            .delete_issue(&body(json!({"issue_id": 61})))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
