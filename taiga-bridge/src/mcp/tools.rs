//! The MCP tool catalog.
//!
//! Every tool maps onto one [`TaigaOps`] operation; the same operations back
//! the `/actions/*` endpoints, so validation and error text are identical on
//! both surfaces.

use serde::Serialize;
use serde_json::{Map, Value, json};

use taiga_bridge_core::error::{BridgeError, BridgeResult};
use taiga_bridge_core::model::ResourceRef;
use taiga_bridge_core::ops::TaigaOps;
use taiga_bridge_core::params::Params;

/// Behaviour hints advertised with each tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    pub read_only_hint: bool,
    pub destructive_hint: bool,
    pub idempotent_hint: bool,
    pub open_world_hint: bool,
}

const READ: ToolAnnotations = ToolAnnotations {
    read_only_hint: true,
    destructive_hint: false,
    idempotent_hint: true,
    open_world_hint: true,
};

const WRITE: ToolAnnotations = ToolAnnotations {
    read_only_hint: false,
    destructive_hint: false,
    idempotent_hint: false,
    open_world_hint: true,
};

const DELETE: ToolAnnotations = ToolAnnotations {
    read_only_hint: false,
    destructive_hint: true,
    idempotent_hint: true,
    open_world_hint: true,
};

const LOCAL: ToolAnnotations = ToolAnnotations {
    read_only_hint: true,
    destructive_hint: false,
    idempotent_hint: true,
    open_world_hint: false,
};

/// One entry of `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub annotations: ToolAnnotations,
}

fn tool(
    name: &'static str,
    description: &'static str,
    annotations: ToolAnnotations,
    properties: Value,
    required: &[&str],
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
        annotations,
    }
}

// Schema fragments

fn id(description: &str) -> Value {
    json!({"type": "integer", "minimum": 1, "description": description})
}

fn nullable_id(description: &str) -> Value {
    json!({"type": ["integer", "null"], "description": description})
}

fn text(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

fn nullable_text(description: &str) -> Value {
    json!({"type": ["string", "null"], "description": description})
}

fn status() -> Value {
    json!({
        "type": ["integer", "string"],
        "description": "Status id, name or slug (names are matched case-insensitively)"
    })
}

fn tags() -> Value {
    json!({"type": ["array", "null"], "items": {"type": "string"}, "description": "Tag list; null clears"})
}

fn page() -> Value {
    json!({"type": "integer", "minimum": 1, "description": "1-based page number"})
}

fn page_size() -> Value {
    json!({"type": "integer", "minimum": 1, "description": "Items per page (clamped by the server)"})
}

fn version() -> Value {
    json!({"type": "integer", "minimum": 0, "description": "Expected version; rejected if stale"})
}

fn idempotency_key() -> Value {
    json!({"type": "string", "description": "Repeat-safe key; a reused key returns the first result"})
}

/// Build the full catalog, in `tools/list` order.
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        tool(
            "echo",
            "Echo a message back to the caller.",
            LOCAL,
            json!({"message": text("Text to echo")}),
            &["message"],
        ),
        tool(
            "taiga.projects.list",
            "List Taiga projects the service account is a member of.",
            READ,
            json!({
                "search": text("Case-insensitive substring of the project name"),
                "member": id("Member user id (defaults to the service account)"),
            }),
            &[],
        ),
        tool(
            "taiga.projects.get",
            "Get a project by id or slug (exactly one).",
            READ,
            json!({"project_id": id("Project id"), "slug": text("Project slug")}),
            &[],
        ),
        tool(
            "taiga.epics.list",
            "List epics for one or more projects.",
            READ,
            json!({
                "project_id": {
                    "type": ["integer", "array"],
                    "items": {"type": "integer"},
                    "description": "Project id or list of ids"
                }
            }),
            &["project_id"],
        ),
        tool(
            "taiga.epics.create",
            "Create an epic.",
            WRITE,
            json!({
                "project_id": id("Project id"),
                "subject": text("Epic subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "assigned_to": nullable_id("Assignee user id"),
                "tags": tags(),
                "color": text("Hex color, e.g. #A5694F"),
                "idempotency_key": idempotency_key(),
            }),
            &["project_id", "subject"],
        ),
        tool(
            "taiga.epics.update",
            "Update fields on an epic.",
            WRITE,
            json!({
                "epic_id": id("Epic id"),
                "subject": text("Epic subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "assigned_to": nullable_id("Assignee user id"),
                "tags": tags(),
                "color": text("Hex color"),
                "version": version(),
            }),
            &["epic_id"],
        ),
        tool(
            "taiga.epics.delete",
            "Delete an epic.",
            DELETE,
            json!({"epic_id": id("Epic id")}),
            &["epic_id"],
        ),
        tool(
            "taiga.epics.add_user_story",
            "Link a user story to an epic.",
            WRITE,
            json!({"epic_id": id("Epic id"), "user_story_id": id("User story id")}),
            &["epic_id", "user_story_id"],
        ),
        tool(
            "taiga.stories.list",
            "List user stories in a project.",
            READ,
            json!({
                "project_id": id("Project id"),
                "epic_id": id("Only stories in this epic"),
                "search": text("Full-text filter"),
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Required tags"},
                "page": page(),
                "page_size": page_size(),
            }),
            &["project_id"],
        ),
        tool(
            "taiga.stories.get",
            "Get a user story.",
            READ,
            json!({"story_id": id("User story id")}),
            &["story_id"],
        ),
        tool(
            "taiga.stories.create",
            "Create a user story.",
            WRITE,
            json!({
                "project_id": id("Project id"),
                "subject": text("Story subject"),
                "description": text("Description"),
                "status": status(),
                "tags": tags(),
                "assigned_to": id("Assignee user id"),
                "idempotency_key": idempotency_key(),
            }),
            &["project_id", "subject"],
        ),
        tool(
            "taiga.stories.update",
            "Update fields on a user story.",
            WRITE,
            json!({
                "user_story_id": id("User story id"),
                "project_id": id("Move to / resolve status in this project"),
                "subject": text("Story subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "tags": tags(),
                "assigned_to": nullable_id("Assignee user id"),
                "epic_id": nullable_id("Epic id"),
                "milestone_id": nullable_id("Milestone (sprint) id"),
                "custom_attributes": {"type": ["object", "null"]},
                "version": version(),
            }),
            &["user_story_id"],
        ),
        tool(
            "taiga.stories.delete",
            "Delete a user story.",
            DELETE,
            json!({"story_id": id("User story id")}),
            &["story_id"],
        ),
        tool(
            "taiga.tasks.list",
            "List tasks with optional filters and pagination metadata.",
            READ,
            json!({
                "project_id": id("Project id"),
                "user_story_id": id("User story id"),
                "assigned_to": id("Assignee user id"),
                "search": text("Full-text filter"),
                "status": status(),
                "page": page(),
                "page_size": page_size(),
            }),
            &[],
        ),
        tool(
            "taiga.tasks.get",
            "Get a task.",
            READ,
            json!({"task_id": id("Task id")}),
            &["task_id"],
        ),
        tool(
            "taiga.tasks.create",
            "Create a task in a project or user story.",
            WRITE,
            json!({
                "project_id": id("Project id (derived from the story when omitted)"),
                "user_story_id": id("User story id"),
                "subject": text("Task subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "assigned_to": nullable_id("Assignee user id"),
                "tags": tags(),
                "due_date": nullable_text("Due date, YYYY-MM-DD"),
                "idempotency_key": idempotency_key(),
            }),
            &["subject"],
        ),
        tool(
            "taiga.tasks.update",
            "Update fields on a task.",
            WRITE,
            json!({
                "task_id": id("Task id"),
                "subject": text("Task subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "assigned_to": nullable_id("Assignee user id"),
                "tags": tags(),
                "user_story_id": nullable_id("User story id"),
                "due_date": nullable_text("Due date, YYYY-MM-DD"),
                "version": version(),
            }),
            &["task_id"],
        ),
        tool(
            "taiga.tasks.delete",
            "Delete a task.",
            DELETE,
            json!({"task_id": id("Task id")}),
            &["task_id"],
        ),
        tool(
            "taiga.issues.list",
            "List issues in a project.",
            READ,
            json!({
                "project_id": id("Project id"),
                "search": text("Full-text filter"),
                "status": status(),
                "assigned_to": id("Assignee user id"),
                "page": page(),
                "page_size": page_size(),
            }),
            &["project_id"],
        ),
        tool(
            "taiga.issues.create",
            "Create an issue.",
            WRITE,
            json!({
                "project_id": id("Project id"),
                "subject": text("Issue subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "priority": id("Priority id"),
                "severity": id("Severity id"),
                "type": id("Issue type id"),
                "assigned_to": nullable_id("Assignee user id"),
                "tags": tags(),
                "idempotency_key": idempotency_key(),
            }),
            &["project_id", "subject"],
        ),
        tool(
            "taiga.issues.update",
            "Update fields on an issue.",
            WRITE,
            json!({
                "issue_id": id("Issue id"),
                "subject": text("Issue subject"),
                "description": nullable_text("Description"),
                "status": status(),
                "priority": nullable_id("Priority id"),
                "severity": nullable_id("Severity id"),
                "type": nullable_id("Issue type id"),
                "assigned_to": nullable_id("Assignee user id"),
                "tags": tags(),
                "version": version(),
            }),
            &["issue_id"],
        ),
        tool(
            "taiga.issues.delete",
            "Delete an issue.",
            DELETE,
            json!({"issue_id": id("Issue id")}),
            &["issue_id"],
        ),
        tool(
            "taiga.statuses.list",
            "List a project's statuses for stories, tasks, epics or issues.",
            READ,
            json!({
                "project_id": id("Project id"),
                "kind": {"type": "string", "enum": ["story", "task", "epic", "issue"]},
            }),
            &["project_id"],
        ),
        tool(
            "taiga.users.list",
            "List Taiga users to support id resolution.",
            READ,
            json!({
                "project_id": id("Restrict to project members"),
                "search": text("Matches full name, username or email"),
            }),
            &[],
        ),
        tool(
            "taiga.milestones.list",
            "List milestones (sprints) for a project.",
            READ,
            json!({
                "project_id": id("Project id"),
                "search": text("Matches name or slug"),
            }),
            &["project_id"],
        ),
    ]
}

fn deleted(reference: ResourceRef) -> Value {
    json!({"deleted": reference.to_id_object()})
}

fn listing<T: Serialize>(value: &T) -> BridgeResult<Value> {
    serde_json::to_value(value).map_err(|e| BridgeError::internal(e.to_string()))
}

/// Run a tool. Returns `None` for names not in the catalog.
pub async fn invoke(ops: &TaigaOps, name: &str, params: &Params) -> Option<BridgeResult<Value>> {
    let result = match name {
        "echo" => params.require_str("message").map(Value::String),
        "taiga.projects.list" => ops.list_projects(params).await.map(Value::from),
        "taiga.projects.get" => ops.find_project(params).await,
        "taiga.epics.list" => ops.list_epics(params).await.map(Value::from),
        "taiga.epics.create" => ops.create_epic(params).await,
        "taiga.epics.update" => ops.update_epic(params).await,
        "taiga.epics.delete" => ops.delete_epic(params).await.map(deleted),
        "taiga.epics.add_user_story" => ops.link_story_to_epic(params).await,
        "taiga.stories.list" => ops.list_stories(params).await.map(Value::from),
        "taiga.stories.get" => ops.get_story(params).await,
        "taiga.stories.create" => ops.create_story(params).await,
        "taiga.stories.update" => ops.update_story(params).await,
        "taiga.stories.delete" => ops.delete_story(params).await.map(deleted),
        "taiga.tasks.list" => ops.list_tasks(params).await.and_then(|tasks| listing(&tasks)),
        "taiga.tasks.get" => ops.get_task(params).await,
        "taiga.tasks.create" => ops.create_task(params).await,
        "taiga.tasks.update" => ops.update_task(params).await,
        "taiga.tasks.delete" => ops.delete_task(params).await.map(deleted),
        "taiga.issues.list" => ops.list_issues(params).await.map(Value::from),
        "taiga.issues.create" => ops.create_issue(params).await,
        "taiga.issues.update" => ops.update_issue(params).await,
        "taiga.issues.delete" => ops.delete_issue(params).await.map(deleted),
        "taiga.statuses.list" => ops.list_statuses(params).await.map(Value::from),
        "taiga.users.list" => ops.list_users(params).await.map(Value::from),
        "taiga.milestones.list" => ops.list_milestones(params).await.map(Value::from),
        _ => return None,
    };
    Some(result)
}

/// Render an operation outcome as a `tools/call` result.
///
/// Failures become `isError` results carrying the error text; objects are
/// returned as `structuredContent` directly, anything else under `result`.
pub fn tool_result(outcome: BridgeResult<Value>) -> Value {
    match outcome {
        Ok(value) => {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let structured = match value {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("result".into(), other);
                    map
                }
            };
            json!({
                "content": [{"type": "text", "text": text}],
                "structuredContent": structured,
                "isError": false,
            })
        }
        Err(error) => json!({
            "content": [{"type": "text", "text": error.to_string()}],
            "isError": true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_are_unique() {
        let tools = catalog();
        let names: HashSet<_> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), tools.len());
        assert_eq!(tools.len(), 25);
    }

    #[test]
    fn test_annotations_serialize_camel_case() {
        let tools = catalog();
        let delete = tools
            .iter()
            .find(|t| t.name == "taiga.tasks.delete")
            .unwrap();
        let json = serde_json::to_value(delete).unwrap();
        assert_eq!(json["annotations"]["destructiveHint"], true);
        assert_eq!(json["inputSchema"]["required"], json!(["task_id"]));
    }

    #[test]
    fn test_tool_result_wraps_non_objects() {
        let ok = tool_result(Ok(json!([1, 2])));
        assert_eq!(ok["structuredContent"], json!({"result": [1, 2]}));
        assert_eq!(ok["content"][0]["text"], "[1,2]");
        assert_eq!(ok["isError"], false);

        let err = tool_result(Err(BridgeError::validation("Field 'subject' is required")));
        assert_eq!(err["isError"], true);
        assert_eq!(err["content"][0]["text"], "Field 'subject' is required");
    }
}
