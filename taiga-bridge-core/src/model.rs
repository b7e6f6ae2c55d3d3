//! Resource kinds, references and pagination types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A Taiga record as returned by the upstream API.
pub type Record = Map<String, Value>;

/// The fixed set of resource kinds the bridge exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Epic,
    Story,
    Task,
    Issue,
    Milestone,
    User,
}

impl ResourceKind {
    /// Envelope key for a single record.
    pub fn singular(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Epic => "epic",
            Self::Story => "story",
            Self::Task => "task",
            Self::Issue => "issue",
            Self::Milestone => "milestone",
            Self::User => "user",
        }
    }

    /// Envelope key for a list.
    pub fn plural(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Epic => "epics",
            Self::Story => "stories",
            Self::Task => "tasks",
            Self::Issue => "issues",
            Self::Milestone => "milestones",
            Self::User => "users",
        }
    }

    /// Field carrying the id in requests and in `deleted` envelopes.
    pub fn id_field(self) -> &'static str {
        match self {
            Self::Project => "project_id",
            Self::Epic => "epic_id",
            Self::Story => "story_id",
            Self::Task => "task_id",
            Self::Issue => "issue_id",
            Self::Milestone => "milestone_id",
            Self::User => "user_id",
        }
    }

    /// Upstream collection path.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Epic => "epics",
            Self::Story => "userstories",
            Self::Task => "tasks",
            Self::Issue => "issues",
            Self::Milestone => "milestones",
            Self::User => "users",
        }
    }

    /// Whether records of this kind carry a version stamp.
    pub fn is_versioned(self) -> bool {
        matches!(self, Self::Epic | Self::Story | Self::Task | Self::Issue)
    }

    /// Fields kept when a record is returned to callers.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Project => &["id", "name", "slug", "description", "is_private"],
            Self::Epic => &[
                "id",
                "ref",
                "subject",
                "project",
                "status",
                "description",
                "assigned_to",
                "tags",
                "color",
                "created_date",
                "modified_date",
                "version",
            ],
            Self::Story => &[
                "id",
                "ref",
                "subject",
                "description",
                "project",
                "epic",
                "epics",
                "milestone",
                "tags",
                "status",
                "status_extra_info",
                "assigned_to",
                "created_date",
                "modified_date",
                "version",
            ],
            Self::Task => &[
                "id",
                "ref",
                "subject",
                "project",
                "user_story",
                "status",
                "description",
                "assigned_to",
                "tags",
                "due_date",
                "created_date",
                "modified_date",
                "version",
            ],
            Self::Issue => &[
                "id",
                "ref",
                "subject",
                "project",
                "status",
                "priority",
                "severity",
                "issue_type",
                "description",
                "assigned_to",
                "tags",
                "created_date",
                "modified_date",
                "version",
            ],
            Self::Milestone => &[
                "id",
                "name",
                "slug",
                "estimated_start",
                "estimated_finish",
                "closed",
                "project",
            ],
            Self::User => &["id", "full_name", "username", "email"],
        }
    }

    /// Fields kept for epics in list responses.
    pub const EPIC_SUMMARY_FIELDS: &'static [&'static str] =
        &["id", "ref", "subject", "created_date", "modified_date", "status"];
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.singular())
    }
}

/// Which status set a status token is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusScope {
    Story,
    Task,
    Epic,
    Issue,
}

impl StatusScope {
    /// Upstream path listing the statuses of this scope.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Story => "userstory-statuses",
            Self::Task => "task-statuses",
            Self::Epic => "epic-statuses",
            Self::Issue => "issue-statuses",
        }
    }

    /// Parse the `kind` parameter of the statuses listing.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "story" | "stories" | "userstory" | "user_story" => Some(Self::Story),
            "task" | "tasks" => Some(Self::Task),
            "epic" | "epics" => Some(Self::Epic),
            "issue" | "issues" => Some(Self::Issue),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatusScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Story => "story",
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Issue => "issue",
        };
        f.write_str(name)
    }
}

/// One entry of a project's status set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_closed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

/// A typed reference to one upstream record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Project { id: u64, slug: Option<String> },
    Epic { id: u64 },
    Story { id: u64 },
    Task { id: u64 },
    Issue { id: u64 },
    Milestone { id: u64 },
    User { id: u64 },
}

impl ResourceRef {
    /// Build a reference for `kind` with the given id.
    pub fn new(kind: ResourceKind, id: u64) -> Self {
        match kind {
            ResourceKind::Project => Self::Project { id, slug: None },
            ResourceKind::Epic => Self::Epic { id },
            ResourceKind::Story => Self::Story { id },
            ResourceKind::Task => Self::Task { id },
            ResourceKind::Issue => Self::Issue { id },
            ResourceKind::Milestone => Self::Milestone { id },
            ResourceKind::User => Self::User { id },
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Project { .. } => ResourceKind::Project,
            Self::Epic { .. } => ResourceKind::Epic,
            Self::Story { .. } => ResourceKind::Story,
            Self::Task { .. } => ResourceKind::Task,
            Self::Issue { .. } => ResourceKind::Issue,
            Self::Milestone { .. } => ResourceKind::Milestone,
            Self::User { .. } => ResourceKind::User,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Project { id, .. }
            | Self::Epic { id }
            | Self::Story { id }
            | Self::Task { id }
            | Self::Issue { id }
            | Self::Milestone { id }
            | Self::User { id } => *id,
        }
    }

    /// Upstream path of the record, e.g. `userstories/5`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.kind().endpoint(), self.id())
    }

    /// The `{"<id_field>": id}` object used by delete envelopes.
    pub fn to_id_object(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.kind().id_field().to_string(), Value::from(self.id()));
        Value::Object(map)
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// Keep only `keys` from `record`, in the order listed.
pub fn slice(record: &Record, keys: &[&str]) -> Value {
    let mut out = Map::new();
    for key in keys {
        if let Some(value) = record.get(*key) {
            out.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(out)
}

/// A validated page request (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

/// Pagination metadata reported by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

impl Pagination {
    /// Metadata for a page past the end of the collection.
    pub fn past_end(request: PageRequest) -> Self {
        Self {
            page: Some(u64::from(request.page)),
            page_size: Some(u64::from(request.page_size)),
            total: None,
            total_pages: None,
        }
    }
}

/// One page of upstream records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Record>,
    pub pagination: Pagination,
}
