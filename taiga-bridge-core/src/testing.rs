//! In-memory Taiga used by unit tests.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::model::{Page, PageRequest, Pagination, Record, ResourceKind, StatusRecord, StatusScope};
use crate::upstream::{Filters, TaigaApi, UpstreamError};

#[derive(Default)]
struct State {
    records: BTreeMap<(ResourceKindKey, u64), Record>,
    statuses: Vec<(StatusScope, u64, StatusRecord)>,
    members: BTreeMap<u64, Vec<Value>>,
    next_id: u64,
    calls: Vec<String>,
    payloads: Vec<(String, Record)>,
    stale_writes: bool,
    deny_user_listing: bool,
}

/// `ResourceKind` ordered by its endpoint so it can key a `BTreeMap`.
type ResourceKindKey = &'static str;

fn key(kind: ResourceKind) -> ResourceKindKey {
    kind.endpoint()
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn status(id: u64, name: &str, slug: &str) -> StatusRecord {
    StatusRecord {
        id,
        name: name.to_string(),
        slug: slug.to_string(),
        is_closed: Some(false),
        order: Some(id as i64),
    }
}

pub(crate) struct FakeTaiga {
    state: Mutex<State>,
}

impl FakeTaiga {
    /// Seeded with projects 3 and 9, story 5, task 7 and their status sets.
    pub(crate) fn seeded() -> Self {
        let fake = Self {
            state: Mutex::new(State {
                next_id: 100,
                ..Default::default()
            }),
        };
        fake.put(
            ResourceKind::Project,
            json!({"id": 3, "name": "Alpha Board", "slug": "alpha", "is_private": false, "owner": 90}),
        );
        fake.put(
            ResourceKind::Project,
            json!({"id": 9, "name": "Beta Ops", "slug": "beta", "is_private": true}),
        );
        fake.put(
            ResourceKind::Story,
            json!({"id": 5, "ref": 12, "subject": "Login page", "project": 3, "status": 10, "version": 4, "tags": ["web"]}),
        );
        fake.put(
            ResourceKind::Task,
            json!({"id": 7, "ref": 13, "subject": "Wire form", "project": 3, "user_story": 5, "status": 20, "version": 2}),
        );
        fake.put(
            ResourceKind::Epic,
            json!({"id": 40, "ref": 1, "subject": "Onboarding", "project": 3, "status": 50, "version": 1, "color": "#aaa"}),
        );
        fake.put(
            ResourceKind::Issue,
            json!({"id": 60, "ref": 2, "subject": "Crash", "project": 3, "status": 70, "priority": 2, "version": 3}),
        );
        fake.put(
            ResourceKind::Milestone,
            json!({"id": 30, "name": "Sprint 4", "slug": "m4", "project": 9, "closed": false}),
        );
        fake.put(
            ResourceKind::Milestone,
            json!({"id": 31, "name": "Sprint 5", "slug": "m5", "project": 9, "closed": false}),
        );
        fake.put(
            ResourceKind::User,
            json!({"id": 90, "full_name": "Jo Black", "username": "jblack", "email": "jo@example.com", "photo": null}),
        );
        fake.put(
            ResourceKind::User,
            json!({"id": 91, "full_name": "Ana Green", "username": "agreen", "email": "ana@example.com"}),
        );

        {
            let mut state = fake.state.lock();
            for project in [3, 9] {
                state.statuses.extend([
                    (StatusScope::Story, project, status(10, "New", "new")),
                    (StatusScope::Story, project, status(11, "In Progress", "in-progress")),
                    (StatusScope::Task, project, status(20, "New", "new")),
                    (StatusScope::Task, project, status(21, "Doing", "doing")),
                    (StatusScope::Epic, project, status(50, "New", "new")),
                    (StatusScope::Issue, project, status(70, "Open", "open")),
                ]);
            }
            state.members.insert(
                9,
                vec![
                    json!({"id": 1, "user": {"id": 90, "full_name": "Jo Black", "username": "jblack", "email": "jo@example.com"}}),
                    json!({"id": 2, "user": {"id": 91, "full_name": "Ana Green", "username": "agreen", "email": "ana@example.com"}}),
                ],
            );
        }
        fake
    }

    pub(crate) fn put(&self, kind: ResourceKind, value: Value) {
        let record = record(value);
        let id = record.get("id").and_then(Value::as_u64).unwrap_or_default();
        self.state.lock().records.insert((key(kind), id), record);
    }

    pub(crate) fn add_status(&self, scope: StatusScope, project_id: u64, id: u64, name: &str, slug: &str) {
        self.state
            .lock()
            .statuses
            .push((scope, project_id, status(id, name, slug)));
    }

    pub(crate) fn get(&self, kind: ResourceKind, id: u64) -> Option<Record> {
        self.state.lock().records.get(&(key(kind), id)).cloned()
    }

    /// Upstream calls so far, e.g. `"create userstories"`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Last payload sent with a create or update call matching `prefix`.
    pub(crate) fn last_payload(&self, prefix: &str) -> Option<Record> {
        self.state
            .lock()
            .payloads
            .iter()
            .rev()
            .find(|(call, _)| call.starts_with(prefix))
            .map(|(_, payload)| payload.clone())
    }

    /// Every update is rejected as stale, as if another writer got there first.
    pub(crate) fn reject_writes_as_stale(&self) {
        self.state.lock().stale_writes = true;
    }

    pub(crate) fn deny_user_listing(&self) {
        self.state.lock().deny_user_listing = true;
    }

    fn log(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

fn matches_filters(record: &Record, filters: &Filters) -> bool {
    filters.iter().all(|(name, value)| {
        let field = match name.as_str() {
            "q" => {
                let subject = record.get("subject").and_then(Value::as_str).unwrap_or_default();
                return subject.to_lowercase().contains(&value.to_lowercase());
            }
            "tags" => {
                return record
                    .get("tags")
                    .and_then(Value::as_array)
                    .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(value.as_str())));
            }
            "member" | "search" => return true,
            other => other,
        };
        match record.get(field) {
            Some(Value::Number(n)) => n.to_string() == *value,
            Some(Value::String(s)) => s == value,
            _ => false,
        }
    })
}

#[async_trait::async_trait]
impl TaigaApi for FakeTaiga {
    async fn current_user_id(&self) -> Result<u64, UpstreamError> {
        self.log("me".into());
        Ok(90)
    }

    async fn get_resource(&self, kind: ResourceKind, id: u64) -> Result<Record, UpstreamError> {
        self.log(format!("get {} {id}", kind.endpoint()));
        self.get(kind, id).ok_or_else(|| UpstreamError::NotFound {
            path: format!("{}/{id}", kind.endpoint()),
        })
    }

    async fn get_project_by_slug(&self, slug: &str) -> Result<Record, UpstreamError> {
        self.log(format!("get projects/by_slug {slug}"));
        let state = self.state.lock();
        state
            .records
            .iter()
            .find(|((kind, _), record)| {
                *kind == key(ResourceKind::Project)
                    && record.get("slug").and_then(Value::as_str) == Some(slug)
            })
            .map(|(_, record)| record.clone())
            .ok_or_else(|| UpstreamError::NotFound {
                path: "projects/by_slug".into(),
            })
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        filters: &Filters,
        page: Option<PageRequest>,
    ) -> Result<Page, UpstreamError> {
        self.log(format!("list {}", kind.endpoint()));
        let state = self.state.lock();
        if kind == ResourceKind::User && state.deny_user_listing {
            return Err(UpstreamError::Denied { status: 403 });
        }
        let items: Vec<Record> = state
            .records
            .iter()
            .filter(|((k, _), record)| {
                *k == key(kind) && (kind == ResourceKind::User || matches_filters(record, filters))
            })
            .map(|(_, record)| record.clone())
            .collect();

        let Some(request) = page else {
            return Ok(Page {
                items,
                pagination: Pagination::default(),
            });
        };
        let total = items.len() as u64;
        let size = u64::from(request.page_size);
        let start = (u64::from(request.page) - 1) * size;
        if start >= total && request.page > 1 {
            return Ok(Page {
                items: Vec::new(),
                pagination: Pagination::past_end(request),
            });
        }
        Ok(Page {
            items: items
                .into_iter()
                .skip(start as usize)
                .take(size as usize)
                .collect(),
            pagination: Pagination {
                page: Some(u64::from(request.page)),
                page_size: Some(size),
                total: Some(total),
                total_pages: Some(total.div_ceil(size)),
            },
        })
    }

    async fn create_resource(&self, kind: ResourceKind, payload: &Record) -> Result<Record, UpstreamError> {
        let call = format!("create {}", kind.endpoint());
        let mut state = self.state.lock();
        state.calls.push(call.clone());
        state.payloads.push((call, payload.clone()));
        state.next_id += 1;
        let id = state.next_id;

        let mut created = payload.clone();
        created.insert("id".into(), json!(id));
        created.insert("ref".into(), json!(id + 1000));
        created.insert("version".into(), json!(1));
        created.insert("created_date".into(), json!("2025-11-01T10:00:00Z"));
        state.records.insert((key(kind), id), created.clone());
        Ok(created)
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        id: u64,
        payload: &Record,
        expected_version: Option<u64>,
    ) -> Result<Record, UpstreamError> {
        let call = format!("update {} {id}", kind.endpoint());
        let mut state = self.state.lock();
        state.calls.push(call.clone());
        state.payloads.push((call, payload.clone()));
        let path = format!("{}/{id}", kind.endpoint());
        let stale = state.stale_writes;
        let existing = state
            .records
            .get_mut(&(key(kind), id))
            .ok_or_else(|| UpstreamError::NotFound { path: path.clone() })?;

        let current = existing.get("version").and_then(Value::as_u64);
        if stale || (expected_version.is_some() && expected_version != current) {
            if stale {
                existing.insert("version".into(), json!(current.unwrap_or_default() + 1));
            }
            return Err(UpstreamError::Conflict { path });
        }
        for (field, value) in payload {
            existing.insert(field.clone(), value.clone());
        }
        existing.insert("version".into(), json!(current.unwrap_or_default() + 1));
        Ok(existing.clone())
    }

    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<(), UpstreamError> {
        self.log(format!("delete {} {id}", kind.endpoint()));
        self.state
            .lock()
            .records
            .remove(&(key(kind), id))
            .map(|_| ())
            .ok_or_else(|| UpstreamError::NotFound {
                path: format!("{}/{id}", kind.endpoint()),
            })
    }

    async fn list_statuses(&self, scope: StatusScope, project_id: u64) -> Result<Vec<StatusRecord>, UpstreamError> {
        self.log(format!("statuses {scope} {project_id}"));
        Ok(self
            .state
            .lock()
            .statuses
            .iter()
            .filter(|(s, p, _)| *s == scope && *p == project_id)
            .map(|(_, _, status)| status.clone())
            .collect())
    }

    async fn link_story_to_epic(&self, epic_id: u64, story_id: u64) -> Result<Option<Value>, UpstreamError> {
        self.log(format!("link {epic_id} {story_id}"));
        if self.get(ResourceKind::Epic, epic_id).is_none() {
            return Err(UpstreamError::NotFound {
                path: format!("epics/{epic_id}/related_userstories"),
            });
        }
        Ok(Some(json!({"epic": epic_id, "user_story": story_id, "order": 1})))
    }

    async fn list_project_members(&self, project_id: u64) -> Result<Vec<Value>, UpstreamError> {
        self.log(format!("members {project_id}"));
        Ok(self
            .state
            .lock()
            .members
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }
}
