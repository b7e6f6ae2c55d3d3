//! In-memory Taiga for HTTP-level tests.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Value, json};

use taiga_bridge_core::model::{
    Page, PageRequest, Pagination, Record, ResourceKind, StatusRecord, StatusScope,
};
use taiga_bridge_core::upstream::{Filters, TaigaApi, UpstreamError};

#[derive(Default)]
struct Inner {
    records: HashMap<(ResourceKind, u64), Record>,
    statuses: HashMap<(StatusScope, u64), Vec<StatusRecord>>,
    creates: usize,
    updates: usize,
    next_id: u64,
    stale: bool,
}

/// Project 3 ("alpha") with story 5, task 7, epic 40 and issue 60.
///
/// Story statuses in project 3: New (10) and In Progress (42).
pub struct FakeTaiga {
    inner: Mutex<Inner>,
}

fn as_record(value: Value) -> Record {
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
        order: None,
    }
}

impl FakeTaiga {
    pub fn new() -> Self {
        let fake = Self {
            inner: Mutex::new(Inner {
                next_id: 500,
                ..Default::default()
            }),
        };
        fake.insert(
            ResourceKind::Project,
            json!({"id": 3, "name": "Alpha", "slug": "alpha", "is_private": false}),
        );
        fake.insert(
            ResourceKind::Story,
            json!({"id": 5, "ref": 8, "subject": "Signup", "project": 3, "status": 10, "version": 2}),
        );
        fake.insert(
            ResourceKind::Task,
            json!({"id": 7, "ref": 9, "subject": "Form", "project": 3, "user_story": 5, "status": 20, "version": 1}),
        );
        fake.insert(
            ResourceKind::Epic,
            json!({"id": 40, "ref": 1, "subject": "Growth", "project": 3, "status": 50, "version": 1}),
        );
        fake.insert(
            ResourceKind::Issue,
            json!({"id": 60, "ref": 2, "subject": "Timeout", "project": 3, "status": 70, "version": 1}),
        );

        {
            let mut inner = fake.inner.lock();
            inner.statuses.insert(
                (StatusScope::Story, 3),
                vec![status(10, "New", "new"), status(42, "In Progress", "in-progress")],
            );
            inner
                .statuses
                .insert((StatusScope::Task, 3), vec![status(20, "New", "new")]);
            inner
                .statuses
                .insert((StatusScope::Epic, 3), vec![status(50, "New", "new")]);
            inner
                .statuses
                .insert((StatusScope::Issue, 3), vec![status(70, "Open", "open")]);
        }
        fake
    }

    pub fn insert(&self, kind: ResourceKind, value: Value) {
        let record = as_record(value);
        let id = record.get("id").and_then(Value::as_u64).unwrap_or_default();
        self.inner.lock().records.insert((kind, id), record);
    }

    pub fn record(&self, kind: ResourceKind, id: u64) -> Option<Record> {
        self.inner.lock().records.get(&(kind, id)).cloned()
    }

    pub fn create_count(&self) -> usize {
        self.inner.lock().creates
    }

    pub fn update_count(&self) -> usize {
        self.inner.lock().updates
    }

    /// Make every update fail as if another writer bumped the version.
    pub fn reject_updates_as_stale(&self) {
        self.inner.lock().stale = true;
    }
}

#[async_trait::async_trait]
impl TaigaApi for FakeTaiga {
    async fn current_user_id(&self) -> Result<u64, UpstreamError> {
        Ok(1)
    }

    async fn get_resource(&self, kind: ResourceKind, id: u64) -> Result<Record, UpstreamError> {
        self.record(kind, id).ok_or_else(|| UpstreamError::NotFound {
            path: format!("{}/{id}", kind.endpoint()),
        })
    }

    async fn get_project_by_slug(&self, slug: &str) -> Result<Record, UpstreamError> {
        self.inner
            .lock()
            .records
            .iter()
            .find(|((kind, _), record)| {
                *kind == ResourceKind::Project
                    && record.get("slug").and_then(Value::as_str) == Some(slug)
            })
            .map(|(_, record)| record.clone())
            .ok_or_else(|| UpstreamError::NotFound {
                path: format!("projects/by_slug?slug={slug}"),
            })
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        filters: &Filters,
        page: Option<PageRequest>,
    ) -> Result<Page, UpstreamError> {
        let project = filters
            .iter()
            .find(|(name, _)| name == "project")
            .and_then(|(_, value)| value.parse::<u64>().ok());
        let mut items: Vec<Record> = self
            .inner
            .lock()
            .records
            .iter()
            .filter(|((k, _), record)| {
                *k == kind
                    && project.is_none_or(|p| {
                        record.get("project").and_then(Value::as_u64) == Some(p)
                    })
            })
            .map(|(_, record)| record.clone())
            .collect();
        items.sort_by_key(|r| r.get("id").and_then(Value::as_u64));

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

    async fn create_resource(
        &self,
        kind: ResourceKind,
        payload: &Record,
    ) -> Result<Record, UpstreamError> {
        let mut inner = self.inner.lock();
        inner.creates += 1;
        inner.next_id += 1;
        let id = inner.next_id;
        let mut created = payload.clone();
        created.insert("id".into(), json!(id));
        created.insert("ref".into(), json!(id));
        created.insert("version".into(), json!(1));
        inner.records.insert((kind, id), created.clone());
        Ok(created)
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        id: u64,
        payload: &Record,
        expected_version: Option<u64>,
    ) -> Result<Record, UpstreamError> {
        let mut inner = self.inner.lock();
        inner.updates += 1;
        let stale = inner.stale;
        let path = format!("{}/{id}", kind.endpoint());
        let record = inner
            .records
            .get_mut(&(kind, id))
            .ok_or_else(|| UpstreamError::NotFound { path: path.clone() })?;
        let current = record.get("version").and_then(Value::as_u64).unwrap_or(1);
        if stale {
            record.insert("version".into(), json!(current + 1));
            return Err(UpstreamError::Conflict { path });
        }
        if expected_version.is_some_and(|v| v != current) {
            return Err(UpstreamError::Conflict { path });
        }
        for (field, value) in payload {
            record.insert(field.clone(), value.clone());
        }
        record.insert("version".into(), json!(current + 1));
        Ok(record.clone())
    }

    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<(), UpstreamError> {
        self.inner
            .lock()
            .records
            .remove(&(kind, id))
            .map(|_| ())
            .ok_or_else(|| UpstreamError::NotFound {
                path: format!("{}/{id}", kind.endpoint()),
            })
    }

    async fn list_statuses(
        &self,
        scope: StatusScope,
        project_id: u64,
    ) -> Result<Vec<StatusRecord>, UpstreamError> {
        Ok(self
            .inner
            .lock()
            .statuses
            .get(&(scope, project_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn link_story_to_epic(
        &self,
        epic_id: u64,
        story_id: u64,
    ) -> Result<Option<Value>, UpstreamError> {
        Ok(Some(json!({"epic": epic_id, "user_story": story_id})))
    }

    async fn list_project_members(&self, _project_id: u64) -> Result<Vec<Value>, UpstreamError> {
        Ok(Vec::new())
    }
}
