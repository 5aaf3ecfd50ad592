use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::{EventRecord, EventsLogResult, NewRecord, ProjectEvent, ProjectEvents};

/// One physical events table behind its own connection pool.
///
/// Maintenance operations (`delete_older_than`, `delete_for_project`) are
/// best-effort: they log failures and never return them.
#[async_trait]
pub trait EventRecordStore: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// On-disk file backing this store, when there is one.
    fn local_path(&self) -> Option<PathBuf> {
        None
    }

    async fn ensure_schema(&self) -> EventsLogResult<()>;
    async fn insert(&self, record: NewRecord) -> EventsLogResult<()>;
    async fn insert_batch(&self, records: Vec<NewRecord>) -> EventsLogResult<()>;
    async fn select_range(&self, sql: &str) -> EventsLogResult<ProjectEvents>;
    async fn select_all(&self) -> EventsLogResult<Vec<EventRecord>>;
    async fn delete_older_than(&self, max_age_days: u32);
    async fn delete_for_project(&self, project: &str);
    async fn probe(&self) -> EventsLogResult<()>;
    async fn exists(&self) -> EventsLogResult<bool>;
    async fn close(&self);
}

/// Outcome of asking whether the current caller may see a project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    NotVisible,
    /// The project is gone; its events are orphans.
    NoSuchProject,
    CheckFailed(String),
}

#[async_trait]
pub trait ProjectVisibility: Send + Sync {
    async fn check(&self, project: &str) -> Visibility;
}

/// Visibility check that admits every project.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllVisible;

#[async_trait]
impl ProjectVisibility for AllVisible {
    async fn check(&self, _project: &str) -> Visibility {
        Visibility::Visible
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record one event, retrying and failing over on connectivity loss.
    async fn store_event(&self, event: &ProjectEvent) -> EventsLogResult<()>;

    /// Payloads matched by `sql` that the caller may see, in write order.
    async fn query_change_events(
        &self,
        sql: &str,
        visibility: &dyn ProjectVisibility,
    ) -> EventsLogResult<Vec<String>>;
}

pub trait QueryMaker: Send + Sync {
    fn default_query(&self) -> String;
    fn build_from_range(&self, from: Option<&str>, to: Option<&str>) -> EventsLogResult<String>;
    fn form_query(&self, params: Option<&HashMap<String, String>>) -> EventsLogResult<String>;
}
