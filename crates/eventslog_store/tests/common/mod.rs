#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eventslog_store::{
    Dialect, EventRecord, EventRecordStore, EventsLogError, EventsLogResult, NewRecord,
    ProjectEvent, ProjectEvents, ProjectVisibility, SqlClient, StoreSettings, Visibility,
};

/// Real SQLite store that can be switched into failing with connectivity
/// errors, counting the inserts it receives.
pub struct SwitchableStore {
    inner: SqlClient,
    down: AtomicBool,
    broken: AtomicBool,
    inserts: AtomicUsize,
}

impl SwitchableStore {
    pub async fn open(path: &Path) -> EventsLogResult<Arc<Self>> {
        let inner = SqlClient::connect_sqlite(path, None, None).await?;
        Ok(Arc::new(Self {
            inner,
            down: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
        }))
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail inserts with a non-connectivity error.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn reset_inserts(&self) {
        self.inserts.store(0, Ordering::SeqCst);
    }

    pub async fn payloads(&self) -> EventsLogResult<Vec<String>> {
        if !self.inner.exists().await? {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .select_all()
            .await?
            .into_iter()
            .map(|record| record.payload)
            .collect())
    }

    fn check(&self) -> EventsLogResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(EventsLogError::connectivity(
                "error communicating with database: Connection refused",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventRecordStore for SwitchableStore {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn local_path(&self) -> Option<PathBuf> {
        self.inner.local_path()
    }

    async fn ensure_schema(&self) -> EventsLogResult<()> {
        self.check()?;
        self.inner.ensure_schema().await
    }

    async fn insert(&self, record: NewRecord) -> EventsLogResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.broken.load(Ordering::SeqCst) {
            return Err(EventsLogError::storage("NOT NULL constraint failed"));
        }
        self.inner.insert(record).await
    }

    async fn insert_batch(&self, records: Vec<NewRecord>) -> EventsLogResult<()> {
        self.check()?;
        self.inner.insert_batch(records).await
    }

    async fn select_range(&self, sql: &str) -> EventsLogResult<ProjectEvents> {
        self.check()?;
        self.inner.select_range(sql).await
    }

    async fn select_all(&self) -> EventsLogResult<Vec<EventRecord>> {
        self.check()?;
        self.inner.select_all().await
    }

    async fn delete_older_than(&self, max_age_days: u32) {
        if self.check().is_ok() {
            self.inner.delete_older_than(max_age_days).await;
        }
    }

    async fn delete_for_project(&self, project: &str) {
        if self.check().is_ok() {
            self.inner.delete_for_project(project).await;
        }
    }

    async fn probe(&self) -> EventsLogResult<()> {
        self.check()?;
        self.inner.probe().await
    }

    async fn exists(&self) -> EventsLogResult<bool> {
        self.check()?;
        self.inner.exists().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// Visibility answers keyed by project name; unknown projects are visible.
#[derive(Default)]
pub struct FixedVisibility {
    answers: Vec<(String, Visibility)>,
}

impl FixedVisibility {
    pub fn with(mut self, project: &str, answer: Visibility) -> Self {
        self.answers.push((project.to_string(), answer));
        self
    }
}

#[async_trait]
impl ProjectVisibility for FixedVisibility {
    async fn check(&self, project: &str) -> Visibility {
        self.answers
            .iter()
            .find(|(name, _)| name == project)
            .map(|(_, answer)| answer.clone())
            .unwrap_or(Visibility::Visible)
    }
}

pub fn fast_settings(max_tries: u32) -> StoreSettings {
    StoreSettings {
        max_tries,
        retry_timeout: Duration::from_millis(5),
        connect_interval: Duration::from_millis(20),
        ..StoreSettings::default()
    }
}

/// Event created a minute ago plus `seq` seconds, well inside retention.
pub fn event(project: &str, seq: i64) -> ProjectEvent {
    let created = time::OffsetDateTime::now_utc().unix_timestamp() - 60 + seq;
    ProjectEvent::new("ref-updated", Some(project), created)
        .with_field("seq", serde_json::json!(seq))
}

/// Poll `condition` every few milliseconds for up to five seconds.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
