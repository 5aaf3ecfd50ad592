//! In-memory record store for unit tests that run on paused time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::PrimitiveDateTime;

use eventslog_core::clock::{days_before, now_utc};
use eventslog_core::{
    Dialect, EventRecord, EventRecordStore, EventsLogError, EventsLogResult, NewRecord,
    OrderingKey, ProjectEvents,
};

#[derive(Default)]
pub(crate) struct MemoryStore {
    rows: Mutex<Vec<NewRecord>>,
    down: AtomicBool,
    probes: AtomicUsize,
    sweeps: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }

    pub(crate) fn push(&self, project: &str, occurred_at: PrimitiveDateTime, payload: &str) {
        self.rows().push(NewRecord {
            project: project.to_string(),
            occurred_at,
            payload: payload.to_string(),
        });
    }

    pub(crate) fn payloads(&self) -> Vec<String> {
        self.rows().iter().map(|row| row.payload.clone()).collect()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<NewRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> EventsLogResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(EventsLogError::connectivity("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventRecordStore for MemoryStore {
    fn dialect(&self) -> Dialect {
        Dialect::Embedded
    }

    async fn ensure_schema(&self) -> EventsLogResult<()> {
        self.check()
    }

    async fn insert(&self, record: NewRecord) -> EventsLogResult<()> {
        self.check()?;
        self.rows().push(record);
        Ok(())
    }

    async fn insert_batch(&self, records: Vec<NewRecord>) -> EventsLogResult<()> {
        self.check()?;
        self.rows().extend(records);
        Ok(())
    }

    async fn select_range(&self, _sql: &str) -> EventsLogResult<ProjectEvents> {
        let mut grouped = ProjectEvents::new();
        for record in self.select_all().await? {
            grouped
                .entry(record.project.clone())
                .or_default()
                .push(record);
        }
        Ok(grouped)
    }

    async fn select_all(&self) -> EventsLogResult<Vec<EventRecord>> {
        self.check()?;
        Ok(self
            .rows()
            .iter()
            .zip(1..)
            .map(|(row, id)| EventRecord {
                key: OrderingKey::Serial(id),
                project: row.project.clone(),
                occurred_at: row.occurred_at,
                payload: row.payload.clone(),
            })
            .collect())
    }

    async fn delete_older_than(&self, max_age_days: u32) {
        if self.check().is_err() {
            return;
        }
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        if max_age_days == 0 {
            self.rows().clear();
            return;
        }
        let cutoff = days_before(now_utc(), max_age_days);
        self.rows().retain(|row| row.occurred_at >= cutoff);
    }

    async fn delete_for_project(&self, project: &str) {
        if self.check().is_ok() {
            self.rows().retain(|row| row.project != project);
        }
    }

    async fn probe(&self) -> EventsLogResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn exists(&self) -> EventsLogResult<bool> {
        self.check()?;
        Ok(true)
    }

    async fn close(&self) {}
}
