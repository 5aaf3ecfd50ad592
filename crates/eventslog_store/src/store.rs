//! Failover engine: writes to the primary database while it is reachable and
//! to the local backup database otherwise, replaying the backup on reconnect.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

use eventslog_core::{
    EventRecord, EventRecordStore, EventStore, EventsLogError, EventsLogResult, NewRecord,
    ProjectEvent, ProjectVisibility, TaskHandle, TaskScheduler, Visibility,
};

use crate::config::{DEFAULT_BATCH_SIZE, StoreSettings};
use crate::health::{Reconnect, schedule_connection_check};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreState {
    Online = 0,
    Offline = 1,
}

impl StoreState {
    fn from_u8(value: u8) -> Self {
        if value == StoreState::Offline as u8 {
            StoreState::Offline
        } else {
            StoreState::Online
        }
    }
}

#[derive(Clone)]
pub struct SqlStore {
    shared: Arc<Shared>,
}

struct Shared {
    primary: Arc<dyn EventRecordStore>,
    local: Arc<dyn EventRecordStore>,
    scheduler: Arc<dyn TaskScheduler>,
    settings: StoreSettings,
    state: AtomicU8,
    /// Serializes state transitions and owns the connection check handle.
    transition: Mutex<Option<TaskHandle>>,
    /// Inserts hold it shared; replay and the flip back online hold it
    /// exclusively so no write lands in the backup after it was emptied.
    write_gate: RwLock<()>,
    me: Weak<Shared>,
}

impl SqlStore {
    pub fn new(
        primary: Arc<dyn EventRecordStore>,
        local: Arc<dyn EventRecordStore>,
        scheduler: Arc<dyn TaskScheduler>,
        settings: StoreSettings,
    ) -> Self {
        let shared = Arc::new_cyclic(|me| Shared {
            primary,
            local,
            scheduler,
            settings,
            state: AtomicU8::new(StoreState::Online as u8),
            transition: Mutex::new(None),
            write_gate: RwLock::new(()),
            me: me.clone(),
        });
        Self { shared }
    }

    pub fn state(&self) -> StoreState {
        self.shared.state()
    }

    pub fn is_online(&self) -> bool {
        self.state() == StoreState::Online
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.shared.settings
    }

    pub fn primary(&self) -> &Arc<dyn EventRecordStore> {
        &self.shared.primary
    }

    pub fn local(&self) -> &Arc<dyn EventRecordStore> {
        &self.shared.local
    }

    /// Prepare the primary, falling back to offline mode when it cannot be
    /// reached, then apply retention to whichever store is active.
    pub async fn start(&self) {
        let shared = &self.shared;
        match shared.primary.ensure_schema().await {
            Ok(()) => {
                let _gate = shared.write_gate.write().await;
                shared.restore_from_local().await;
            }
            Err(err) => {
                log::warn!("eventslog: primary database unavailable at startup: {err}");
                shared.go_offline().await;
            }
        }
        shared
            .active()
            .delete_older_than(shared.settings.max_age_days)
            .await;
    }

    pub async fn go_offline(&self) {
        self.shared.go_offline().await;
    }

    pub async fn try_go_online(&self) -> bool {
        self.shared.try_go_online().await
    }

    pub async fn close(&self) {
        if let Some(handle) = self.shared.transition.lock().await.take() {
            handle.cancel();
        }
        self.shared.primary.close().await;
        self.shared.local.close().await;
    }

    async fn store_record(&self, record: NewRecord) -> EventsLogResult<()> {
        let shared = &self.shared;
        let max_tries = shared.settings.max_tries;
        let mut failed: u32 = 0;
        loop {
            let (was_online, result) = {
                let _gate = shared.write_gate.read().await;
                let online = shared.state() == StoreState::Online;
                let target = if online { &shared.primary } else { &shared.local };
                (online, target.insert(record.clone()).await)
            };
            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_connectivity() => return Err(err),
                Err(err) => err,
            };
            if failed.saturating_add(1) < max_tries {
                failed += 1;
                log::info!(
                    "eventslog: write failed ({err}), retry {failed} of {}",
                    max_tries - 1
                );
                sleep(shared.settings.retry_timeout).await;
                continue;
            }
            if !was_online {
                log::error!("eventslog: cannot write to the local database: {err}");
                return Err(err);
            }
            log::error!("eventslog: giving up on the primary database after {max_tries} tries: {err}");
            shared.go_offline().await;
            let _gate = shared.write_gate.read().await;
            return shared.active().insert(record).await;
        }
    }
}

impl Shared {
    fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: StoreState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn active(&self) -> &Arc<dyn EventRecordStore> {
        match self.state() {
            StoreState::Online => &self.primary,
            StoreState::Offline => &self.local,
        }
    }

    async fn go_offline(&self) {
        let mut check = self.transition.lock().await;
        if self.state() == StoreState::Offline {
            return;
        }
        self.set_state(StoreState::Offline);
        log::warn!("eventslog: primary database unreachable, writing to the local database");
        if let Err(err) = self.local.ensure_schema().await {
            log::warn!("eventslog: cannot prepare the local database: {err}");
        }
        self.local.delete_older_than(self.settings.max_age_days).await;
        if let Some(previous) = check.take() {
            previous.cancel();
        }
        *check = Some(schedule_connection_check(
            self.scheduler.as_ref(),
            self.settings.connect_interval,
            self.me.clone(),
        ));
    }

    async fn try_go_online(&self) -> bool {
        let mut check = self.transition.lock().await;
        if self.state() == StoreState::Online {
            return true;
        }
        if let Err(err) = self.primary.ensure_schema().await {
            log::debug!("eventslog: primary schema still unavailable: {err}");
            return false;
        }
        {
            let _gate = self.write_gate.write().await;
            self.restore_from_local().await;
            self.set_state(StoreState::Online);
        }
        log::info!("eventslog: primary database reachable again, back online");
        if let Some(handle) = check.take() {
            handle.cancel();
        }
        true
    }

    /// Copy every backed-up record into the primary, then empty the backup.
    async fn restore_from_local(&self) {
        match self.local.exists().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                log::warn!("eventslog: cannot inspect the local database: {err}");
                return;
            }
        }
        let records = match self.local.select_all().await {
            Ok(records) => records,
            Err(err) => {
                log::warn!("eventslog: cannot read the local database: {err}");
                return;
            }
        };
        if records.is_empty() {
            return;
        }
        log::info!(
            "eventslog: restoring {} events from the local database",
            records.len()
        );
        // insert_batch bypasses a batching primary's bounded queue.
        for chunk in records.chunks(DEFAULT_BATCH_SIZE) {
            let batch = chunk.iter().map(EventRecord::to_new_record).collect();
            let Err(err) = self.primary.insert_batch(batch).await else {
                continue;
            };
            log::warn!("eventslog: batch restore failed ({err}), restoring one by one");
            for record in chunk {
                if let Err(err) = self.primary.insert_batch(vec![record.to_new_record()]).await {
                    log::warn!(
                        "eventslog: cannot restore event of project {}: {err}",
                        record.project
                    );
                }
            }
        }
        if self.settings.copy_local
            && let Some(path) = self.local.local_path()
        {
            copy_snapshot(&path).await;
        }
        self.local.delete_older_than(0).await;
    }
}

#[async_trait]
impl Reconnect for Shared {
    async fn probe_primary(&self) -> EventsLogResult<()> {
        self.primary.probe().await
    }

    async fn try_go_online(&self) -> bool {
        Shared::try_go_online(self).await
    }
}

#[async_trait]
impl EventStore for SqlStore {
    async fn store_event(&self, event: &ProjectEvent) -> EventsLogResult<()> {
        let Some(record) = event.to_record()? else {
            log::debug!(
                "eventslog: ignoring {} event without a project",
                event.event_type
            );
            return Ok(());
        };
        self.store_record(record).await
    }

    async fn query_change_events(
        &self,
        sql: &str,
        visibility: &dyn ProjectVisibility,
    ) -> EventsLogResult<Vec<String>> {
        let shared = &self.shared;
        if shared.state() == StoreState::Offline {
            return Err(EventsLogError::unavailable(
                "primary database is unreachable, events are being buffered locally",
            ));
        }
        let groups = shared.primary.select_range(sql).await?;
        let mut visible = Vec::new();
        for (project, records) in groups {
            match visibility.check(&project).await {
                Visibility::Visible => visible.extend(records),
                Visibility::NotVisible => {}
                Visibility::NoSuchProject => {
                    log::info!("eventslog: removing events of deleted project {project}");
                    let primary = shared.primary.clone();
                    shared.scheduler.run_once(Box::pin(async move {
                        primary.delete_for_project(&project).await;
                    }));
                }
                Visibility::CheckFailed(reason) => {
                    log::warn!("eventslog: cannot check access to project {project}: {reason}");
                }
            }
        }
        let dialect = shared.primary.dialect();
        visible.sort_by(|left, right| dialect.compare(left, right));
        Ok(visible.into_iter().map(|record| record.payload).collect())
    }
}

/// Keep a copy of the backup file as `<stem><unix-seconds>.<ext>` next to it.
async fn copy_snapshot(path: &Path) {
    let target = snapshot_path(path, OffsetDateTime::now_utc().unix_timestamp());
    match tokio::fs::copy(path, &target).await {
        Ok(_) => log::info!("eventslog: copied local database to {}", target.display()),
        Err(err) => log::warn!(
            "eventslog: cannot copy local database to {}: {err}",
            target.display()
        ),
    }
}

fn snapshot_path(path: &Path, unix_seconds: i64) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{unix_seconds}.{}", ext.to_string_lossy()),
        None => format!("{stem}{unix_seconds}"),
    };
    path.with_file_name(name)
}
