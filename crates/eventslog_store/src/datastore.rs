use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use eventslog_core::{
    EventRecordStore, EventStore, EventsLogResult, ProjectEvent, ProjectVisibility, QueryMaker,
    TaskScheduler, TokioScheduler,
};

use crate::cleaner::{DAY, EventsLogCleaner};
use crate::client::SqlClient;
use crate::config::{EventsLogConfig, StoreSettings};
use crate::query::SqlQueryMaker;
use crate::store::{SqlStore, StoreState};

pub fn load_or_init_config(base: &Path) -> EventsLogResult<EventsLogConfig> {
    EventsLogConfig::load_or_init(base)
}

/// Open the events log described by `eventslog.json` under `base`.
pub async fn open_events_log(base: &Path) -> EventsLogResult<EventsLog> {
    let config = load_or_init_config(base)?;
    EventsLog::open(&config, base).await
}

/// Events log wired from its parts: failover store, cleaner and query maker.
pub struct EventsLog {
    store: SqlStore,
    cleaner: EventsLogCleaner,
    query_maker: SqlQueryMaker,
    scheduler: Arc<dyn TaskScheduler>,
}

impl EventsLog {
    pub async fn open(config: &EventsLogConfig, base: &Path) -> EventsLogResult<Self> {
        let primary = SqlClient::primary(config, base).await?;
        let local = SqlClient::local(config, base).await?;
        Ok(Self::from_parts(
            Arc::new(primary),
            Arc::new(local),
            Arc::new(TokioScheduler::new()),
            config.settings(),
        ))
    }

    pub fn from_parts(
        primary: Arc<dyn EventRecordStore>,
        local: Arc<dyn EventRecordStore>,
        scheduler: Arc<dyn TaskScheduler>,
        settings: StoreSettings,
    ) -> Self {
        let query_maker = SqlQueryMaker::new(primary.dialect(), settings.return_limit);
        let cleaner = EventsLogCleaner::new(primary.clone(), local.clone(), scheduler.clone());
        let store = SqlStore::new(primary, local, scheduler.clone(), settings);
        Self {
            store,
            cleaner,
            query_maker,
            scheduler,
        }
    }

    /// Prepare the stores and schedule the daily retention sweep.
    pub async fn start(&self) {
        self.store.start().await;
        let settings = self.store.settings();
        self.schedule_retention_sweep(settings.max_age_days, settings.cleanup_hour, DAY);
    }

    pub fn state(&self) -> StoreState {
        self.store.state()
    }

    pub fn store_handle(&self) -> &SqlStore {
        &self.store
    }

    pub fn query_maker(&self) -> &SqlQueryMaker {
        &self.query_maker
    }

    pub async fn store(&self, event: &ProjectEvent) -> EventsLogResult<()> {
        self.store.store_event(event).await
    }

    /// Record `event` in the background; failures are logged.
    pub fn on_event(&self, event: ProjectEvent) {
        let store = self.store.clone();
        self.scheduler.run_once(Box::pin(async move {
            if let Err(err) = store.store_event(&event).await {
                log::error!("eventslog: cannot record {} event: {err}", event.event_type);
            }
        }));
    }

    /// Events selected by the optional `t1`/`t2` range that `visibility`
    /// admits, oldest first.
    pub async fn query(
        &self,
        params: Option<&HashMap<String, String>>,
        visibility: &dyn ProjectVisibility,
    ) -> EventsLogResult<Vec<String>> {
        let sql = self.query_maker.form_query(params)?;
        self.store.query_change_events(&sql, visibility).await
    }

    pub fn remove_events_for_project(&self, project: &str) {
        self.cleaner.remove_project_events_async(project);
    }

    pub fn on_project_deleted(&self, project: &str) {
        log::info!("eventslog: project {project} deleted, removing its events");
        self.remove_events_for_project(project);
    }

    pub fn schedule_retention_sweep(&self, max_age_days: u32, hour: u8, interval: Duration) {
        self.cleaner.schedule_cleaning(max_age_days, hour, interval);
    }

    pub fn retention_schedules(&self) -> usize {
        self.cleaner.scheduled()
    }

    pub async fn close(&self) {
        self.cleaner.stop();
        self.store.close().await;
    }
}
