use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventslog_core::{EventRecordStore, TaskHandle, TaskScheduler, recurring};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention sweeps and per-project removal over both stores.
pub struct EventsLogCleaner {
    primary: Arc<dyn EventRecordStore>,
    local: Arc<dyn EventRecordStore>,
    scheduler: Arc<dyn TaskScheduler>,
    schedules: Mutex<Vec<TaskHandle>>,
}

impl EventsLogCleaner {
    pub fn new(
        primary: Arc<dyn EventRecordStore>,
        local: Arc<dyn EventRecordStore>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Self {
        Self {
            primary,
            local,
            scheduler,
            schedules: Mutex::new(Vec::new()),
        }
    }

    /// Delete every event of `project` from both stores in the background.
    pub fn remove_project_events_async(&self, project: &str) {
        for store in [self.primary.clone(), self.local.clone()] {
            let project = project.to_string();
            self.scheduler.run_once(Box::pin(async move {
                store.delete_for_project(&project).await;
            }));
        }
    }

    /// Delete events older than `max_age_days` from both stores at the next
    /// `hour`:00 and then every `interval`.
    pub fn schedule_cleaning(&self, max_age_days: u32, hour: u8, interval: Duration) {
        let primary = self.primary.clone();
        let local = self.local.clone();
        let handle = self.scheduler.run_daily_at(
            hour,
            interval,
            recurring(move || {
                let primary = primary.clone();
                let local = local.clone();
                async move {
                    log::info!("eventslog: removing events older than {max_age_days} days");
                    primary.delete_older_than(max_age_days).await;
                    local.delete_older_than(max_age_days).await;
                }
            }),
        );
        match self.schedules.lock() {
            Ok(mut schedules) => schedules.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    pub fn scheduled(&self) -> usize {
        self.schedules
            .lock()
            .map(|schedules| schedules.len())
            .unwrap_or_default()
    }

    /// Cancel every retention schedule.
    pub fn stop(&self) {
        let handles = match self.schedules.lock() {
            Ok(mut schedules) => std::mem::take(&mut *schedules),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            handle.cancel();
        }
    }
}
