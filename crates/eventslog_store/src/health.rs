//! Connection check that runs while the store is offline.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;

use eventslog_core::{EventsLogResult, TaskHandle, TaskScheduler, recurring};

#[async_trait]
pub(crate) trait Reconnect: Send + Sync + 'static {
    async fn probe_primary(&self) -> EventsLogResult<()>;

    /// Attempt the offline to online transition. Returns whether the store is
    /// online afterwards.
    async fn try_go_online(&self) -> bool;
}

/// Probe the primary every `interval`, starting now, and bring the store back
/// online on the first successful probe. Runs do nothing once the store has
/// been dropped.
pub(crate) fn schedule_connection_check<R: Reconnect>(
    scheduler: &dyn TaskScheduler,
    interval: Duration,
    target: Weak<R>,
) -> TaskHandle {
    scheduler.run_with_fixed_delay(
        Duration::ZERO,
        interval,
        recurring(move || {
            let target = target.clone();
            async move {
                let Some(target) = target.upgrade() else {
                    return;
                };
                check_connection(target.as_ref()).await;
            }
        }),
    )
}

async fn check_connection<R: Reconnect>(target: &R) {
    log::debug!("eventslog: checking primary database connection");
    match target.probe_primary().await {
        Ok(()) => {
            if !target.try_go_online().await {
                log::debug!("eventslog: primary reachable but not ready, staying offline");
            }
        }
        Err(err) => log::debug!("eventslog: primary still unreachable: {err}"),
    }
}
