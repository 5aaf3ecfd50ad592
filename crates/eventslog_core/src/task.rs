//! Background task scheduling.
//!
//! Tasks run on the tokio runtime. A [`TaskHandle`] cancels future runs of a
//! recurring task; a run that already started always completes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};

use crate::clock::{delay_until_hour, local_now};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Factory for one run of a recurring task.
pub type RecurringTask = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

pub fn recurring<F, Fut>(task: F) -> RecurringTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(task()) as BoxFuture)
}

/// Cancellation handle for a scheduled task. Dropping the handle cancels the
/// task as well.
#[derive(Debug)]
pub struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub trait TaskScheduler: Send + Sync {
    /// Run `task` once, in the background, to completion.
    fn run_once(&self, task: BoxFuture);

    /// Run `task` after `initial_delay`, then again `delay` after each run
    /// finishes.
    fn run_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: RecurringTask,
    ) -> TaskHandle;

    /// Run `task` at the next `hour`:00 wall-clock time, then every `period`.
    fn run_daily_at(&self, hour: u8, period: Duration, task: RecurringTask) -> TaskHandle;
}

/// Scheduler backed by the ambient tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl TaskScheduler for TokioScheduler {
    fn run_once(&self, task: BoxFuture) {
        tokio::spawn(task);
    }

    fn run_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: RecurringTask,
    ) -> TaskHandle {
        let (cancel, mut cancelled) = watch::channel(false);
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.wait_for(|flag| *flag) => return,
                _ = sleep(initial_delay) => {}
            }
            loop {
                task().await;
                tokio::select! {
                    _ = cancelled.wait_for(|flag| *flag) => break,
                    _ = sleep(delay) => {}
                }
            }
        });
        TaskHandle { cancel, join }
    }

    fn run_daily_at(&self, hour: u8, period: Duration, task: RecurringTask) -> TaskHandle {
        let initial_delay = delay_until_hour(local_now(), hour);
        let (cancel, mut cancelled) = watch::channel(false);
        let join = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticker = interval_at(start, period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.wait_for(|flag| *flag) => break,
                    _ = ticker.tick() => {}
                }
                task().await;
            }
        });
        TaskHandle { cancel, join }
    }
}
