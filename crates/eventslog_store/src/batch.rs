//! Bounded write-behind queue for backends that prefer multi-row inserts.

use std::sync::{Arc, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use eventslog_core::{EventsLogError, EventsLogResult, NewRecord};

use crate::config::BatchSettings;

#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    async fn write_batch(&self, records: Vec<NewRecord>) -> EventsLogResult<()>;
}

pub struct BatchWriter {
    sender: mpsc::Sender<NewRecord>,
    failure: Arc<FlushFailure>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchWriter {
    pub fn spawn<S: BatchSink>(sink: Arc<S>, settings: BatchSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let failure = Arc::new(FlushFailure::default());
        let worker = tokio::spawn(run_flusher(
            sink,
            receiver,
            stop_rx,
            failure.clone(),
            settings,
        ));
        Self {
            sender,
            failure,
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `record` for the next flush. Fails at once when the queue is full,
    /// and with a connectivity error while the last flush could not reach the
    /// database.
    pub fn enqueue(&self, record: NewRecord) -> EventsLogResult<()> {
        if let Some(reason) = self.failure.get() {
            return Err(EventsLogError::connectivity(format!(
                "last batch flush failed: {reason}"
            )));
        }
        self.sender.try_send(record).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                EventsLogError::capacity("batch queue is full, event rejected")
            }
            mpsc::error::TrySendError::Closed(_) => {
                EventsLogError::storage("batch writer is stopped")
            }
        })
    }

    /// Accept writes again after the database was reached some other way.
    pub fn mark_healthy(&self) {
        self.failure.clear();
    }

    /// Flush whatever is queued and stop the flush task.
    pub async fn shutdown(&self) {
        if let Some(stop) = self.stop.lock().await.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.lock().await.take()
            && let Err(err) = worker.await
        {
            log::warn!("eventslog: batch writer task failed: {err}");
        }
    }
}

/// Connectivity error of the most recent flush, cleared by a successful one.
#[derive(Default)]
struct FlushFailure(std::sync::Mutex<Option<String>>);

impl FlushFailure {
    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> Option<String> {
        self.slot().clone()
    }

    fn set(&self, reason: String) {
        *self.slot() = Some(reason);
    }

    fn clear(&self) {
        self.slot().take();
    }
}

async fn run_flusher<S: BatchSink>(
    sink: Arc<S>,
    mut receiver: mpsc::Receiver<NewRecord>,
    mut stop: oneshot::Receiver<()>,
    failure: Arc<FlushFailure>,
    settings: BatchSettings,
) {
    let batch_size = settings.batch_size;
    let mut ticker = interval(settings.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut stop => {
                while flush_once(sink.as_ref(), &mut receiver, &failure, batch_size).await > 0 {}
                break;
            }
            _ = ticker.tick() => {
                flush_once(sink.as_ref(), &mut receiver, &failure, batch_size).await;
            }
        }
    }
}

/// Drain up to `batch_size` queued records into one write. Returns how many
/// records were taken off the queue.
async fn flush_once<S: BatchSink>(
    sink: &S,
    receiver: &mut mpsc::Receiver<NewRecord>,
    failure: &FlushFailure,
    batch_size: usize,
) -> usize {
    let mut batch = Vec::with_capacity(batch_size);
    while batch.len() < batch_size {
        match receiver.try_recv() {
            Ok(record) => batch.push(record),
            Err(_) => break,
        }
    }
    let taken = batch.len();
    if taken == 0 {
        return 0;
    }
    match sink.write_batch(batch).await {
        Ok(()) => {
            failure.clear();
            log::debug!("eventslog: flushed batch of {taken} events");
        }
        Err(err) => {
            log::warn!("eventslog: dropping batch of {taken} events: {err}");
            if err.is_connectivity() {
                failure.set(err.to_string());
            }
        }
    }
    taken
}
