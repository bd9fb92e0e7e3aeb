//! Best-effort usage telemetry.
//!
//! Request handlers call [`ActivityRecorder::record`], which never waits: the
//! record goes into a bounded buffer or, when the buffer is full, is dropped
//! with a warning. A single background batcher drains the buffer and hands
//! batches to an [`ActivityCollector`] when either
//!
//! - the batch reaches `batch_size` records, or
//! - `flush_interval` passes since the last flush with records pending.
//!
//! The interval is re-armed after every flush. Failed flushes are logged and
//! the batch is discarded: no retry, no persistence across restarts.

use crate::config::GatekeeperConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_service::Service;
use tracing::{debug, warn};

pub mod collector;
pub use collector::{ActivityCollector, CollectError, HttpCollector, MemoryCollector};

/// One usage event, in its wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Pattern match that identified the request.
    pub request_id: String,
    /// Items carried by the request.
    pub count: usize,
}

impl ActivityRecord {
    pub fn new(request_id: impl Into<String>, count: usize) -> Self {
        Self { request_id: request_id.into(), count }
    }
}

/// Buffer and flush parameters for the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Capacity of the in-memory buffer.
    pub buffer_size: usize,
    /// Records per size-triggered flush.
    pub batch_size: usize,
    /// Time between flushes when the batch is not filling up.
    pub flush_interval: Duration,
}

impl BatchSettings {
    pub fn from_config(config: &GatekeeperConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
        }
    }
}

/// Cloneable, non-blocking handle used on the request path.
#[derive(Clone, Debug)]
pub struct ActivityRecorder {
    tx: mpsc::Sender<ActivityRecord>,
    dropped: Arc<AtomicU64>,
}

impl ActivityRecorder {
    /// Start the batcher task and return the recorder feeding it.
    ///
    /// Must be called from within a tokio runtime. Call once per process;
    /// every clone of the returned recorder feeds the same worker.
    pub fn spawn<C>(collector: C, settings: BatchSettings) -> (Self, BatcherHandle)
    where
        C: ActivityCollector,
        C::Future: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(settings.buffer_size.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_batcher(rx, collector, settings, stop_rx));
        let recorder = Self { tx, dropped: Arc::new(AtomicU64::new(0)) };
        (recorder, BatcherHandle { stop: Some(stop_tx), task })
    }

    /// Enqueue a record without waiting. Drops it when the buffer is full.
    pub fn record(&self, request_id: impl Into<String>, count: usize) {
        let record = ActivityRecord::new(request_id, count);
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(request_id = %record.request_id, dropped, "activity buffer full; record dropped");
            }
            Err(TrySendError::Closed(record)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(request_id = %record.request_id, dropped, "activity batcher stopped; record dropped");
            }
        }
    }

    /// Records dropped so far by this recorder and its clones.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owner-side handle of the batcher task.
///
/// Dropping it leaves the worker running for the life of the process.
#[derive(Debug)]
pub struct BatcherHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BatcherHandle {
    /// Stop accepting records, flush what is buffered, and wait for the worker.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "activity batcher ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_batcher<C>(
    mut rx: mpsc::Receiver<ActivityRecord>,
    mut collector: C,
    settings: BatchSettings,
    mut stop: oneshot::Receiver<()>,
) where
    C: ActivityCollector,
    C::Future: Send + 'static,
{
    let batch_size = settings.batch_size.max(1);
    let mut batch: Vec<ActivityRecord> = Vec::with_capacity(batch_size);
    let timer = tokio::time::sleep(settings.flush_interval);
    tokio::pin!(timer);
    let mut stop_armed = true;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        flush(&mut collector, std::mem::take(&mut batch)).await;
                        timer.as_mut().reset(tokio::time::Instant::now() + settings.flush_interval);
                    }
                }
                None => break,
            },
            () = &mut timer => {
                if !batch.is_empty() {
                    flush(&mut collector, std::mem::take(&mut batch)).await;
                }
                timer.as_mut().reset(tokio::time::Instant::now() + settings.flush_interval);
            },
            signal = &mut stop, if stop_armed => {
                stop_armed = false;
                if signal.is_ok() {
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        batch.push(record);
                        if batch.len() >= batch_size {
                            flush(&mut collector, std::mem::take(&mut batch)).await;
                        }
                    }
                    break;
                }
                // Handle dropped without shutdown: keep running.
            },
        }
    }

    if !batch.is_empty() {
        flush(&mut collector, batch).await;
    }
    debug!("activity batcher stopped");
}

async fn flush<C>(collector: &mut C, batch: Vec<ActivityRecord>)
where
    C: ActivityCollector,
{
    let records = batch.len();
    let ready = match collector.ready().await {
        Ok(ready) => ready,
        Err(e) => {
            warn!(records, error = %e, "activity collector unavailable; batch dropped");
            return;
        }
    };
    match ready.call(batch).await {
        Ok(()) => debug!(records, "activity batch flushed"),
        Err(e) => warn!(records, error = %e, "activity flush failed; batch dropped"),
    }
}
