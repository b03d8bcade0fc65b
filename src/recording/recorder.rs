use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace};

use super::queue::RecordReceiver;
use crate::storage::RecordStore;
use crate::traffic::types::Record;

/// Snapshot of the recorder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub persisted: u64,
    pub failed: u64,
    /// Records rejected by a full queue before reaching a worker
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// Fixed pool of threads persisting queued records.
///
/// Each record is persisted at most once; a failed persist is logged and the
/// record discarded. [`stop`](Recorder::stop) persists what is already queued
/// before joining the pool.
pub struct Recorder {
    workers: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
    dropped: Arc<AtomicU64>,
}

impl Recorder {
    pub fn start(
        receiver: RecordReceiver,
        store: Arc<dyn RecordStore>,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        let RecordReceiver { rx, dropped } = receiver;
        let rx = Arc::new(Mutex::new(rx));
        let stopping = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers.max(1))
            .map(|index| {
                let rx = Arc::clone(&rx);
                let store = Arc::clone(&store);
                let stopping = Arc::clone(&stopping);
                let counters = Arc::clone(&counters);
                thread::Builder::new()
                    .name(format!("recorder-{}", index))
                    .spawn(move || drain(index, rx, store, stopping, counters, poll_interval))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to spawn recorder thread: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Recorder started with {} workers using {} storage",
            handles.len(),
            store.name()
        );
        Self {
            workers: handles,
            stopping,
            counters,
            dropped,
        }
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Drains the queue and joins every worker. Idempotent.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stopping.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Recorder thread panicked");
            }
        }
        let stats = self.stats();
        info!(
            "Recorder stopped (persisted: {}, failed: {}, dropped: {})",
            stats.persisted, stats.failed, stats.dropped
        );
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain(
    index: usize,
    rx: Arc<Mutex<Receiver<Record>>>,
    store: Arc<dyn RecordStore>,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
    poll_interval: Duration,
) {
    debug!("Recorder worker {} running", index);
    loop {
        let next = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            if stopping.load(Ordering::SeqCst) {
                match rx.try_recv() {
                    Ok(record) => Some(record),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
                }
            } else {
                match rx.recv_timeout(poll_interval) {
                    Ok(record) => Some(record),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
        };

        let Some(record) = next else {
            break;
        };
        match store.persist(&record) {
            Ok(()) => {
                trace!("Recorder worker {} persisted record {}", index, record.id);
                counters.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to persist record {}: {}", record.id, e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("Recorder worker {} exiting", index);
}
