use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use log::warn;

use super::sink::RecordSink;
use crate::error_handling::types::RecorderError;
use crate::traffic::types::Record;

/// Creates a bounded record queue holding at most `capacity` records.
pub fn record_queue(capacity: usize) -> (RecordQueue, RecordReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RecordQueue {
            tx,
            dropped: Arc::clone(&dropped),
        },
        RecordReceiver { rx, dropped },
    )
}

/// Producer side of the record queue. Cheap to clone, one per client.
#[derive(Clone)]
pub struct RecordQueue {
    tx: SyncSender<Record>,
    dropped: Arc<AtomicU64>,
}

impl RecordQueue {
    /// Enqueues `record` without waiting.
    ///
    /// A full queue drops the record, bumps the dropped counter and returns
    /// [`RecorderError::QueueFull`].
    pub fn push(&self, record: Record) -> Result<(), RecorderError> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Record queue full, dropping record {} ({} -> {}:{}), {} dropped so far",
                    record.id, record.src, record.dst, record.port, dropped
                );
                Err(RecorderError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(RecorderError::QueueClosed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RecordSink for RecordQueue {
    fn submit(&self, record: Record) -> Result<(), RecorderError> {
        self.push(record)
    }
}

/// Consumer side of the record queue, handed to [`Recorder::start`].
///
/// [`Recorder::start`]: super::Recorder::start
pub struct RecordReceiver {
    pub(crate) rx: Receiver<Record>,
    pub(crate) dropped: Arc<AtomicU64>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::traffic::types::Protocol;
    use chrono::Utc;
    use uuid::Uuid;

    pub(crate) fn sample_record(port: u16) -> Record {
        Record {
            id: Uuid::new_v4(),
            src: "10.0.0.1".parse().unwrap(),
            dst: "10.0.0.2".parse().unwrap(),
            port,
            protocol: Protocol::Tcp,
            latency_ms: 1.5,
            error: None,
            success: true,
            connected: true,
            created_time: Utc::now(),
        }
    }

    #[test]
    fn test_push_drops_when_full() {
        let (queue, receiver) = record_queue(2);
        assert_eq!(queue.push(sample_record(1)), Ok(()));
        assert_eq!(queue.push(sample_record(2)), Ok(()));
        assert_eq!(queue.push(sample_record(3)), Err(RecorderError::QueueFull));
        assert_eq!(queue.dropped(), 1);

        let first = receiver.rx.try_recv().unwrap();
        assert_eq!(first.port, 1);
        assert_eq!(queue.submit(sample_record(4)), Ok(()));
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (queue, receiver) = record_queue(2);
        drop(receiver);
        assert_eq!(queue.push(sample_record(1)), Err(RecorderError::QueueClosed));
        assert_eq!(queue.dropped(), 0);
    }
}
