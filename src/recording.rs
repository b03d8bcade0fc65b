//! Record pipeline
//!
//! Decouples the ping path from persistence. Clients push [`Record`]s into a
//! bounded [`RecordQueue`] without ever blocking; a fixed pool of recorder
//! threads drains the queue and hands each record to a
//! [`RecordStore`](crate::storage::RecordStore) exactly once.
//!
//! Components:
//! - `sink`: the [`RecordSink`] trait clients submit through.
//! - `queue`: the bounded queue and its receiving end.
//! - `recorder`: the worker pool and its counters.
//!
//! [`Record`]: crate::traffic::Record

pub mod queue;
pub mod recorder;
pub mod sink;

pub use queue::{record_queue, RecordQueue, RecordReceiver};
pub use recorder::{Recorder, RecorderStats};
pub use sink::RecordSink;
