//! Record Store Trait
//!
//! Implementors persist one [`Record`] per call. Calls come from the recorder
//! threads, never from async tasks, so implementations may block.

use crate::error_handling::types::StorageError;
use crate::traffic::types::Record;

pub trait RecordStore: Send + Sync {
    /// Persists `record`. A failure is final: the caller logs it and moves on.
    fn persist(&self, record: &Record) -> Result<(), StorageError>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}
