use log::info;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::traffic::types::Record;

/// Writes every record to the log at info level. Never fails.
pub struct LogRecordStore;

impl RecordStore for LogRecordStore {
    fn persist(&self, record: &Record) -> Result<(), StorageError> {
        info!(
            "[record] {} {} -> {}:{} success={} connected={} latency={:.2}ms{}",
            record.protocol,
            record.src,
            record.dst,
            record.port,
            record.success,
            record.connected,
            record.latency_ms,
            record
                .error
                .as_deref()
                .map(|e| format!(" error={}", e))
                .unwrap_or_default()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
