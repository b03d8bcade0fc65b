//! Storage subsystem
//!
//! Backends persisting the [`Record`](crate::traffic::Record)s drained by the
//! recorder pool.
//!
//! Components:
//! - `storage_trait`: the [`RecordStore`] trait every backend implements.
//! - `types`: [`RecordFilter`] used by the verification queries.
//! - `record_filter`: helpers to build common filters.
//! - `database_storage`: SQLite implementation on `sqlx`, queryable.
//! - `file_storage`: JSON lines file, one record per line.
//! - `log_storage`: writes records to the log.
//! - `fanout_storage`: persists to several backends at once.

pub mod database_storage;
pub mod fanout_storage;
pub mod file_storage;
pub mod log_storage;
pub mod record_filter;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseRecordStore;
pub use fanout_storage::FanoutRecordStore;
pub use file_storage::FileRecordStore;
pub use log_storage::LogRecordStore;
pub use storage_trait::RecordStore;
pub use types::RecordFilter;

use std::sync::Arc;

use log::info;

use crate::configuration::types::{RecordBackend, RecorderSettings};
use crate::error_handling::types::StorageError;

/// Builds the record store selected by the recorder settings.
///
/// A single backend is returned as is; several are wrapped in a
/// [`FanoutRecordStore`] in the configured order.
pub fn from_settings(settings: &RecorderSettings) -> Result<Arc<dyn RecordStore>, StorageError> {
    let mut stores: Vec<Arc<dyn RecordStore>> = Vec::with_capacity(settings.backends.len());
    for backend in &settings.backends {
        let store: Arc<dyn RecordStore> = match backend {
            RecordBackend::Log => Arc::new(LogRecordStore),
            RecordBackend::File => {
                Arc::new(FileRecordStore::new(settings.path.join(FileRecordStore::DEFAULT_FILE))?)
            }
            RecordBackend::Sqlite => Arc::new(DatabaseRecordStore::new_file(
                settings.path.join(DatabaseRecordStore::DEFAULT_DB_FILE),
            )?),
        };
        info!("Record backend {} ready", store.name());
        stores.push(store);
    }

    if stores.len() == 1 {
        Ok(stores.remove(0))
    } else {
        Ok(Arc::new(FanoutRecordStore::new(stores)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_single_backend_is_not_wrapped() {
        let settings = RecorderSettings {
            backends: vec![RecordBackend::Log],
            ..Default::default()
        };
        let store = from_settings(&settings).unwrap();
        assert_eq!(store.name(), "log");
    }

    #[test]
    fn test_multiple_backends_fan_out() {
        let dir = TempDir::new().unwrap();
        let settings = RecorderSettings {
            backends: vec![RecordBackend::File, RecordBackend::Log],
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = from_settings(&settings).unwrap();
        assert_eq!(store.name(), "fanout");
        assert!(dir.path().join(FileRecordStore::DEFAULT_FILE).exists());
    }
}
