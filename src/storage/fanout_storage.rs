use std::sync::Arc;

use log::warn;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::traffic::types::Record;

/// Persists every record to each inner store in order.
///
/// All stores are attempted even after a failure; the first error is
/// returned.
pub struct FanoutRecordStore {
    stores: Vec<Arc<dyn RecordStore>>,
}

impl FanoutRecordStore {
    pub fn new(stores: Vec<Arc<dyn RecordStore>>) -> Self {
        Self { stores }
    }
}

impl RecordStore for FanoutRecordStore {
    fn persist(&self, record: &Record) -> Result<(), StorageError> {
        let mut first_error = None;
        for store in &self.stores {
            if let Err(e) = store.persist(record) {
                warn!("{} storage failed for record {}: {}", store.name(), record.id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::queue::tests::sample_record;
    use std::sync::Mutex;

    struct Flaky {
        fail: bool,
        seen: Mutex<usize>,
    }

    impl RecordStore for Flaky {
        fn persist(&self, _record: &Record) -> Result<(), StorageError> {
            *self.seen.lock().unwrap() += 1;
            if self.fail {
                Err(StorageError::WriteFailed)
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_failure_does_not_skip_other_stores() {
        let failing = Arc::new(Flaky { fail: true, seen: Mutex::new(0) });
        let healthy = Arc::new(Flaky { fail: false, seen: Mutex::new(0) });
        let fanout = FanoutRecordStore::new(vec![failing.clone(), healthy.clone()]);

        let result = fanout.persist(&sample_record(1));
        assert!(matches!(result, Err(StorageError::WriteFailed)));
        assert_eq!(*failing.seen.lock().unwrap(), 1);
        assert_eq!(*healthy.seen.lock().unwrap(), 1);
    }
}
