use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{debug, error, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::storage::types::RecordFilter;
use crate::traffic::types::Record;

/// Appends records as JSON lines to a single file.
pub struct FileRecordStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileRecordStore {
    pub const DEFAULT_FILE: &'static str = "records.jsonl";

    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create record dir {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Failed to open record file {}: {}", path.display(), e);
                StorageError::ConnectionFailed
            })?;
        info!("FileRecordStore writing to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every record matching `filter`, in write order.
    ///
    /// Lines that do not parse are skipped with a warning.
    pub fn read_records(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        let file = File::open(&self.path).map_err(|e| {
            error!("Failed to open record file {}: {}", self.path.display(), e);
            StorageError::ReadFailed
        })?;
        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|_| StorageError::ReadFailed)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(&line) {
                Ok(record) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed record line {}: {}", number + 1, e),
            }
        }
        debug!("Read {} records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

impl RecordStore for FileRecordStore {
    fn persist(&self, record: &Record) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record).map_err(|_| StorageError::WriteFailed)?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes()).map_err(|e| {
            error!("Failed to write record file {}: {}", self.path.display(), e);
            StorageError::WriteFailed
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::queue::tests::sample_record;
    use tempfile::TempDir;

    #[test]
    fn test_file_records_roundtrip_with_filter() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path().join("nested").join("records.jsonl")).unwrap();

        let mut failed = sample_record(9001);
        failed.success = false;
        failed.error = Some("Connection refused (os error 111)".into());
        store.persist(&sample_record(9000)).unwrap();
        store.persist(&failed).unwrap();

        let all = store.read_records(&RecordFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].port, 9000);

        let violations = store
            .read_records(&crate::storage::record_filter::violations())
            .unwrap();
        assert_eq!(violations, vec![failed]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        let store = FileRecordStore::new(&path).unwrap();
        store.persist(&sample_record(1)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{not json").unwrap();
        }
        store.persist(&sample_record(2)).unwrap();

        let ports: Vec<u16> = store
            .read_records(&RecordFilter::default())
            .unwrap()
            .iter()
            .map(|r| r.port)
            .collect();
        assert_eq!(ports, vec![1, 2]);
    }
}
