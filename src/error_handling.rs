pub mod types;

pub use types::{ConfigError, PingError, RecorderError, StorageError, TrafficError};
