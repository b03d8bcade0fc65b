use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
    MissingValue(String),
    InvalidNamespace(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing value: {}", e),
            ConfigError::InvalidNamespace(e) => write!(f, "Invalid namespace name: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Stage of a worker start-up that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureStage {
    Namespace,
    Bind,
    Runtime,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Namespace => write!(f, "namespace entry"),
            FailureStage::Bind => write!(f, "bind"),
            FailureStage::Runtime => write!(f, "runtime setup"),
        }
    }
}

#[derive(Debug)]
pub enum TrafficError {
    /// Rejected before any side effect (e.g. a namespace given in root mode).
    Configuration(String),
    UnknownNamespace(String),
    MissingEndpoint(String),
    Bind(std::io::Error),
    NamespaceEntry(String),
    WorkerSpawn(std::io::Error),
    WorkerProtocol(String),
    Storage(StorageError),
}

impl fmt::Display for TrafficError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficError::Configuration(e) => write!(f, "Configuration error: {}", e),
            TrafficError::UnknownNamespace(ns) => write!(f, "Unknown namespace: {}", ns),
            TrafficError::MissingEndpoint(ns) => {
                write!(f, "No endpoint address known for namespace {}", ns)
            }
            TrafficError::Bind(e) => write!(f, "Server bind error: {}", e),
            TrafficError::NamespaceEntry(e) => write!(f, "Namespace entry failed: {}", e),
            TrafficError::WorkerSpawn(e) => write!(f, "Worker spawn failed: {}", e),
            TrafficError::WorkerProtocol(e) => write!(f, "Worker protocol error: {}", e),
            TrafficError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for TrafficError {}

impl From<StorageError> for TrafficError {
    fn from(err: StorageError) -> Self {
        TrafficError::Storage(err)
    }
}

impl From<ConfigError> for TrafficError {
    fn from(err: ConfigError) -> Self {
        TrafficError::Configuration(err.to_string())
    }
}

/// Failure of a single ping. Never leaves the client: it is folded into a
/// failed [`Record`](crate::traffic::Record).
#[derive(Debug)]
pub enum PingError {
    Timeout(&'static str),
    Io(std::io::Error),
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingError::Timeout(op) => write!(f, "timed out during {}", op),
            PingError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PingError {}

impl From<std::io::Error> for PingError {
    fn from(err: std::io::Error) -> Self {
        PingError::Io(err)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RecorderError {
    QueueFull,
    QueueClosed,
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::QueueFull => write!(f, "Record queue is full"),
            RecorderError::QueueClosed => write!(f, "Record queue is closed"),
        }
    }
}

impl std::error::Error for RecorderError {}
