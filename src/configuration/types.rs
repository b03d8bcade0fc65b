use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timing and fan-out knobs shared by every traffic client.
///
/// Serialised as part of a client worker spec, so a worker process runs with
/// exactly the settings of the agent that spawned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficSettings {
    /// Upper bound of concurrent pings in one cycle
    pub request_rate: usize,
    pub cycle_interval_secs: u64,
    /// Per-operation timeout (connect, send, receive)
    pub ping_timeout_ms: u64,
    /// How long a worker process may take to report readiness
    pub worker_ready_timeout_ms: u64,
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            request_rate: 100,
            cycle_interval_secs: 20,
            ping_timeout_ms: 2000,
            worker_ready_timeout_ms: 5000,
        }
    }
}

impl TrafficSettings {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn worker_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_ready_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordBackend {
    Log,
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub backends: Vec<RecordBackend>,
    /// Directory holding `records.jsonl` and/or `records.sqlite3`
    pub path: PathBuf,
    pub queue_capacity: usize,
    pub workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            backends: vec![RecordBackend::Log],
            path: PathBuf::from("/var/lib/pulse"),
            queue_capacity: 3000,
            workers: 2,
            poll_interval_ms: 500,
        }
    }
}

impl RecorderSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectedStateSettings {
    pub backend: StateBackend,
    pub path: PathBuf,
}

impl Default for ConnectedStateSettings {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: PathBuf::from("/var/lib/pulse/connected_state.sqlite3"),
        }
    }
}
