use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::namespace::is_valid_namespace_name;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Agent configuration, read from a TOML file.
///
/// # Examples
///
/// ```toml
/// namespace_mode = true
/// netns_dir = "/var/run/netns"
///
/// [namespaces]
/// red = "10.0.0.1"
/// blue = "10.0.0.2"
///
/// [traffic]
/// request_rate = 50
///
/// [recorder]
/// backends = ["sqlite", "log"]
/// path = "/var/lib/pulse"
///
/// [connected_state]
/// backend = "sqlite"
/// path = "/var/lib/pulse/connected_state.sqlite3"
/// ```
///
/// # Fields Overview
///
/// - `namespace_mode`: when `true` every endpoint lives in its own network
///   namespace and workers are spawned inside it; when `false` the agent runs
///   in the root namespace and serves the single `endpoint`
/// - `endpoint`: the local endpoint address in root mode
/// - `netns_dir`: directory holding the named namespace handles
/// - `namespaces`: namespace name to endpoint address
/// - `traffic`, `recorder`, `connected_state`: see their types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub namespace_mode: bool,
    pub endpoint: Option<IpAddr>,
    pub netns_dir: PathBuf,
    pub namespaces: BTreeMap<String, IpAddr>,
    pub traffic: TrafficSettings,
    pub recorder: RecorderSettings,
    pub connected_state: ConnectedStateSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace_mode: false,
            endpoint: None,
            netns_dir: PathBuf::from("/var/run/netns"),
            namespaces: BTreeMap::new(),
            traffic: TrafficSettings::default(),
            recorder: RecorderSettings::default(),
            connected_state: ConnectedStateSettings::default(),
        }
    }
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses and validates a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace_mode {
            for name in self.namespaces.keys() {
                if !is_valid_namespace_name(name) {
                    return Err(ConfigError::InvalidNamespace(name.clone()));
                }
            }
        } else if self.endpoint.is_none() {
            return Err(ConfigError::MissingValue(
                "endpoint is required when namespace_mode is false".to_string(),
            ));
        }

        if self.traffic.request_rate == 0 {
            return Err(ConfigError::NotInRange("traffic.request_rate must be at least 1".to_string()));
        }
        if self.traffic.cycle_interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "traffic.cycle_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.traffic.ping_timeout_ms == 0 {
            return Err(ConfigError::NotInRange("traffic.ping_timeout_ms must be positive".to_string()));
        }
        if self.recorder.workers == 0 {
            return Err(ConfigError::NotInRange("recorder.workers must be at least 1".to_string()));
        }
        if self.recorder.poll_interval_ms == 0 {
            return Err(ConfigError::NotInRange(
                "recorder.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.recorder.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "recorder.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.recorder.backends.is_empty() {
            return Err(ConfigError::MissingValue("recorder.backends is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(r#"endpoint = "10.0.0.1""#).unwrap();
        assert!(!config.namespace_mode);
        assert_eq!(config.traffic.request_rate, 100);
        assert_eq!(config.traffic.cycle_interval_secs, 20);
        assert_eq!(config.traffic.ping_timeout_ms, 2000);
        assert_eq!(config.recorder.queue_capacity, 3000);
        assert_eq!(config.recorder.workers, 2);
        assert_eq!(config.recorder.backends, vec![RecordBackend::Log]);
        assert_eq!(config.connected_state.backend, StateBackend::Sqlite);
        assert_eq!(config.netns_dir, PathBuf::from("/var/run/netns"));
    }

    #[test]
    fn test_namespace_mode_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
namespace_mode = true

[namespaces]
red = "10.0.0.1"
blue = "10.0.0.2"

[traffic]
request_rate = 5
cycle_interval_secs = 1

[recorder]
backends = ["sqlite", "log"]
path = "/tmp/pulse"

[connected_state]
backend = "sqlite"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.namespace_mode);
        assert_eq!(config.namespaces.len(), 2);
        assert_eq!(config.namespaces["red"], "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.traffic.request_rate, 5);
        assert_eq!(config.traffic.ping_timeout_ms, 2000);
        assert_eq!(
            config.recorder.backends,
            vec![RecordBackend::Sqlite, RecordBackend::Log]
        );
        assert_eq!(config.connected_state.backend, StateBackend::Sqlite);
    }

    #[test]
    fn test_root_mode_requires_endpoint() {
        let err = Config::parse("namespace_mode = false").unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue(_)));
    }

    #[test]
    fn test_rejects_bad_namespace_name() {
        let err = Config::parse(
            r#"
namespace_mode = true
[namespaces]
"../etc" = "10.0.0.1"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNamespace(_)));
    }

    #[test]
    fn test_rejects_zero_rate_and_unknown_backend() {
        let zero = Config::parse(
            r#"
endpoint = "10.0.0.1"
[traffic]
request_rate = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(zero, ConfigError::NotInRange(_)));

        let backend = Config::parse(
            r#"
endpoint = "10.0.0.1"
[recorder]
backends = ["kafka"]
"#,
        )
        .unwrap_err();
        assert!(matches!(backend, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let cycle = Config::parse(
            r#"
endpoint = "10.0.0.1"
[traffic]
cycle_interval_secs = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(cycle, ConfigError::NotInRange(ref msg) if msg.contains("cycle_interval_secs")));

        let poll = Config::parse(
            r#"
endpoint = "10.0.0.1"
[recorder]
poll_interval_ms = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(poll, ConfigError::NotInRange(ref msg) if msg.contains("poll_interval_ms")));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/pulse.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
