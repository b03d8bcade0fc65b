use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use super::is_valid_namespace_name;
use crate::configuration::config::Config;

/// Topology the agent operates on.
pub trait NamespaceProvider: Send + Sync {
    /// `true` when endpoints live in named network namespaces.
    fn namespace_mode(&self) -> bool;

    /// Known namespace names, sorted. Empty in root mode.
    fn namespaces(&self) -> Vec<String>;

    /// Endpoint address of `namespace`, if known.
    fn endpoint_of(&self, namespace: &str) -> Option<IpAddr>;

    /// Handle path of `namespace`; `None` for an invalid name.
    fn namespace_path(&self, namespace: &str) -> Option<PathBuf>;

    /// Endpoint of the agent itself in root mode.
    fn root_endpoint(&self) -> Option<IpAddr>;

    /// Whether `ip` is an endpoint served by this agent.
    fn is_local(&self, ip: IpAddr) -> bool;
}

/// Provider backed by a fixed namespace to endpoint map.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    namespace_mode: bool,
    root_endpoint: Option<IpAddr>,
    netns_dir: PathBuf,
    namespaces: BTreeMap<String, IpAddr>,
}

impl StaticTopology {
    pub fn root(endpoint: IpAddr) -> Self {
        Self {
            namespace_mode: false,
            root_endpoint: Some(endpoint),
            netns_dir: PathBuf::new(),
            namespaces: BTreeMap::new(),
        }
    }

    pub fn namespaced(netns_dir: impl Into<PathBuf>, namespaces: BTreeMap<String, IpAddr>) -> Self {
        Self {
            namespace_mode: true,
            root_endpoint: None,
            netns_dir: netns_dir.into(),
            namespaces,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.namespace_mode {
            Self::namespaced(config.netns_dir.clone(), config.namespaces.clone())
        } else {
            Self {
                namespace_mode: false,
                root_endpoint: config.endpoint,
                netns_dir: config.netns_dir.clone(),
                namespaces: BTreeMap::new(),
            }
        }
    }
}

impl NamespaceProvider for StaticTopology {
    fn namespace_mode(&self) -> bool {
        self.namespace_mode
    }

    fn namespaces(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }

    fn endpoint_of(&self, namespace: &str) -> Option<IpAddr> {
        self.namespaces.get(namespace).copied()
    }

    fn namespace_path(&self, namespace: &str) -> Option<PathBuf> {
        if !is_valid_namespace_name(namespace) {
            return None;
        }
        Some(self.netns_dir.join(namespace))
    }

    fn root_endpoint(&self) -> Option<IpAddr> {
        self.root_endpoint
    }

    fn is_local(&self, ip: IpAddr) -> bool {
        if self.namespace_mode {
            self.namespaces.values().any(|endpoint| *endpoint == ip)
        } else {
            self.root_endpoint == Some(ip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_namespaced_topology() {
        let mut map = BTreeMap::new();
        map.insert("red".to_string(), ip("10.0.0.1"));
        map.insert("blue".to_string(), ip("10.0.0.2"));
        let topology = StaticTopology::namespaced("/var/run/netns", map);

        assert!(topology.namespace_mode());
        assert_eq!(topology.namespaces(), vec!["blue", "red"]);
        assert_eq!(topology.endpoint_of("red"), Some(ip("10.0.0.1")));
        assert_eq!(topology.endpoint_of("green"), None);
        assert_eq!(
            topology.namespace_path("red"),
            Some(PathBuf::from("/var/run/netns/red"))
        );
        assert_eq!(topology.namespace_path("../red"), None);
        assert!(topology.is_local(ip("10.0.0.2")));
        assert!(!topology.is_local(ip("10.0.0.3")));
        assert_eq!(topology.root_endpoint(), None);
    }

    #[test]
    fn test_root_topology_from_config() {
        let config = Config::parse(r#"endpoint = "192.168.1.10""#).unwrap();
        let topology = StaticTopology::from_config(&config);
        assert!(!topology.namespace_mode());
        assert!(topology.namespaces().is_empty());
        assert!(topology.is_local(ip("192.168.1.10")));
        assert!(!topology.is_local(ip("192.168.1.11")));
        assert_eq!(topology.root_endpoint(), Some(ip("192.168.1.10")));
    }
}
