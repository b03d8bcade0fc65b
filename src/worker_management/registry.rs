//! In-memory indexes of live workers.
//!
//! Both registries guard a map with a std mutex that is never held across an
//! `.await`: callers clone the `Arc<Worker>` out and operate on it after the
//! lock is released.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use super::worker::Worker;
use crate::traffic::types::Protocol;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey {
    pub namespace: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl ServerKey {
    pub fn new(namespace: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            namespace: namespace.into(),
            port,
            protocol,
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.protocol, self.port)
    }
}

/// Live server workers keyed by `(namespace, port, protocol)`.
#[derive(Default)]
pub struct ServerRegistry {
    workers: Mutex<BTreeMap<ServerKey, Arc<Worker>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> MutexGuard<'_, BTreeMap<ServerKey, Arc<Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `worker` under `key` unless the key is taken, and returns
    /// the handle now registered under `key`.
    pub fn add(&self, key: ServerKey, worker: Arc<Worker>) -> Arc<Worker> {
        let mut workers = self.workers();
        match workers.get(&key) {
            Some(existing) => {
                debug!("Server {} already registered as worker {}", key, existing.id());
                Arc::clone(existing)
            }
            None => {
                debug!("Registering server {} as worker {}", key, worker.id());
                workers.insert(key, Arc::clone(&worker));
                worker
            }
        }
    }

    pub fn remove(&self, key: &ServerKey) -> Option<Arc<Worker>> {
        self.workers().remove(key)
    }

    pub fn get(&self, key: &ServerKey) -> Option<Arc<Worker>> {
        self.workers().get(key).cloned()
    }

    pub fn get_all(&self) -> Vec<(ServerKey, Arc<Worker>)> {
        self.workers()
            .iter()
            .map(|(key, worker)| (key.clone(), Arc::clone(worker)))
            .collect()
    }

    pub fn keys_in(&self, namespace: &str) -> Vec<ServerKey> {
        self.workers()
            .keys()
            .filter(|key| key.namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers().is_empty()
    }
}

/// Live client workers, one per namespace.
#[derive(Default)]
pub struct ClientRegistry {
    workers: Mutex<BTreeMap<String, Arc<Worker>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Same contract as [`ServerRegistry::add`].
    pub fn add(&self, namespace: &str, worker: Arc<Worker>) -> Arc<Worker> {
        let mut workers = self.workers();
        match workers.get(namespace) {
            Some(existing) => Arc::clone(existing),
            None => {
                debug!("Registering client of {} as worker {}", namespace, worker.id());
                workers.insert(namespace.to_string(), Arc::clone(&worker));
                worker
            }
        }
    }

    pub fn remove(&self, namespace: &str) -> Option<Arc<Worker>> {
        self.workers().remove(namespace)
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Worker>> {
        self.workers().get(namespace).cloned()
    }

    pub fn get_all(&self) -> Vec<(String, Arc<Worker>)> {
        self.workers()
            .iter()
            .map(|(namespace, worker)| (namespace.clone(), Arc::clone(worker)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::RecorderError;
    use crate::recording::RecordSink;
    use crate::traffic::types::Record;
    use crate::worker_management::types::{Runnable, ServerSpec};

    struct NullSink;

    impl RecordSink for NullSink {
        fn submit(&self, _record: Record) -> Result<(), RecorderError> {
            Ok(())
        }
    }

    async fn udp_worker() -> Arc<Worker> {
        let runnable = Runnable::Server(ServerSpec {
            protocol: Protocol::Udp,
            port: 0,
            bind_address: "127.0.0.1".parse().unwrap(),
        });
        Arc::new(Worker::spawn_task(runnable, Arc::new(NullSink)).await.unwrap())
    }

    #[tokio::test]
    async fn test_add_keeps_first_handle() {
        let registry = ServerRegistry::new();
        let key = ServerKey::new("root", 9000, Protocol::Udp);
        let first = udp_worker().await;
        let second = udp_worker().await;

        let registered = registry.add(key.clone(), Arc::clone(&first));
        assert!(Arc::ptr_eq(&registered, &first));
        let registered = registry.add(key.clone(), Arc::clone(&second));
        assert!(Arc::ptr_eq(&registered, &first));
        assert_eq!(registry.len(), 1);

        first.stop().await;
        second.stop().await;
    }

    #[tokio::test]
    async fn test_keys_in_namespace() {
        let registry = ServerRegistry::new();
        let worker = udp_worker().await;
        registry.add(ServerKey::new("red", 1, Protocol::Tcp), Arc::clone(&worker));
        registry.add(ServerKey::new("red", 1, Protocol::Udp), Arc::clone(&worker));
        registry.add(ServerKey::new("blue", 1, Protocol::Tcp), Arc::clone(&worker));

        assert_eq!(registry.keys_in("red").len(), 2);
        assert_eq!(registry.keys_in("green").len(), 0);
        assert!(registry.remove(&ServerKey::new("blue", 1, Protocol::Tcp)).is_some());
        assert!(registry.remove(&ServerKey::new("blue", 1, Protocol::Tcp)).is_none());
        assert_eq!(registry.get_all().len(), 2);
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_client_registry_one_per_namespace() {
        let registry = ClientRegistry::new();
        let first = udp_worker().await;
        let second = udp_worker().await;
        registry.add("red", Arc::clone(&first));
        let registered = registry.add("red", Arc::clone(&second));
        assert!(Arc::ptr_eq(&registered, &first));
        assert!(registry.get("blue").is_none());
        assert!(registry.remove("red").is_some());
        assert!(registry.is_empty());
        first.stop().await;
        second.stop().await;
    }
}
