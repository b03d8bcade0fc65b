use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error_handling::types::StorageError;

use super::state_store::{ConnectedStateStore, StoreFuture};
use super::types::{ClientEntry, ConnectedStateEntry, ServerEntry};

/// In-process ConnectedState, lost on exit.
#[derive(Default)]
pub struct MemoryConnectedState {
    entries: Mutex<BTreeMap<IpAddr, ConnectedStateEntry>>,
}

impl MemoryConnectedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<IpAddr, ConnectedStateEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectedStateStore for MemoryConnectedState {
    fn create_or_update<'a>(
        &'a self,
        endpoint: IpAddr,
        servers: &'a [ServerEntry],
        clients: &'a [ClientEntry],
    ) -> StoreFuture<'a, ()> {
        self.entries()
            .entry(endpoint)
            .or_insert_with(|| ConnectedStateEntry::new(endpoint))
            .merge(servers, clients);
        Box::pin(std::future::ready(Ok::<_, StorageError>(())))
    }

    fn get(&self, endpoint: IpAddr) -> StoreFuture<'_, Option<ConnectedStateEntry>> {
        let entry = self.entries().get(&endpoint).cloned();
        Box::pin(std::future::ready(Ok::<_, StorageError>(entry)))
    }

    fn list(&self) -> StoreFuture<'_, Vec<ConnectedStateEntry>> {
        let entries = self.entries().values().cloned().collect();
        Box::pin(std::future::ready(Ok::<_, StorageError>(entries)))
    }

    fn delete(&self, endpoint: Option<IpAddr>) -> StoreFuture<'_, usize> {
        let mut entries = self.entries();
        let removed = match endpoint {
            Some(endpoint) => usize::from(entries.remove(&endpoint).is_some()),
            None => {
                let count = entries.len();
                entries.clear();
                count
            }
        };
        Box::pin(std::future::ready(Ok::<_, StorageError>(removed)))
    }
}
