//! ConnectedState Store Trait
//!
//! Async and object safe: every method returns a boxed `Send` future so the
//! store can be shared as `Arc<dyn ConnectedStateStore>` across tasks.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use super::types::{ClientEntry, ConnectedStateEntry, ServerEntry};
use crate::error_handling::types::StorageError;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

pub trait ConnectedStateStore: Send + Sync {
    /// Union-merges `servers` and `clients` into the entry of `endpoint`,
    /// creating it if needed. Atomic per call.
    fn create_or_update<'a>(
        &'a self,
        endpoint: IpAddr,
        servers: &'a [ServerEntry],
        clients: &'a [ClientEntry],
    ) -> StoreFuture<'a, ()>;

    fn get(&self, endpoint: IpAddr) -> StoreFuture<'_, Option<ConnectedStateEntry>>;

    fn list(&self) -> StoreFuture<'_, Vec<ConnectedStateEntry>>;

    /// Deletes one entry, or every entry for `None`. Returns how many went.
    fn delete(&self, endpoint: Option<IpAddr>) -> StoreFuture<'_, usize>;

    /// Servers of `endpoint`; empty for an unknown endpoint.
    fn get_servers(&self, endpoint: IpAddr) -> StoreFuture<'_, Vec<ServerEntry>> {
        Box::pin(async move {
            let entry = self.get(endpoint).await?;
            Ok::<_, StorageError>(entry.map(|e| e.servers).unwrap_or_default())
        })
    }

    /// Clients of `endpoint`; empty for an unknown endpoint.
    fn get_clients(&self, endpoint: IpAddr) -> StoreFuture<'_, Vec<ClientEntry>> {
        Box::pin(async move {
            let entry = self.get(endpoint).await?;
            Ok::<_, StorageError>(entry.map(|e| e.clients).unwrap_or_default())
        })
    }
}
