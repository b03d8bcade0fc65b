use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::spawn_in_scope;
use super::types::Scope;
use crate::connected_state::{ConnectedStateStore, ServerEntry};
use crate::error_handling::types::TrafficError;
use crate::recording::RecordSink;
use crate::traffic::types::Protocol;
use crate::worker_management::{Runnable, ServerKey, ServerRegistry, ServerSpec, Worker, WorkerLauncher};

/// Starts and stops the echo servers of one scope.
pub struct ServerManager {
    scope: Scope,
    registry: Arc<ServerRegistry>,
    connected_state: Arc<dyn ConnectedStateStore>,
    launcher: WorkerLauncher,
    sink: Arc<dyn RecordSink>,
    // Serialises starts so that a key is never bound twice
    start_lock: Mutex<()>,
}

impl ServerManager {
    pub fn new(
        scope: Scope,
        registry: Arc<ServerRegistry>,
        connected_state: Arc<dyn ConnectedStateStore>,
        launcher: WorkerLauncher,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            scope,
            registry,
            connected_state,
            launcher,
            sink,
            start_lock: Mutex::new(()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn key(&self, protocol: Protocol, port: u16) -> ServerKey {
        ServerKey::new(self.scope.name(), port, protocol)
    }

    /// Starts a `protocol` echo server on `bind_address:port`.
    ///
    /// A running server for the same key is returned as is. After a
    /// successful start `(protocol, port)` is recorded in the ConnectedState
    /// of `bind_address`; a failure to record it is logged only.
    pub async fn start_server(
        &self,
        protocol: Protocol,
        port: u16,
        bind_address: IpAddr,
    ) -> Result<Arc<Worker>, TrafficError> {
        let _guard = self.start_lock.lock().await;
        let key = self.key(protocol, port);

        if let Some(existing) = self.registry.get(&key) {
            if existing.is_running().await {
                debug!("Server {} already running as worker {}", key, existing.id());
                return Ok(existing);
            }
            warn!("Server {} worker {} is dead, restarting", key, existing.id());
            self.registry.remove(&key);
        }

        let runnable = Runnable::Server(ServerSpec {
            protocol,
            port,
            bind_address,
        });
        let worker = spawn_in_scope(&self.scope, &self.launcher, runnable, Arc::clone(&self.sink))
            .await
            .map_err(|e| {
                error!("Failed to start server {} in {}: {}", key, self.scope, e);
                e
            })?;
        let worker = self.registry.add(key.clone(), Arc::new(worker));

        let entry = ServerEntry { protocol, port };
        if let Err(e) = self
            .connected_state
            .create_or_update(bind_address, &[entry], &[])
            .await
        {
            error!(
                "Server {} started but could not be recorded for {}: {}",
                key, bind_address, e
            );
        }

        info!("Server {} listening on {}:{}", key, bind_address, port);
        Ok(worker)
    }

    /// Stops the server of `(protocol, port)`. `Ok(false)` when there was
    /// none.
    pub async fn stop_server(&self, protocol: Protocol, port: u16) -> Result<bool, TrafficError> {
        let key = self.key(protocol, port);
        match self.registry.remove(&key) {
            Some(worker) => {
                worker.stop().await;
                info!("Server {} stopped", key);
                Ok(true)
            }
            None => {
                warn!("No server {} to stop", key);
                Ok(false)
            }
        }
    }

    /// Stops every server of the scope and returns how many were stopped.
    pub async fn stop_all_servers(&self) -> usize {
        let mut stopped = 0;
        for key in self.registry.keys_in(self.scope.name()) {
            if let Some(worker) = self.registry.remove(&key) {
                worker.stop().await;
                stopped += 1;
            }
        }
        info!("Stopped {} servers in {}", stopped, self.scope);
        stopped
    }

    pub fn list_servers(&self) -> Vec<ServerKey> {
        self.registry.keys_in(self.scope.name())
    }

    pub fn get_server(&self, protocol: Protocol, port: u16) -> Option<Arc<Worker>> {
        self.registry.get(&self.key(protocol, port))
    }
}
