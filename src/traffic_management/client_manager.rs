use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::spawn_in_scope;
use super::types::Scope;
use crate::configuration::types::TrafficSettings;
use crate::connected_state::ConnectedStateStore;
use crate::error_handling::types::TrafficError;
use crate::recording::RecordSink;
use crate::traffic::types::Destination;
use crate::worker_management::{ClientRegistry, ClientSpec, Runnable, Worker, WorkerLauncher};

/// Runs the single traffic client of one scope.
pub struct ClientManager {
    scope: Scope,
    registry: Arc<ClientRegistry>,
    connected_state: Arc<dyn ConnectedStateStore>,
    launcher: WorkerLauncher,
    sink: Arc<dyn RecordSink>,
    settings: TrafficSettings,
    start_lock: Mutex<()>,
}

impl ClientManager {
    pub fn new(
        scope: Scope,
        registry: Arc<ClientRegistry>,
        connected_state: Arc<dyn ConnectedStateStore>,
        launcher: WorkerLauncher,
        sink: Arc<dyn RecordSink>,
        settings: TrafficSettings,
    ) -> Self {
        Self {
            scope,
            registry,
            connected_state,
            launcher,
            sink,
            settings,
            start_lock: Mutex::new(()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Starts a client pinging every destination registered for `endpoint`.
    ///
    /// Returns `Ok(None)` when `endpoint` has nothing to ping. A client
    /// already running in the scope is returned unchanged.
    pub async fn start_clients(&self, endpoint: IpAddr) -> Result<Option<Arc<Worker>>, TrafficError> {
        let _guard = self.start_lock.lock().await;

        if let Some(existing) = self.registry.get(self.scope.name()) {
            if existing.is_running().await {
                debug!("Client of {} already running as worker {}", self.scope, existing.id());
                return Ok(Some(existing));
            }
            warn!("Client of {} worker {} is dead, restarting", self.scope, existing.id());
            self.registry.remove(self.scope.name());
        }

        let clients = self.connected_state.get_clients(endpoint).await?;
        if clients.is_empty() {
            info!("No destinations registered for {}, no client started", endpoint);
            return Ok(None);
        }

        let destinations: Vec<Destination> = clients.iter().map(Destination::from).collect();
        let runnable = Runnable::Client(ClientSpec {
            source: endpoint,
            destinations,
            settings: self.settings.clone(),
        });
        let worker = spawn_in_scope(&self.scope, &self.launcher, runnable, Arc::clone(&self.sink))
            .await
            .map_err(|e| {
                error!("Failed to start client of {} in {}: {}", endpoint, self.scope, e);
                e
            })?;
        let worker = self.registry.add(self.scope.name(), Arc::new(worker));
        info!(
            "Client of {} started with {} destinations",
            endpoint,
            clients.len()
        );
        Ok(Some(worker))
    }

    /// Stops the client of this scope. Returns `false` when none ran.
    pub async fn stop_client(&self) -> bool {
        match self.registry.remove(self.scope.name()) {
            Some(worker) => {
                worker.stop().await;
                info!("Client of {} stopped", self.scope);
                true
            }
            None => {
                debug!("No client running in {}", self.scope);
                false
            }
        }
    }

    /// Stops every client in the shared registry and returns how many were
    /// stopped.
    pub async fn stop_clients(&self) -> usize {
        let mut stopped = 0;
        for (namespace, _) in self.registry.get_all() {
            if let Some(worker) = self.registry.remove(&namespace) {
                worker.stop().await;
                stopped += 1;
            }
        }
        info!("Stopped {} clients", stopped);
        stopped
    }

    pub fn get_client(&self) -> Option<Arc<Worker>> {
        self.registry.get(self.scope.name())
    }
}
