use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::configuration::config::Config;
use crate::connected_state::{self, ClientEntry, ConnectedStateEntry, ConnectedStateStore, ServerEntry};
use crate::error_handling::types::TrafficError;
use crate::namespace::{NamespaceProvider, StaticTopology};
use crate::recording::{record_queue, Recorder, RecorderStats, RecordSink};
use crate::storage;
use crate::traffic::types::{Protocol, RuleState, TrafficRule};
use crate::traffic_management::{ClientManager, Scope, ServerManager};
use crate::worker_management::{ClientRegistry, ServerKey, ServerRegistry, Worker, WorkerLauncher};

/// Outcome of [`Agent::register_traffic`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterReport {
    pub registered: usize,
    /// Rules naming no endpoint served by this agent
    pub rejected: Vec<TrafficRule>,
}

/// Outcome of a bulk start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: usize,
    pub failed: Vec<String>,
}

struct ScopeManagers {
    servers: ServerManager,
    clients: ClientManager,
}

/// The traffic agent of one host
///
/// Control surface over the ConnectedState and the workers derived from it.
///
/// # Fields Overview
///
/// - `config`: the configuration the agent was built from
/// - `connected_state`: desired servers and clients per endpoint
/// - `provider`: which endpoints and namespaces this agent serves
/// - `server_registry`: live servers, shared by every scope
/// - `scopes`: one server and one client manager per namespace, or a single
///   root scope outside namespace mode
/// - `recorder`: the record pool, when the agent owns it
pub struct Agent {
    config: Config,
    connected_state: Arc<dyn ConnectedStateStore>,
    provider: Arc<dyn NamespaceProvider>,
    server_registry: Arc<ServerRegistry>,
    scopes: BTreeMap<String, ScopeManagers>,
    recorder: Option<Recorder>,
}

impl Agent {
    /// Builds an agent whose workers re-execute the running binary.
    pub fn new(
        config: Config,
        connected_state: Arc<dyn ConnectedStateStore>,
        provider: Arc<dyn NamespaceProvider>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, TrafficError> {
        let launcher = WorkerLauncher::current_exe(config.traffic.worker_ready_timeout())
            .map_err(TrafficError::WorkerSpawn)?;
        Self::with_launcher(config, connected_state, provider, sink, launcher)
    }

    pub fn with_launcher(
        config: Config,
        connected_state: Arc<dyn ConnectedStateStore>,
        provider: Arc<dyn NamespaceProvider>,
        sink: Arc<dyn RecordSink>,
        launcher: WorkerLauncher,
    ) -> Result<Self, TrafficError> {
        let server_registry = Arc::new(ServerRegistry::new());
        let client_registry = Arc::new(ClientRegistry::new());

        let scopes = if provider.namespace_mode() {
            let mut scopes = Vec::new();
            for name in provider.namespaces() {
                let path = provider.namespace_path(&name).ok_or_else(|| {
                    TrafficError::Configuration(format!("invalid namespace name {:?}", name))
                })?;
                scopes.push(Scope::namespace(name, path));
            }
            scopes
        } else {
            vec![Scope::Root]
        };

        let scopes = scopes
            .into_iter()
            .map(|scope| {
                let managers = ScopeManagers {
                    servers: ServerManager::new(
                        scope.clone(),
                        Arc::clone(&server_registry),
                        Arc::clone(&connected_state),
                        launcher.clone(),
                        Arc::clone(&sink),
                    ),
                    clients: ClientManager::new(
                        scope.clone(),
                        Arc::clone(&client_registry),
                        Arc::clone(&connected_state),
                        launcher.clone(),
                        Arc::clone(&sink),
                        config.traffic.clone(),
                    ),
                };
                (scope.name().to_string(), managers)
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            "Agent ready in {} mode with {} scopes",
            if provider.namespace_mode() { "namespace" } else { "root" },
            scopes.len()
        );
        Ok(Self {
            config,
            connected_state,
            provider,
            server_registry,
            scopes,
            recorder: None,
        })
    }

    /// Builds the stores, the record pipeline and the topology described by
    /// `config`. The returned agent owns its recorder.
    pub async fn from_config(config: Config) -> Result<Self, TrafficError> {
        config.validate()?;

        let connected_state = connected_state::from_settings(&config.connected_state).await?;
        let store = storage::from_settings(&config.recorder)?;
        let (queue, receiver) = record_queue(config.recorder.queue_capacity);
        let recorder = Recorder::start(
            receiver,
            store,
            config.recorder.workers,
            config.recorder.poll_interval(),
        );
        let provider = Arc::new(StaticTopology::from_config(&config));

        let mut agent = Self::new(config, connected_state, provider, Arc::new(queue))?;
        agent.recorder = Some(recorder);
        Ok(agent)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recorder_stats(&self) -> Option<RecorderStats> {
        self.recorder.as_ref().map(Recorder::stats)
    }

    /// Scopes addressed by `namespace`, each with its endpoint if known.
    fn resolve(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<(&ScopeManagers, Option<IpAddr>)>, TrafficError> {
        if !self.provider.namespace_mode() {
            if let Some(ns) = namespace {
                return Err(TrafficError::Configuration(format!(
                    "namespace {} given but the agent runs in root mode",
                    ns
                )));
            }
            return Ok(self
                .scopes
                .values()
                .map(|managers| (managers, self.provider.root_endpoint()))
                .collect());
        }

        match namespace {
            Some(ns) => {
                let managers = self
                    .scopes
                    .get(ns)
                    .ok_or_else(|| TrafficError::UnknownNamespace(ns.to_string()))?;
                Ok(vec![(managers, self.provider.endpoint_of(ns))])
            }
            None => Ok(self
                .scopes
                .iter()
                .map(|(name, managers)| (managers, self.provider.endpoint_of(name)))
                .collect()),
        }
    }

    /// Starts a `protocol` server on `port` and records it in the
    /// ConnectedState.
    ///
    /// In root mode `endpoint` must be the agent's endpoint. In namespace mode
    /// the server binds to the endpoint of `namespace`, or of every namespace
    /// for `None`.
    pub async fn add_server(
        &self,
        protocol: Protocol,
        port: u16,
        endpoint: IpAddr,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<Worker>>, TrafficError> {
        info!("Add {} server on port {}", protocol, port);
        let scopes = self.resolve(namespace)?;
        let mut workers = Vec::with_capacity(scopes.len());

        if !self.provider.namespace_mode() {
            if !self.provider.is_local(endpoint) {
                return Err(TrafficError::Configuration(format!(
                    "{} is not an endpoint of this agent",
                    endpoint
                )));
            }
            for (managers, _) in scopes {
                workers.push(managers.servers.start_server(protocol, port, endpoint).await?);
            }
            return Ok(workers);
        }

        for (managers, ns_endpoint) in scopes {
            let scope = managers.servers.scope();
            let Some(bind_address) = ns_endpoint else {
                if namespace.is_some() {
                    return Err(TrafficError::MissingEndpoint(scope.name().to_string()));
                }
                warn!("Skipping {}: no endpoint known", scope);
                continue;
            };
            workers.push(managers.servers.start_server(protocol, port, bind_address).await?);
        }
        Ok(workers)
    }

    /// Records the servers and clients implied by `rules` in the
    /// ConnectedState.
    ///
    /// A rule registers a server on its destination and a client on its
    /// source, for whichever of the two this agent serves. Rules naming
    /// neither are rejected; inactive rules are skipped.
    pub async fn register_traffic(&self, rules: &[TrafficRule]) -> Result<RegisterReport, TrafficError> {
        info!("Register traffic called with {} rules", rules.len());
        let mut report = RegisterReport::default();

        for rule in rules {
            if rule.state == RuleState::Inactive {
                debug!("Skipping inactive rule {} -> {}:{}", rule.src, rule.dst, rule.port);
                continue;
            }
            let src_local = self.provider.is_local(rule.src);
            let dst_local = self.provider.is_local(rule.dst);
            if !src_local && !dst_local {
                warn!(
                    "Rejecting rule {} -> {} {}:{}: no local endpoint",
                    rule.src, rule.dst, rule.protocol, rule.port
                );
                report.rejected.push(rule.clone());
                continue;
            }

            if dst_local {
                let server = ServerEntry {
                    protocol: rule.protocol,
                    port: rule.port,
                };
                self.connected_state
                    .create_or_update(rule.dst, &[server], &[])
                    .await?;
            }
            if src_local {
                let client = ClientEntry {
                    protocol: rule.protocol,
                    port: rule.port,
                    destination: rule.dst,
                    connected: rule.connected,
                    action: rule.action,
                };
                self.connected_state
                    .create_or_update(rule.src, &[], &[client])
                    .await?;
            }
            report.registered += 1;
        }

        info!(
            "Registered {} rules, rejected {}",
            report.registered,
            report.rejected.len()
        );
        Ok(report)
    }

    /// Forgets the ConnectedState of `endpoint`, or of every endpoint.
    /// Running workers are left alone.
    pub async fn unregister_traffic(&self, endpoint: Option<IpAddr>) -> Result<usize, TrafficError> {
        let removed = self.connected_state.delete(endpoint).await?;
        info!("Unregistered traffic of {} endpoints", removed);
        Ok(removed)
    }

    pub async fn get_traffic_config(
        &self,
        endpoint: Option<IpAddr>,
    ) -> Result<Vec<ConnectedStateEntry>, TrafficError> {
        match endpoint {
            Some(endpoint) => Ok(self
                .connected_state
                .get(endpoint)
                .await?
                .into_iter()
                .collect()),
            None => Ok(self.connected_state.list().await?),
        }
    }

    /// Starts the servers the ConnectedState lists for each addressed scope.
    pub async fn start_servers(&self, namespace: Option<&str>) -> Result<StartReport, TrafficError> {
        info!("Start servers called");
        let mut report = StartReport::default();
        for (managers, endpoint) in self.resolve(namespace)? {
            let scope = managers.servers.scope();
            let Some(endpoint) = endpoint else {
                warn!("Servers of {} not started: no endpoint known", scope);
                continue;
            };
            let servers = self.connected_state.get_servers(endpoint).await?;
            if servers.is_empty() {
                debug!("No servers registered for {} in {}", endpoint, scope);
                continue;
            }
            for server in servers {
                match managers
                    .servers
                    .start_server(server.protocol, server.port, endpoint)
                    .await
                {
                    Ok(_) => report.started += 1,
                    Err(e) => report
                        .failed
                        .push(format!("{} {}:{} in {}: {}", server.protocol, endpoint, server.port, scope, e)),
                }
            }
        }
        Ok(report)
    }

    pub async fn stop_servers(&self, namespace: Option<&str>) -> Result<usize, TrafficError> {
        info!("Stop servers called");
        let mut stopped = 0;
        for (managers, _) in self.resolve(namespace)? {
            stopped += managers.servers.stop_all_servers().await;
        }
        Ok(stopped)
    }

    /// Stops the `(protocol, port)` server of each addressed scope. Returns
    /// whether any was running.
    pub async fn stop_server(
        &self,
        protocol: Protocol,
        port: u16,
        namespace: Option<&str>,
    ) -> Result<bool, TrafficError> {
        info!("Stop {} server on port {} called", protocol, port);
        let mut stopped = false;
        for (managers, _) in self.resolve(namespace)? {
            stopped |= managers.servers.stop_server(protocol, port).await?;
        }
        Ok(stopped)
    }

    /// Starts the client of each addressed scope that has destinations.
    pub async fn start_clients(&self, namespace: Option<&str>) -> Result<StartReport, TrafficError> {
        info!("Start clients called");
        let mut report = StartReport::default();
        for (managers, endpoint) in self.resolve(namespace)? {
            let scope = managers.clients.scope();
            let Some(endpoint) = endpoint else {
                warn!("Client of {} not started: no endpoint known", scope);
                continue;
            };
            match managers.clients.start_clients(endpoint).await {
                Ok(Some(_)) => report.started += 1,
                Ok(None) => {}
                Err(e) => report.failed.push(format!("client of {} in {}: {}", endpoint, scope, e)),
            }
        }
        Ok(report)
    }

    /// Stops the clients of the addressed scopes, every client for `None`.
    pub async fn stop_clients(&self, namespace: Option<&str>) -> Result<usize, TrafficError> {
        info!("Stop clients called");
        let scopes = self.resolve(namespace)?;
        if namespace.is_none() {
            if let Some((managers, _)) = scopes.first() {
                return Ok(managers.clients.stop_clients().await);
            }
            return Ok(0);
        }
        let mut stopped = 0;
        for (managers, _) in scopes {
            if managers.clients.stop_client().await {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    pub async fn stop_client(&self, namespace: Option<&str>) -> Result<bool, TrafficError> {
        let mut stopped = false;
        for (managers, _) in self.resolve(namespace)? {
            stopped |= managers.clients.stop_client().await;
        }
        Ok(stopped)
    }

    pub fn list_servers(&self) -> Vec<ServerKey> {
        self.server_registry
            .get_all()
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Live `(protocol, port)` servers across every scope.
    pub fn get_server(&self, protocol: Protocol, port: u16) -> Vec<Arc<Worker>> {
        self.scopes
            .values()
            .filter_map(|managers| managers.servers.get_server(protocol, port))
            .collect()
    }

    pub fn get_client(&self, namespace: Option<&str>) -> Result<Option<Arc<Worker>>, TrafficError> {
        Ok(self
            .resolve(namespace)?
            .into_iter()
            .find_map(|(managers, _)| managers.clients.get_client()))
    }

    /// Stops every worker, then the recorder after it persisted what is
    /// already queued.
    ///
    /// Joining the recorder threads runs on the blocking pool.
    pub async fn shutdown(&mut self) {
        info!("Shutting down the agent");
        for managers in self.scopes.values() {
            managers.clients.stop_client().await;
            managers.servers.stop_all_servers().await;
        }
        if let Some(mut recorder) = self.recorder.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || recorder.stop()).await {
                warn!("Recorder did not stop cleanly: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connected_state::MemoryConnectedState;
    use crate::error_handling::types::StorageError;
    use crate::recording::queue::tests::sample_record;
    use crate::storage::RecordStore;
    use crate::traffic::types::{Action, Record};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn rule(src: &str, dst: &str, port: u16) -> TrafficRule {
        TrafficRule {
            src: ip(src),
            dst: ip(dst),
            protocol: Protocol::Tcp,
            port,
            connected: true,
            action: Action::Allow,
            state: RuleState::Active,
        }
    }

    fn root_agent(endpoint: &str) -> (Agent, Arc<MemoryConnectedState>) {
        let config = Config::parse(&format!("endpoint = \"{}\"", endpoint)).unwrap();
        let state = Arc::new(MemoryConnectedState::new());
        let provider = Arc::new(StaticTopology::from_config(&config));
        let (queue, _receiver) = record_queue(16);
        let agent = Agent::with_launcher(
            config,
            state.clone(),
            provider,
            Arc::new(queue),
            WorkerLauncher::new("pulse", Duration::from_secs(1)),
        )
        .unwrap();
        (agent, state)
    }

    fn namespaced_agent() -> Agent {
        let mut namespaces = BTreeMap::new();
        namespaces.insert("red".to_string(), ip("10.1.0.1"));
        namespaces.insert("blue".to_string(), ip("10.1.0.2"));
        let provider = Arc::new(StaticTopology::namespaced("/var/run/netns", namespaces));
        let (queue, _receiver) = record_queue(16);
        Agent::with_launcher(
            Config::default(),
            Arc::new(MemoryConnectedState::new()),
            provider,
            Arc::new(queue),
            WorkerLauncher::new("pulse", Duration::from_secs(1)),
        )
        .unwrap()
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_register_traffic_splits_rules() {
        let (agent, state) = root_agent("10.0.0.1");
        let mut inactive = rule("10.0.0.1", "10.0.0.9", 22);
        inactive.state = RuleState::Inactive;
        let rules = vec![
            rule("10.0.0.1", "10.0.0.2", 9000),
            rule("10.0.0.3", "10.0.0.1", 53),
            rule("10.0.0.3", "10.0.0.4", 80),
            rule("10.0.0.1", "10.0.0.2", 9000),
            inactive,
        ];

        let report = assert_ok!(agent.register_traffic(&rules).await);
        assert_eq!(report.registered, 3);
        assert_eq!(report.rejected, vec![rule("10.0.0.3", "10.0.0.4", 80)]);

        let local = ip("10.0.0.1");
        assert_eq!(
            state.get_servers(local).await.unwrap(),
            vec![ServerEntry { protocol: Protocol::Tcp, port: 53 }]
        );
        let clients = state.get_clients(local).await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].destination, ip("10.0.0.2"));
        assert!(state.get(ip("10.0.0.3")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespace_rejected_in_root_mode() {
        let (agent, _state) = root_agent("127.0.0.1");
        assert!(matches!(
            agent.start_servers(Some("red")).await,
            Err(TrafficError::Configuration(_))
        ));
        assert!(matches!(
            agent.stop_client(Some("red")).await,
            Err(TrafficError::Configuration(_))
        ));
        assert!(matches!(
            agent.add_server(Protocol::Tcp, 9000, ip("127.0.0.1"), Some("red")).await,
            Err(TrafficError::Configuration(_))
        ));
        assert!(agent.list_servers().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let agent = namespaced_agent();
        let err = assert_err!(agent.start_clients(Some("green")).await);
        assert!(matches!(err, TrafficError::UnknownNamespace(_)));
        // Nothing registered: no worker is started in any namespace
        let report = agent.start_servers(None).await.unwrap();
        assert_eq!(report, StartReport::default());
    }

    #[tokio::test]
    async fn test_add_server_then_get_and_stop() {
        let (agent, state) = root_agent("127.0.0.1");
        let port = free_port().await;

        let added = agent
            .add_server(Protocol::Tcp, port, ip("127.0.0.1"), None)
            .await
            .unwrap();
        let found = agent.get_server(Protocol::Tcp, port);
        assert_eq!(found.len(), 1);
        assert!(Arc::ptr_eq(&added[0], &found[0]));
        assert_eq!(agent.list_servers().len(), 1);
        assert_eq!(state.get_servers(ip("127.0.0.1")).await.unwrap().len(), 1);

        assert!(agent.stop_server(Protocol::Tcp, port, None).await.unwrap());
        assert!(agent.get_server(Protocol::Tcp, port).is_empty());
        assert!(!agent.stop_server(Protocol::Tcp, port, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_server_rejects_foreign_endpoint() {
        let (agent, _state) = root_agent("127.0.0.1");
        let result = agent.add_server(Protocol::Udp, 9000, ip("10.9.9.9"), None).await;
        assert!(matches!(result, Err(TrafficError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_from_connected_state_and_shutdown() {
        let (mut agent, _state) = root_agent("127.0.0.1");
        let port = free_port().await;
        agent
            .register_traffic(&[rule("127.0.0.1", "127.0.0.1", port)])
            .await
            .unwrap();

        let servers = agent.start_servers(None).await.unwrap();
        assert_eq!(servers.started, 1);
        assert!(servers.failed.is_empty());
        let clients = agent.start_clients(None).await.unwrap();
        assert_eq!(clients.started, 1);
        assert!(agent.get_client(None).unwrap().is_some());

        agent.shutdown().await;
        assert!(agent.list_servers().is_empty());
        assert!(agent.get_client(None).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_traffic_config_round_trip() {
        let (agent, _state) = root_agent("10.0.0.1");
        agent
            .register_traffic(&[rule("10.0.0.1", "10.0.0.2", 9000)])
            .await
            .unwrap();

        let all = agent.get_traffic_config(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].endpoint, ip("10.0.0.1"));
        assert!(agent.get_traffic_config(Some(ip("10.0.0.2"))).await.unwrap().is_empty());

        assert_eq!(agent.unregister_traffic(None).await.unwrap(), 1);
        assert!(agent.get_traffic_config(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_owns_recorder() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::parse(&format!(
            "endpoint = \"127.0.0.1\"\n[recorder]\nbackends = [\"file\"]\npath = \"{0}\"\n\
             [connected_state]\npath = \"{0}/connected_state.sqlite3\"\n",
            dir.path().display()
        ))
        .unwrap();
        let mut agent = Agent::from_config(config).await.unwrap();
        assert_eq!(agent.recorder_stats(), Some(RecorderStats::default()));
        agent.shutdown().await;
        assert!(agent.recorder_stats().is_none());
    }

    struct SlowStore;

    impl RecordStore for SlowStore {
        fn persist(&self, _record: &Record) -> Result<(), StorageError> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_shutdown_keeps_runtime_responsive_while_draining() {
        let (mut agent, _state) = root_agent("127.0.0.1");
        let (queue, receiver) = record_queue(16);
        for port in 0..5 {
            queue.push(sample_record(port)).unwrap();
        }
        agent.recorder = Some(Recorder::start(
            receiver,
            Arc::new(SlowStore),
            1,
            Duration::from_millis(10),
        ));

        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        agent.shutdown().await;
        assert!(agent.recorder_stats().is_none());
        assert!(
            ticks.load(Ordering::Relaxed) > 0,
            "runtime stalled while the recorder drained"
        );
        ticker.abort();
    }
}
