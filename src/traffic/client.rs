//! # Traffic client
//!
//! A [`TrafficClient`] cycles through its destination list and pings a
//! window of `min(request_rate, destinations)` destinations per cycle. Each
//! ping produces one [`Record`] that carries the policy verdict computed by
//! [`evaluate`] and is handed to a [`RecordSink`].
//!
//! The window position persists across cycles: with three destinations and
//! a rate of two, the first cycle pings `d0, d1`, the next `d2, d0`, and so
//! on.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::stopped;
use super::types::{Action, Destination, Protocol, Record, PACKET_SIZE, PING_PAYLOAD};
use crate::configuration::types::TrafficSettings;
use crate::error_handling::types::PingError;
use crate::recording::RecordSink;

/// Folds the raw outcome of a ping into the policy verdict.
///
/// * not connected: success means the ping failed
/// * connected: success means the outcome matches the action
pub fn evaluate(observed: bool, connected: bool, action: Action) -> bool {
    if !connected {
        !observed
    } else {
        observed == action.allows()
    }
}

pub struct TrafficClient {
    source: IpAddr,
    destinations: Vec<Destination>,
    rate: usize,
    cursor: usize,
    cycle_interval: Duration,
    ping_timeout: Duration,
    sink: Arc<dyn RecordSink>,
}

impl TrafficClient {
    pub fn new(
        source: IpAddr,
        destinations: Vec<Destination>,
        settings: &TrafficSettings,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let rate = settings.request_rate.min(destinations.len());
        Self {
            source,
            destinations,
            rate,
            cursor: 0,
            cycle_interval: settings.cycle_interval(),
            ping_timeout: settings.ping_timeout(),
            sink,
        }
    }

    pub fn source(&self) -> IpAddr {
        self.source
    }

    /// Next window of destinations, advancing the cursor.
    pub fn next_batch(&mut self) -> Vec<Destination> {
        let len = self.destinations.len();
        if len == 0 {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(self.rate);
        for _ in 0..self.rate {
            batch.push(self.destinations[self.cursor].clone());
            self.cursor = (self.cursor + 1) % len;
        }
        batch
    }

    /// Runs one cycle: pings the next window concurrently and submits every
    /// record. Returns the number of records produced.
    pub async fn send_traffic(&mut self) -> usize {
        let batch = self.next_batch();
        let mut pings = JoinSet::new();
        for destination in batch {
            let source = self.source;
            let timeout = self.ping_timeout;
            pings.spawn(async move { ping(source, &destination, timeout).await });
        }

        let mut produced = 0;
        while let Some(joined) = pings.join_next().await {
            match joined {
                Ok(record) => {
                    produced += 1;
                    if let Err(e) = self.sink.submit(record) {
                        debug!("Record from {} not accepted: {}", self.source, e);
                    }
                }
                Err(e) => error!("Ping task failed: {}", e),
            }
        }
        produced
    }

    /// Repeats [`send_traffic`](Self::send_traffic) every cycle interval
    /// until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Traffic client {} started with {} destinations (rate {})",
            self.source,
            self.destinations.len(),
            self.rate
        );
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                produced = self.send_traffic() => trace!("Cycle produced {} records", produced),
            }
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(self.cycle_interval) => {}
            }
        }
        info!("Traffic client {} stopped", self.source);
    }
}

/// Pings one destination and builds its record. Never fails: network errors
/// become a failed observation.
pub async fn ping(source: IpAddr, destination: &Destination, timeout: Duration) -> Record {
    let addr = SocketAddr::new(destination.address, destination.port);
    let started = Instant::now();
    let outcome = match destination.protocol {
        Protocol::Tcp => ping_tcp(addr, timeout).await,
        Protocol::Udp => ping_udp(addr, timeout).await,
    };
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (observed, error) = match outcome {
        Ok(()) => (true, None),
        Err(e) => {
            trace!("{} ping {} -> {} failed: {}", destination.protocol, source, addr, e);
            (false, Some(e.to_string()))
        }
    };

    Record {
        id: Uuid::new_v4(),
        src: source,
        dst: destination.address,
        port: destination.port,
        protocol: destination.protocol,
        latency_ms,
        error,
        success: evaluate(observed, destination.connected, destination.action),
        connected: destination.connected,
        created_time: Utc::now(),
    }
}

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T, PingError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(PingError::from),
        Err(_) => Err(PingError::Timeout(operation)),
    }
}

async fn ping_tcp(addr: SocketAddr, limit: Duration) -> Result<(), PingError> {
    let mut stream = bounded("connect", limit, TcpStream::connect(addr)).await?;
    bounded("send", limit, stream.write_all(PING_PAYLOAD)).await?;
    let mut buf = [0u8; PACKET_SIZE];
    // An orderly close without data still proves the server answered
    bounded("receive", limit, stream.read(&mut buf)).await?;
    Ok(())
}

async fn ping_udp(addr: SocketAddr, limit: Duration) -> Result<(), PingError> {
    let unspecified = if addr.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    let local = SocketAddr::new(unspecified, 0);
    let socket = UdpSocket::bind(local).await?;
    bounded("send", limit, socket.send_to(PING_PAYLOAD, addr)).await?;
    let mut buf = [0u8; PACKET_SIZE];
    bounded("receive", limit, socket.recv_from(&mut buf)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::RecorderError;
    use crate::traffic::server::TrafficServer;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<Record>>,
    }

    impl RecordSink for CollectingSink {
        fn submit(&self, record: Record) -> Result<(), RecorderError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn destination(port: u16, connected: bool, action: Action) -> Destination {
        Destination {
            protocol: Protocol::Tcp,
            port,
            address: "127.0.0.1".parse().unwrap(),
            connected,
            action,
        }
    }

    fn settings(rate: usize) -> TrafficSettings {
        TrafficSettings {
            request_rate: rate,
            cycle_interval_secs: 1,
            ping_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Binds then immediately releases a port so nothing listens on it.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn echo(protocol: Protocol) -> (u16, watch::Sender<bool>) {
        let server = TrafficServer::bind(protocol, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.serve(rx));
        (port, tx)
    }

    #[test]
    fn test_verdict_table() {
        // unreachable pairs succeed only when nothing answers
        assert!(evaluate(false, false, Action::Allow));
        assert!(evaluate(false, false, Action::Reject));
        assert!(!evaluate(true, false, Action::Allow));
        assert!(!evaluate(true, false, Action::Reject));
        // reachable pairs succeed when the outcome matches the action
        assert!(evaluate(true, true, Action::Allow));
        assert!(!evaluate(false, true, Action::Allow));
        assert!(evaluate(false, true, Action::Reject));
        assert!(!evaluate(true, true, Action::Reject));
    }

    #[test]
    fn test_batches_continue_where_previous_cycle_stopped() {
        let sink = Arc::new(CollectingSink::default());
        let dests: Vec<Destination> = (1..=3).map(|p| destination(p, true, Action::Allow)).collect();
        let mut client = TrafficClient::new("127.0.0.1".parse().unwrap(), dests, &settings(2), sink);

        let ports = |batch: Vec<Destination>| batch.iter().map(|d| d.port).collect::<Vec<_>>();
        assert_eq!(ports(client.next_batch()), vec![1, 2]);
        assert_eq!(ports(client.next_batch()), vec![3, 1]);
        assert_eq!(ports(client.next_batch()), vec![2, 3]);
    }

    #[test]
    fn test_rate_is_capped_by_destination_count() {
        let sink = Arc::new(CollectingSink::default());
        let dests = vec![destination(1, true, Action::Allow)];
        let mut client = TrafficClient::new("127.0.0.1".parse().unwrap(), dests, &settings(100), sink);
        assert_eq!(client.next_batch().len(), 1);

        let mut empty = TrafficClient::new(
            "127.0.0.1".parse().unwrap(),
            Vec::new(),
            &settings(100),
            Arc::new(CollectingSink::default()),
        );
        assert!(empty.next_batch().is_empty());
    }

    #[tokio::test]
    async fn test_tcp_ping_against_echo_server() {
        let (port, _stop) = echo(Protocol::Tcp).await;
        let record = ping(
            "127.0.0.1".parse().unwrap(),
            &destination(port, true, Action::Allow),
            Duration::from_secs(2),
        )
        .await;
        assert!(record.success);
        assert!(record.error.is_none());
        assert!(record.connected);
        assert_eq!(record.port, port);
        assert!(record.latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_udp_ping_against_echo_server() {
        let (port, _stop) = echo(Protocol::Udp).await;
        let mut dest = destination(port, true, Action::Allow);
        dest.protocol = Protocol::Udp;
        let record = ping("127.0.0.1".parse().unwrap(), &dest, Duration::from_secs(2)).await;
        assert!(record.success);
        assert_eq!(record.protocol, Protocol::Udp);
    }

    #[tokio::test]
    async fn test_refused_ping_is_judged_against_action() {
        let port = closed_port().await;
        let source = "127.0.0.1".parse().unwrap();
        let timeout = Duration::from_millis(500);

        let allowed = ping(source, &destination(port, true, Action::Allow), timeout).await;
        assert!(!allowed.success);
        assert!(allowed.error.is_some());

        let rejected = ping(source, &destination(port, true, Action::Reject), timeout).await;
        assert!(rejected.success);

        let unreachable = ping(source, &destination(port, false, Action::Allow), timeout).await;
        assert!(unreachable.success);
        assert!(!unreachable.connected);
    }

    #[tokio::test]
    async fn test_send_traffic_submits_one_record_per_ping() {
        let (port, _stop) = echo(Protocol::Tcp).await;
        let sink = Arc::new(CollectingSink::default());
        let dests = vec![
            destination(port, true, Action::Allow),
            destination(port, true, Action::Reject),
            destination(port, false, Action::Allow),
        ];
        let mut client = TrafficClient::new(
            "127.0.0.1".parse().unwrap(),
            dests,
            &settings(100),
            sink.clone(),
        );

        assert_eq!(client.send_traffic().await, 3);
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().filter(|r| r.success).count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (port, _stop) = echo(Protocol::Tcp).await;
        let sink = Arc::new(CollectingSink::default());
        let client = TrafficClient::new(
            "127.0.0.1".parse().unwrap(),
            vec![destination(port, true, Action::Allow)],
            &settings(1),
            sink.clone(),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(client.run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("client did not stop")
            .unwrap();
        assert!(!sink.records.lock().unwrap().is_empty());
    }
}
