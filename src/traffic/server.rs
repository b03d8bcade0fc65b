//! # Traffic server
//!
//! Echo responders whose only job is to exist (or not) so that reachability
//! can be measured. A TCP server reads one request of at most
//! [`PACKET_SIZE`] bytes per connection, writes it back and closes the
//! connection; a UDP server echoes every datagram to its sender.
//!
//! Binding is split from serving so that a bind failure surfaces to the
//! caller before any worker is started:
//!
//! ```rust,no_run
//! use pulse::traffic::{Protocol, TrafficServer};
//! use tokio::sync::watch;
//!
//! # async fn run() -> Result<(), pulse::error_handling::types::TrafficError> {
//! let server = TrafficServer::bind(Protocol::Tcp, "127.0.0.1:9000".parse().unwrap()).await?;
//! let (stop_tx, stop_rx) = watch::channel(false);
//! let task = tokio::spawn(server.serve(stop_rx));
//! stop_tx.send(true).ok();
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::sync::watch;

use super::stopped;
use super::types::{Protocol, PACKET_SIZE, REQUEST_QUEUE_SIZE};
use crate::error_handling::types::TrafficError;

/// Upper bound on how long a TCP connection may sit idle before the echo.
const ECHO_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub enum TrafficServer {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl TrafficServer {
    /// Binds a listening socket for `protocol` on `addr`.
    ///
    /// Errors with [`TrafficError::Bind`] when the address is unavailable,
    /// including when the port is already bound by someone else.
    pub async fn bind(protocol: Protocol, addr: SocketAddr) -> Result<Self, TrafficError> {
        match protocol {
            Protocol::Tcp => {
                let socket = if addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(TrafficError::Bind)?;
                socket.set_reuseaddr(true).map_err(TrafficError::Bind)?;
                socket.bind(addr).map_err(TrafficError::Bind)?;
                let listener = socket.listen(REQUEST_QUEUE_SIZE).map_err(TrafficError::Bind)?;
                debug!("TCP echo server bound on {}", addr);
                Ok(TrafficServer::Tcp(listener))
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(addr).await.map_err(TrafficError::Bind)?;
                debug!("UDP echo server bound on {}", addr);
                Ok(TrafficServer::Udp(socket))
            }
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            TrafficServer::Tcp(_) => Protocol::Tcp,
            TrafficServer::Udp(_) => Protocol::Udp,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            TrafficServer::Tcp(listener) => listener.local_addr(),
            TrafficServer::Udp(socket) => socket.local_addr(),
        }
    }

    /// Serves until `shutdown` flips to `true` (or its sender goes away).
    ///
    /// Returning drops the socket, which is what unblocks a pending accept.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        match self {
            TrafficServer::Tcp(listener) => loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(echo_tcp(stream, peer));
                        }
                        Err(e) => warn!("TCP accept failed: {}", e),
                    }
                }
            },
            TrafficServer::Udp(socket) => {
                let mut buf = [0u8; PACKET_SIZE];
                loop {
                    tokio::select! {
                        _ = stopped(&mut shutdown) => break,
                        received = socket.recv_from(&mut buf) => match received {
                            Ok((n, peer)) => {
                                trace!("UDP echo {} bytes to {}", n, peer);
                                if let Err(e) = socket.send_to(&buf[..n], peer).await {
                                    debug!("UDP echo to {} failed: {}", peer, e);
                                }
                            }
                            // ICMP errors from earlier sends surface here on Linux
                            Err(e) => debug!("UDP receive failed: {}", e),
                        }
                    }
                }
            }
        }
        debug!("Echo server stopped");
    }
}

async fn echo_tcp(mut stream: TcpStream, peer: SocketAddr) {
    let mut buf = [0u8; PACKET_SIZE];
    let n = match tokio::time::timeout(ECHO_IDLE_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!("TCP read from {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("TCP peer {} sent nothing within {:?}", peer, ECHO_IDLE_TIMEOUT);
            return;
        }
    };
    trace!("TCP echo {} bytes to {}", n, peer);
    if let Err(e) = stream.write_all(&buf[..n]).await {
        debug!("TCP echo to {} failed: {}", peer, e);
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::types::PING_PAYLOAD;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn tcp_server_echoes_payload() {
        let server = TrafficServer::bind(Protocol::Tcp, loopback()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(stop_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(PING_PAYLOAD).await.unwrap();
        let mut buf = [0u8; PACKET_SIZE];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], PING_PAYLOAD);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn udp_server_echoes_datagram() {
        let server = TrafficServer::bind(Protocol::Udp, loopback()).await.unwrap();
        assert_eq!(server.protocol(), Protocol::Udp);
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(stop_rx));

        let client = UdpSocket::bind(loopback()).await.unwrap();
        client.send_to(b"hello", addr).await.unwrap();
        let mut buf = [0u8; PACKET_SIZE];
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, addr);

        drop(stop_tx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn second_tcp_bind_on_same_port_fails() {
        let first = TrafficServer::bind(Protocol::Tcp, loopback()).await.unwrap();
        let addr = first.local_addr().unwrap();
        let second = TrafficServer::bind(Protocol::Tcp, addr).await;
        assert!(matches!(second, Err(TrafficError::Bind(_))));
    }

    #[tokio::test]
    async fn stopped_server_refuses_connections() {
        let server = TrafficServer::bind(Protocol::Tcp, loopback()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(stop_rx));
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
