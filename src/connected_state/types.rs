use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::traffic::types::{Action, Destination, Protocol};

/// A server an endpoint must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerEntry {
    pub protocol: Protocol,
    pub port: u16,
}

/// A destination an endpoint's client must ping, with its expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub protocol: Protocol,
    pub port: u16,
    pub destination: IpAddr,
    pub connected: bool,
    pub action: Action,
}

impl ClientEntry {
    /// Identity of the entry; the expectation is not part of it.
    pub fn key(&self) -> (Protocol, u16, IpAddr) {
        (self.protocol, self.port, self.destination)
    }
}

impl From<&ClientEntry> for Destination {
    fn from(entry: &ClientEntry) -> Self {
        Destination {
            protocol: entry.protocol,
            port: entry.port,
            address: entry.destination,
            connected: entry.connected,
            action: entry.action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedStateEntry {
    pub endpoint: IpAddr,
    pub servers: Vec<ServerEntry>,
    pub clients: Vec<ClientEntry>,
}

impl ConnectedStateEntry {
    pub fn new(endpoint: IpAddr) -> Self {
        Self {
            endpoint,
            servers: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// Union merge. Servers are deduplicated on `(protocol, port)`; a client
    /// whose key already exists has its expectation replaced in place.
    pub fn merge(&mut self, servers: &[ServerEntry], clients: &[ClientEntry]) {
        for server in servers {
            if !self.servers.contains(server) {
                self.servers.push(*server);
            }
        }
        for client in clients {
            match self.clients.iter_mut().find(|c| c.key() == client.key()) {
                Some(existing) => *existing = client.clone(),
                None => self.clients.push(client.clone()),
            }
        }
    }
}
