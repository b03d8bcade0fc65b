//! Data types shared by the traffic client, server and the recording pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Fixed ping payload sent by every client.
pub const PING_PAYLOAD: &[u8] = b"Dinkirk";

/// Maximum number of bytes read (and echoed back) per request.
pub const PACKET_SIZE: usize = 1024;

/// Listen backlog of TCP echo servers.
pub const REQUEST_QUEUE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(format!("unsupported protocol {}", other)),
        }
    }
}

/// Declared policy outcome of a rule.
///
/// Accepts `"allow"`/`"reject"`, booleans (`true` = allow) and the legacy
/// integer encoding (`1` = allow, `0` = reject).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Reject,
}

impl Action {
    pub fn allows(self) -> bool {
        matches!(self, Action::Allow)
    }
}

impl From<bool> for Action {
    fn from(allow: bool) -> Self {
        if allow {
            Action::Allow
        } else {
            Action::Reject
        }
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Number(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(b) => Ok(Action::from(b)),
            Raw::Number(n) => Ok(Action::from(n != 0)),
            Raw::Name(s) => match s.to_ascii_lowercase().as_str() {
                "allow" | "accept" => Ok(Action::Allow),
                "reject" | "drop" | "deny" => Ok(Action::Reject),
                other => Err(serde::de::Error::custom(format!("unknown action {}", other))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    #[default]
    Active,
    Inactive,
}

/// One policy rule under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRule {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: Protocol,
    pub port: u16,
    /// Whether the two endpoints are expected to be reachable at all.
    pub connected: bool,
    pub action: Action,
    #[serde(default)]
    pub state: RuleState,
}

/// A destination pinged by a client: `(protocol, port, destination,
/// connected, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub protocol: Protocol,
    pub port: u16,
    pub address: IpAddr,
    pub connected: bool,
    pub action: Action,
}

/// One ping observation. Built once by the client and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub latency_ms: f64,
    pub error: Option<String>,
    /// Policy verdict, not the raw network outcome.
    pub success: bool,
    pub connected: bool,
    pub created_time: DateTime<Utc>,
}
