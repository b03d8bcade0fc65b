use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::configuration::types::TrafficSettings;
use crate::error_handling::types::FailureStage;
use crate::traffic::types::{Destination, Protocol, Record};

/// Echo server to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub protocol: Protocol,
    pub port: u16,
    pub bind_address: IpAddr,
}

/// Traffic client to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub source: IpAddr,
    pub destinations: Vec<Destination>,
    pub settings: TrafficSettings,
}

/// What a worker executes. Serialisable so that it can be handed to a
/// worker process on its command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Runnable {
    Server(ServerSpec),
    Client(ClientSpec),
}

impl fmt::Display for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runnable::Server(spec) => {
                write!(f, "{} server on {}:{}", spec.protocol, spec.bind_address, spec.port)
            }
            Runnable::Client(spec) => write!(
                f,
                "client from {} to {} destinations",
                spec.source,
                spec.destinations.len()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Tokio task inside the agent process
    Task,
    /// Separate OS process, possibly inside a network namespace
    Process,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Task => write!(f, "task"),
            WorkerKind::Process => write!(f, "process"),
        }
    }
}

/// One line of a worker process's stdout.
///
/// The first line is `Ready` or `Failed`; every later line is a `Record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WorkerEvent {
    Ready,
    Failed { stage: FailureStage, message: String },
    Record(Record),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::types::Action;

    #[test]
    fn test_runnable_survives_the_command_line() {
        let runnable = Runnable::Client(ClientSpec {
            source: "10.0.0.1".parse().unwrap(),
            destinations: vec![Destination {
                protocol: Protocol::Udp,
                port: 53,
                address: "10.0.0.2".parse().unwrap(),
                connected: false,
                action: Action::Reject,
            }],
            settings: TrafficSettings::default(),
        });
        let json = serde_json::to_string(&runnable).unwrap();
        assert!(json.contains(r#""type":"client""#));
        assert_eq!(serde_json::from_str::<Runnable>(&json).unwrap(), runnable);
    }

    #[test]
    fn test_failed_event_wire_format() {
        let event: WorkerEvent =
            serde_json::from_str(r#"{"event":"failed","stage":"Bind","message":"Address in use"}"#)
                .unwrap();
        assert_eq!(
            event,
            WorkerEvent::Failed {
                stage: FailureStage::Bind,
                message: "Address in use".into()
            }
        );
        assert_eq!(serde_json::to_string(&WorkerEvent::Ready).unwrap(), r#"{"event":"ready"}"#);
    }
}
