//! Client/server wire protocol: echo servers, cycling ping clients and the
//! verdict that turns an observed outcome into a policy result.

pub mod client;
pub mod server;
pub mod types;

pub use client::{evaluate, ping, TrafficClient};
pub use server::TrafficServer;
pub use types::{Action, Destination, Protocol, Record, RuleState, TrafficRule};

use tokio::sync::watch;

/// Resolves once `shutdown` reads `true` or its sender is gone.
///
/// The borrow handed out by `wait_for` is released here so callers can
/// `select!` on this next to branches that keep awaiting.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
