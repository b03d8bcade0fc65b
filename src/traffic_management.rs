//! Traffic management
//!
//! Per-scope orchestration of server and client workers. A scope is either
//! the agent's own network namespace, where workers run as tasks, or a named
//! namespace, where each worker is a process that enters it before binding.
//!
//! - `types`: the [`Scope`] of a manager.
//! - `server_manager`: echo servers of a scope.
//! - `client_manager`: the traffic client of a scope.

pub mod client_manager;
pub mod server_manager;
pub mod types;


pub use client_manager::ClientManager;
pub use server_manager::ServerManager;
pub use types::Scope;

use std::sync::Arc;

use crate::error_handling::types::TrafficError;
use crate::recording::RecordSink;
use crate::worker_management::{Runnable, Worker, WorkerLauncher};

async fn spawn_in_scope(
    scope: &Scope,
    launcher: &WorkerLauncher,
    runnable: Runnable,
    sink: Arc<dyn RecordSink>,
) -> Result<Worker, TrafficError> {
    match scope.netns_path() {
        None => Worker::spawn_task(runnable, sink).await,
        Some(path) => Worker::spawn_process(launcher, runnable, Some(path), sink).await,
    }
}
