//! # Worker
//!
//! A [`Worker`] is the running form of a [`Runnable`]. It comes in two
//! flavours:
//!
//! - **task**: a tokio task in the agent process. Stopping it flips a
//!   `watch` flag observed by the runnable, which returns and drops its
//!   socket; `stop` waits for the task to finish.
//! - **process**: a child `pulse worker` process (see
//!   [`WorkerLauncher`]). Stopping it
//!   kills the process outright.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::process_worker::WorkerLauncher;
use super::types::{Runnable, WorkerKind};
use crate::error_handling::types::TrafficError;
use crate::recording::RecordSink;
use crate::traffic::{TrafficClient, TrafficServer};

enum Handle {
    Task {
        shutdown: watch::Sender<bool>,
        join: Mutex<Option<JoinHandle<()>>>,
    },
    Process {
        pid: Option<u32>,
        child: Mutex<Option<Child>>,
    },
}

pub struct Worker {
    id: Uuid,
    runnable: Runnable,
    started_at: DateTime<Utc>,
    handle: Handle,
}

impl Worker {
    /// Starts `runnable` as a task of the current runtime.
    ///
    /// A server is bound before this returns, so a bind failure surfaces
    /// here as [`TrafficError::Bind`].
    pub async fn spawn_task(
        runnable: Runnable,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, TrafficError> {
        let (shutdown, stop_rx) = watch::channel(false);
        let join = match &runnable {
            Runnable::Server(spec) => {
                let addr = SocketAddr::new(spec.bind_address, spec.port);
                let server = TrafficServer::bind(spec.protocol, addr).await?;
                tokio::spawn(server.serve(stop_rx))
            }
            Runnable::Client(spec) => {
                let client =
                    TrafficClient::new(spec.source, spec.destinations.clone(), &spec.settings, sink);
                tokio::spawn(client.run(stop_rx))
            }
        };
        let worker = Self {
            id: Uuid::new_v4(),
            runnable,
            started_at: Utc::now(),
            handle: Handle::Task {
                shutdown,
                join: Mutex::new(Some(join)),
            },
        };
        info!("Worker {} started as task: {}", worker.id, worker.runnable);
        Ok(worker)
    }

    /// Starts `runnable` in a worker process, inside `netns` when given.
    pub async fn spawn_process(
        launcher: &WorkerLauncher,
        runnable: Runnable,
        netns: Option<&Path>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, TrafficError> {
        launcher.launch(runnable, netns, sink).await
    }

    /// Wraps an already running, ready worker process.
    pub(crate) fn from_process(id: Uuid, runnable: Runnable, child: Child) -> Self {
        let worker = Self {
            id,
            runnable,
            started_at: Utc::now(),
            handle: Handle::Process {
                pid: child.id(),
                child: Mutex::new(Some(child)),
            },
        };
        info!(
            "Worker {} started as process {:?}: {}",
            worker.id,
            worker.pid(),
            worker.runnable
        );
        worker
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn runnable(&self) -> &Runnable {
        &self.runnable
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn kind(&self) -> WorkerKind {
        match self.handle {
            Handle::Task { .. } => WorkerKind::Task,
            Handle::Process { .. } => WorkerKind::Process,
        }
    }

    /// OS process id of a process worker.
    pub fn pid(&self) -> Option<u32> {
        match self.handle {
            Handle::Task { .. } => None,
            Handle::Process { pid, .. } => pid,
        }
    }

    pub async fn is_running(&self) -> bool {
        match &self.handle {
            Handle::Task { join, .. } => join
                .lock()
                .await
                .as_ref()
                .is_some_and(|handle| !handle.is_finished()),
            Handle::Process { child, .. } => match child.lock().await.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            },
        }
    }

    /// Stops the worker. Idempotent; returns `false` when it was already
    /// stopped.
    pub async fn stop(&self) -> bool {
        match &self.handle {
            Handle::Task { shutdown, join } => {
                let Some(handle) = join.lock().await.take() else {
                    return false;
                };
                let _ = shutdown.send(true);
                if let Err(e) = handle.await {
                    warn!("Worker {} task ended abnormally: {}", self.id, e);
                }
                info!("Worker {} stopped", self.id);
                true
            }
            Handle::Process { child, .. } => {
                let Some(mut child) = child.lock().await.take() else {
                    return false;
                };
                match child.kill().await {
                    Ok(()) => info!("Worker {} process killed", self.id),
                    Err(e) => warn!("Failed to kill worker {} process: {}", self.id, e),
                }
                true
            }
        }
    }

    /// Waits for a process worker to exit on its own. `None` for task
    /// workers and already stopped workers.
    pub async fn wait(&self) -> Option<ExitStatus> {
        match &self.handle {
            Handle::Task { .. } => None,
            Handle::Process { child, .. } => {
                let mut guard = child.lock().await;
                let status = guard.as_mut()?.wait().await.ok();
                debug!("Worker {} exited with {:?}", self.id, status);
                status
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("runnable", &self.runnable)
            .field("started_at", &self.started_at)
            .finish()
    }
}
