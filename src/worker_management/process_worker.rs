//! # Worker processes
//!
//! Namespace membership is per thread and a multi-threaded runtime spawns
//! threads eagerly, so a worker that must run inside a network namespace is
//! a fresh process: the agent re-executes its own binary as
//! `pulse worker --spec <json> [--netns <path>]`. The child enters the
//! namespace first, only then builds its runtime and binds its socket.
//!
//! Parent and child talk over the child's stdout, one JSON
//! [`WorkerEvent`] per line:
//!
//! ```text
//! {"event":"ready"}
//! {"event":"record","id":"…","src":"10.0.0.1",…}
//! ```
//!
//! The first line decides the outcome of the start; later lines carry the
//! records of a client worker, which the parent forwards to its sink.
//! Anything the child logs goes to stderr and is re-logged by the parent at
//! debug level.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use uuid::Uuid;

use super::types::{Runnable, WorkerEvent};
use super::worker::Worker;
use crate::error_handling::types::{FailureStage, RecorderError, TrafficError};
use crate::namespace::enter_net_namespace;
use crate::recording::RecordSink;
use crate::traffic::types::Record;
use crate::traffic::{TrafficClient, TrafficServer};

/// Spawns worker processes from the agent binary.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    ready_timeout: Duration,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>, ready_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            ready_timeout,
        }
    }

    /// Launcher re-executing the running binary.
    pub fn current_exe(ready_timeout: Duration) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, ready_timeout))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Starts `runnable` in a new process, inside `netns` when given, and
    /// waits for it to report readiness.
    pub async fn launch(
        &self,
        runnable: Runnable,
        netns: Option<&Path>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Worker, TrafficError> {
        let spec =
            serde_json::to_string(&runnable).map_err(|e| TrafficError::WorkerProtocol(e.to_string()))?;
        let id = Uuid::new_v4();

        let mut cmd = Command::new(&self.program);
        cmd.arg("worker").arg("--spec").arg(&spec);
        if let Some(path) = netns {
            cmd.arg("--netns").arg(path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Spawning worker {} ({}) in {}",
            id,
            runnable,
            netns.map_or_else(|| "the current namespace".to_string(), |p| p.display().to_string())
        );
        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn worker {}: {}", id, e);
            TrafficError::WorkerSpawn(e)
        })?;

        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[worker:{}][stderr] {}", id, line);
                }
                trace!("stderr monitoring ended for worker {}", id);
            });
        }

        let Some(stdout) = child.stdout.take() else {
            abort(&mut child).await;
            return Err(TrafficError::WorkerProtocol("worker stdout not captured".into()));
        };
        let mut lines = BufReader::new(stdout).lines();

        if let Err(e) = self.await_ready(id, &mut child, &mut lines).await {
            abort(&mut child).await;
            return Err(e);
        }

        tokio::spawn(forward_records(id, lines, sink));
        Ok(Worker::from_process(id, runnable, child))
    }

    async fn await_ready(
        &self,
        id: Uuid,
        child: &mut Child,
        lines: &mut tokio::io::Lines<BufReader<ChildStdout>>,
    ) -> Result<(), TrafficError> {
        let first = match tokio::time::timeout(self.ready_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                let status = child.wait().await.ok();
                return Err(TrafficError::WorkerProtocol(format!(
                    "worker {} exited before reporting readiness ({:?})",
                    id, status
                )));
            }
            Ok(Err(e)) => {
                return Err(TrafficError::WorkerProtocol(format!(
                    "reading worker {} stdout failed: {}",
                    id, e
                )))
            }
            Err(_) => {
                return Err(TrafficError::WorkerProtocol(format!(
                    "worker {} not ready within {:?}",
                    id, self.ready_timeout
                )))
            }
        };

        match serde_json::from_str::<WorkerEvent>(&first) {
            Ok(WorkerEvent::Ready) => {
                debug!("Worker {} ready", id);
                Ok(())
            }
            Ok(WorkerEvent::Failed { stage, message }) => {
                warn!("Worker {} failed during {}: {}", id, stage, message);
                Err(match stage {
                    FailureStage::Bind => TrafficError::Bind(io::Error::new(io::ErrorKind::Other, message)),
                    FailureStage::Namespace => TrafficError::NamespaceEntry(message),
                    FailureStage::Runtime => TrafficError::WorkerProtocol(message),
                })
            }
            Ok(WorkerEvent::Record(_)) => Err(TrafficError::WorkerProtocol(format!(
                "worker {} sent a record before reporting readiness",
                id
            ))),
            Err(e) => Err(TrafficError::WorkerProtocol(format!(
                "unexpected first line from worker {}: {}",
                id, e
            ))),
        }
    }
}

async fn abort(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Killing failed worker process: {}", e);
    }
}

async fn forward_records(
    id: Uuid,
    mut lines: tokio::io::Lines<BufReader<ChildStdout>>,
    sink: Arc<dyn RecordSink>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<WorkerEvent>(&line) {
            Ok(WorkerEvent::Record(record)) => {
                if let Err(e) = sink.submit(record) {
                    debug!("Record from worker {} not accepted: {}", id, e);
                }
            }
            Ok(other) => debug!("Ignoring {:?} from worker {}", other, id),
            Err(e) => warn!("Malformed line from worker {}: {}", id, e),
        }
    }
    debug!("stdout monitoring ended for worker {}", id);
}

/// Sink of a worker process: every record becomes a line on stdout.
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn submit(&self, record: Record) -> Result<(), RecorderError> {
        emit(&WorkerEvent::Record(record)).map_err(|_| RecorderError::QueueClosed)
    }
}

fn emit(event: &WorkerEvent) -> io::Result<()> {
    let line = serde_json::to_string(event)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}

fn fail(stage: FailureStage, message: String) -> i32 {
    error!("Worker failed during {}: {}", stage, message);
    if let Err(e) = emit(&WorkerEvent::Failed { stage, message }) {
        error!("Unable to report failure to the agent: {}", e);
    }
    1
}

/// Body of the `pulse worker` subcommand. Returns the process exit code.
///
/// Must run on the main thread before any runtime exists.
pub fn run_worker_process(spec: &str, netns: Option<&Path>) -> i32 {
    #[cfg(target_os = "linux")]
    unsafe {
        // Do not outlive the agent
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
    }

    let runnable: Runnable = match serde_json::from_str(spec) {
        Ok(runnable) => runnable,
        Err(e) => return fail(FailureStage::Runtime, format!("invalid worker spec: {}", e)),
    };

    if let Some(path) = netns {
        if let Err(e) = enter_net_namespace(path) {
            return fail(
                FailureStage::Namespace,
                format!("cannot enter {}: {}", path.display(), e),
            );
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return fail(FailureStage::Runtime, e.to_string()),
    };
    runtime.block_on(serve(runnable))
}

async fn serve(runnable: Runnable) -> i32 {
    // Never signalled: the agent stops worker processes by killing them
    let (_stop, stop_rx) = watch::channel(false);
    match runnable {
        Runnable::Server(spec) => {
            let addr = std::net::SocketAddr::new(spec.bind_address, spec.port);
            let server = match TrafficServer::bind(spec.protocol, addr).await {
                Ok(server) => server,
                Err(TrafficError::Bind(e)) => return fail(FailureStage::Bind, e.to_string()),
                Err(e) => return fail(FailureStage::Runtime, e.to_string()),
            };
            if emit(&WorkerEvent::Ready).is_err() {
                return 1;
            }
            info!("Worker serving {} on {}", spec.protocol, addr);
            server.serve(stop_rx).await;
        }
        Runnable::Client(spec) => {
            let client =
                TrafficClient::new(spec.source, spec.destinations, &spec.settings, Arc::new(StdoutSink));
            if emit(&WorkerEvent::Ready).is_err() {
                return 1;
            }
            client.run(stop_rx).await;
        }
    }
    0
}
