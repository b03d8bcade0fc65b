//! Worker lifecycle
//!
//! - `types`: what a worker runs and the worker process wire events.
//! - `worker`: the [`Worker`] handle (task or process).
//! - `process_worker`: spawning worker processes and the child side.
//! - `registry`: in-memory indexes of live workers.

pub mod process_worker;
pub mod registry;
pub mod types;
pub mod worker;

pub use process_worker::{run_worker_process, StdoutSink, WorkerLauncher};
pub use registry::{ClientRegistry, ServerKey, ServerRegistry};
pub use types::{ClientSpec, Runnable, ServerSpec, WorkerEvent, WorkerKind};
pub use worker::Worker;
