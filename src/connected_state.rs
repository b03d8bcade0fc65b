//! ConnectedState store
//!
//! Declarative source of truth for which servers each endpoint must run and
//! which destinations its client must ping. Worker handles are derived from
//! it and never stored in it.
//!
//! Components:
//! - `types`: entries and the union merge.
//! - `state_store`: the [`ConnectedStateStore`] trait.
//! - `memory_state`: in-process backend.
//! - `database_state`: SQLite backend on SeaORM.
//! - `db_entities`: SeaORM entity for the database backend.

pub mod database_state;
pub mod db_entities;
pub mod memory_state;
pub mod state_store;
pub mod types;

pub use database_state::DatabaseConnectedState;
pub use memory_state::MemoryConnectedState;
pub use state_store::{ConnectedStateStore, StoreFuture};
pub use types::{ClientEntry, ConnectedStateEntry, ServerEntry};

use std::sync::Arc;

use crate::configuration::types::{ConnectedStateSettings, StateBackend};
use crate::error_handling::types::StorageError;

/// Opens the backend selected by `settings`.
pub async fn from_settings(
    settings: &ConnectedStateSettings,
) -> Result<Arc<dyn ConnectedStateStore>, StorageError> {
    match settings.backend {
        StateBackend::Memory => Ok(Arc::new(MemoryConnectedState::new())),
        StateBackend::Sqlite => Ok(Arc::new(
            DatabaseConnectedState::connect(&settings.path).await?,
        )),
    }
}
