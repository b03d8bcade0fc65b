use std::net::IpAddr;
use std::path::Path;

use log::{debug, error, info};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Set,
    TransactionTrait,
};

use super::db_entities as entity;
use super::state_store::{ConnectedStateStore, StoreFuture};
use super::types::{ClientEntry, ConnectedStateEntry, ServerEntry};
use crate::error_handling::types::StorageError;

/// ConnectedState persisted in SQLite through SeaORM.
pub struct DatabaseConnectedState {
    db: DatabaseConnection,
}

impl DatabaseConnectedState {
    /// Opens (creating if needed) the database at `path`.
    pub async fn connect(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = Database::connect(url).await.map_err(|e| {
            error!("Failed to open connected state database {}: {}", path.display(), e);
            StorageError::ConnectionFailed
        })?;
        db.execute_unprepared(
            "CREATE TABLE IF NOT EXISTS connected_state (
                endpoint TEXT PRIMARY KEY NOT NULL,
                servers TEXT NOT NULL,
                clients TEXT NOT NULL
            );",
        )
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        info!("Connected state database opened at {}", path.display());
        Ok(Self { db })
    }

    async fn merge(
        &self,
        endpoint: IpAddr,
        servers: &[ServerEntry],
        clients: &[ClientEntry],
    ) -> Result<(), StorageError> {
        let txn = self.db.begin().await.map_err(|_| StorageError::WriteFailed)?;
        let existing = entity::Entity::find_by_id(endpoint.to_string())
            .one(&txn)
            .await
            .map_err(|_| StorageError::ReadFailed)?;

        match existing {
            Some(model) => {
                let mut entry = into_entry(&model)?;
                entry.merge(servers, clients);
                let mut active: entity::ActiveModel = model.into();
                active.servers = Set(to_json(&entry.servers)?);
                active.clients = Set(to_json(&entry.clients)?);
                active.update(&txn).await.map_err(|_| StorageError::WriteFailed)?;
            }
            None => {
                let mut entry = ConnectedStateEntry::new(endpoint);
                entry.merge(servers, clients);
                entity::ActiveModel {
                    endpoint: Set(endpoint.to_string()),
                    servers: Set(to_json(&entry.servers)?),
                    clients: Set(to_json(&entry.clients)?),
                }
                .insert(&txn)
                .await
                .map_err(|_| StorageError::WriteFailed)?;
            }
        }

        txn.commit().await.map_err(|_| StorageError::WriteFailed)?;
        debug!("Connected state of {} updated", endpoint);
        Ok(())
    }
}

impl ConnectedStateStore for DatabaseConnectedState {
    fn create_or_update<'a>(
        &'a self,
        endpoint: IpAddr,
        servers: &'a [ServerEntry],
        clients: &'a [ClientEntry],
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.merge(endpoint, servers, clients))
    }

    fn get(&self, endpoint: IpAddr) -> StoreFuture<'_, Option<ConnectedStateEntry>> {
        Box::pin(async move {
            let model = entity::Entity::find_by_id(endpoint.to_string())
                .one(&self.db)
                .await
                .map_err(|_| StorageError::ReadFailed)?;
            model.as_ref().map(into_entry).transpose()
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<ConnectedStateEntry>> {
        Box::pin(async move {
            let models = entity::Entity::find()
                .all(&self.db)
                .await
                .map_err(|_| StorageError::ReadFailed)?;
            models.iter().map(into_entry).collect::<Result<Vec<_>, _>>()
        })
    }

    fn delete(&self, endpoint: Option<IpAddr>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let result = match endpoint {
                Some(endpoint) => entity::Entity::delete_by_id(endpoint.to_string())
                    .exec(&self.db)
                    .await,
                None => entity::Entity::delete_many().exec(&self.db).await,
            }
            .map_err(|_| StorageError::WriteFailed)?;
            Ok::<_, StorageError>(result.rows_affected as usize)
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|_| StorageError::WriteFailed)
}

fn into_entry(model: &entity::Model) -> Result<ConnectedStateEntry, StorageError> {
    Ok(ConnectedStateEntry {
        endpoint: model.endpoint.parse().map_err(|_| StorageError::ReadFailed)?,
        servers: serde_json::from_str(&model.servers).map_err(|_| StorageError::ReadFailed)?,
        clients: serde_json::from_str(&model.clients).map_err(|_| StorageError::ReadFailed)?,
    })
}
