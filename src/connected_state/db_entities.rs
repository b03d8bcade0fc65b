//! SeaORM entity model used by the database ConnectedState backend.
//!
//! One row per endpoint in `connected_state`; the server and client lists
//! are stored as JSON text.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connected_state")]
pub struct Model {
    /// Endpoint IP address as string primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub endpoint: String,
    /// JSON array of `ServerEntry`
    pub servers: String,
    /// JSON array of `ClientEntry`
    pub clients: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
