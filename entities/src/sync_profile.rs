use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A configured sync tenant. Soft-deleted by clearing `active`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_profile")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::sync_profile_config::Entity")]
    Config,
    #[sea_orm(has_one = "super::profile_sync_state::Entity")]
    SyncState,
}

impl Related<super::sync_profile_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Config.def()
    }
}

impl Related<super::profile_sync_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncState.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
