use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Last-run bookkeeping for a profile. Timestamps are UNIX millis and only
/// ever move forward.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profile_sync_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub profile_id: Uuid,
    pub last_sync_success: bool,
    pub last_sync_timestamp_ms: i64,
    pub last_full_sync_ms: i64,
    pub books_processed: i32,
    pub books_synced: i32,
    pub last_duration_ms: i64,
    pub last_error: Option<String>,
    /// Opaque per-run blob (incremental cursors etc.).
    #[sea_orm(column_type = "Text", nullable)]
    pub run_state: Option<String>,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_profile::Entity",
        from = "Column::ProfileId",
        to = "super::sync_profile::Column::Id",
        on_delete = "Cascade"
    )]
    Profile,
}

impl Related<super::sync_profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Profile.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
