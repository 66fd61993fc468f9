use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-profile connection settings. Token columns hold base64
/// `nonce || ciphertext || tag` blobs, never plaintext.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_profile_config")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub profile_id: Uuid,
    pub abs_base_url: String,
    pub abs_token_ciphertext: String,
    pub hc_token_ciphertext: String,
    /// Serialized `SyncOptions`, opaque to the store.
    #[sea_orm(column_type = "Text")]
    pub sync_options: String,
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
