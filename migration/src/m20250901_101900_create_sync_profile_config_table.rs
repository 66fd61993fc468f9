use crate::m20250901_101500_create_sync_profile_table::SyncProfile;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncProfileConfig::Table)
                    .if_not_exists()
                    .col(uuid(SyncProfileConfig::ProfileId).primary_key())
                    .col(string(SyncProfileConfig::AbsBaseUrl))
                    .col(string(SyncProfileConfig::AbsTokenCiphertext))
                    .col(string(SyncProfileConfig::HcTokenCiphertext))
                    .col(text(SyncProfileConfig::SyncOptions))
                    .col(timestamp_with_time_zone(SyncProfileConfig::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_profile_config_profile_id")
                            .from(SyncProfileConfig::Table, SyncProfileConfig::ProfileId)
                            .to(SyncProfile::Table, SyncProfile::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncProfileConfig::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum SyncProfileConfig {
    Table,
    ProfileId,
    AbsBaseUrl,
    AbsTokenCiphertext,
    HcTokenCiphertext,
    SyncOptions,
    UpdatedAt,
}
