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
                    .table(ProfileSyncState::Table)
                    .if_not_exists()
                    .col(uuid(ProfileSyncState::ProfileId).primary_key())
                    .col(boolean(ProfileSyncState::LastSyncSuccess))
                    .col(big_integer(ProfileSyncState::LastSyncTimestampMs))
                    .col(big_integer(ProfileSyncState::LastFullSyncMs))
                    .col(integer(ProfileSyncState::BooksProcessed))
                    .col(integer(ProfileSyncState::BooksSynced))
                    .col(big_integer(ProfileSyncState::LastDurationMs))
                    .col(string_null(ProfileSyncState::LastError))
                    .col(text_null(ProfileSyncState::RunState))
                    .col(timestamp_with_time_zone(ProfileSyncState::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_profile_sync_state_profile_id")
                            .from(ProfileSyncState::Table, ProfileSyncState::ProfileId)
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
            .drop_table(Table::drop().table(ProfileSyncState::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ProfileSyncState {
    Table,
    ProfileId,
    LastSyncSuccess,
    LastSyncTimestampMs,
    LastFullSyncMs,
    BooksProcessed,
    BooksSynced,
    LastDurationMs,
    LastError,
    RunState,
    UpdatedAt,
}
