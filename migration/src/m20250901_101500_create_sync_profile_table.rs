use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncProfile::Table)
                    .if_not_exists()
                    .col(uuid(SyncProfile::Id).primary_key())
                    .col(string(SyncProfile::Name))
                    .col(boolean(SyncProfile::Active))
                    .col(timestamp_with_time_zone(SyncProfile::CreatedAt))
                    .col(timestamp_with_time_zone(SyncProfile::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncProfile::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum SyncProfile {
    Table,
    Id,
    Name,
    Active,
    CreatedAt,
    UpdatedAt,
}
