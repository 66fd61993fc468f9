pub use sea_orm_migration::prelude::*;

mod m20250901_101500_create_sync_profile_table;
mod m20250901_101900_create_sync_profile_config_table;
mod m20250901_102200_create_profile_sync_state_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_101500_create_sync_profile_table::Migration),
            Box::new(m20250901_101900_create_sync_profile_config_table::Migration),
            Box::new(m20250901_102200_create_profile_sync_state_table::Migration),
        ]
    }
}
