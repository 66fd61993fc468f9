// Profile persistence over sea-orm. Three tables: sync_profile,
// sync_profile_config, profile_sync_state; profile creation writes all
// three in one transaction.

use anyhow::Context;
use chrono::Utc;
use entities::{profile_sync_state, sync_profile, sync_profile_config};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    crypto::TokenCipher,
    domain::models::{SyncOptions, SyncOptionsPatch},
    error::{AbsHardcoverResult, SyncError},
};

/// A profile with its config and sync state eagerly loaded.
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub profile: sync_profile::Model,
    pub config: sync_profile_config::Model,
    pub state: profile_sync_state::Model,
}

impl ProfileRecord {
    /// Stored options blob, tolerating rows written by older builds.
    pub fn options(&self) -> SyncOptions {
        serde_json::from_str(&self.config.sync_options).unwrap_or_else(|e| {
            tracing::warn!(
                profile_id = %self.profile.id,
                error = %e,
                "unreadable sync_options blob, using defaults"
            );
            SyncOptions::default()
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub name: String,
    pub abs_base_url: String,
    pub abs_token: String,
    pub hc_token: String,
    pub options: SyncOptions,
}

/// Config update. `None` or empty token fields preserve the stored
/// ciphertext; the options patch merges field-by-field.
#[derive(Debug, Clone, Default)]
pub struct ProfileConfigUpdate {
    pub abs_base_url: Option<String>,
    pub abs_token: Option<String>,
    pub hc_token: Option<String>,
    pub options: Option<SyncOptionsPatch>,
}

/// Terminal bookkeeping for one run.
#[derive(Debug, Clone, Default)]
pub struct SyncStateUpdate {
    pub success: bool,
    pub timestamp_ms: i64,
    pub was_full_sync: bool,
    pub books_processed: i32,
    pub books_synced: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub run_state: Option<String>,
}

/// Connect to the configured database; a failed non-SQLite connection falls
/// back to local SQLite so a broken Postgres/MySQL endpoint does not take
/// the whole process down.
pub async fn connect(config: &AppConfig) -> AbsHardcoverResult<DatabaseConnection> {
    let url = config.database_url_or_default();
    match connect_with(&url).await {
        Ok(conn) => Ok(conn),
        Err(e) if !url.starts_with("sqlite") => {
            let fallback = format!(
                "sqlite://{}?mode=rwc",
                config.data_dir.join("audiobookshelf-sync.db").display()
            );
            tracing::warn!(error = %e, %fallback, "database unreachable, falling back to SQLite");
            connect_with(&fallback)
                .await
                .context("fallback SQLite connection failed")
        }
        Err(e) => Err(e).context("database connection failed"),
    }
}

async fn connect_with(url: &str) -> AbsHardcoverResult<DatabaseConnection> {
    let mut opts = ConnectOptions::new(url.to_string());
    if url.starts_with("sqlite") {
        // Single writer; SQLite does not like concurrent connections.
        opts.max_connections(1);
    }
    let conn = Database::connect(opts).await?;
    conn.ping().await?;
    Ok(conn)
}

pub struct ProfileStore {
    db: DatabaseConnection,
    cipher: TokenCipher,
}

impl ProfileStore {
    pub fn new(db: DatabaseConnection, cipher: TokenCipher) -> Self {
        ProfileStore { db, cipher }
    }

    pub async fn create(&self, new: NewProfile) -> AbsHardcoverResult<ProfileRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let abs_ciphertext = self.cipher.encrypt(&new.abs_token)?;
        let hc_ciphertext = self.cipher.encrypt(&new.hc_token)?;
        let options_blob = serde_json::to_string(&new.options)?;

        let record = self
            .db
            .transaction::<_, ProfileRecord, DbErr>(move |txn| {
                Box::pin(async move {
                    let profile = sync_profile::ActiveModel {
                        id: Set(id),
                        name: Set(new.name),
                        active: Set(true),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let config = sync_profile_config::ActiveModel {
                        profile_id: Set(id),
                        abs_base_url: Set(new.abs_base_url),
                        abs_token_ciphertext: Set(abs_ciphertext),
                        hc_token_ciphertext: Set(hc_ciphertext),
                        sync_options: Set(options_blob),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let state = profile_sync_state::ActiveModel {
                        profile_id: Set(id),
                        last_sync_success: Set(false),
                        last_sync_timestamp_ms: Set(0),
                        last_full_sync_ms: Set(0),
                        books_processed: Set(0),
                        books_synced: Set(0),
                        last_duration_ms: Set(0),
                        last_error: Set(None),
                        run_state: Set(None),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    Ok(ProfileRecord {
                        profile,
                        config,
                        state,
                    })
                })
            })
            .await
            .map_err(|e| match e {
                sea_orm::TransactionError::Connection(db) => map_db_err(db),
                sea_orm::TransactionError::Transaction(db) => map_db_err(db),
            })?;

        tracing::info!(profile_id = %record.profile.id, name = %record.profile.name, "created profile");
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> AbsHardcoverResult<ProfileRecord> {
        let profile = sync_profile::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("profile {id}")))?;
        self.load_record(profile).await
    }

    pub async fn list(&self, active_only: bool) -> AbsHardcoverResult<Vec<ProfileRecord>> {
        let mut query = sync_profile::Entity::find().order_by_asc(sync_profile::Column::CreatedAt);
        if active_only {
            query = query.filter(sync_profile::Column::Active.eq(true));
        }
        let profiles = query.all(&self.db).await?;
        let mut records = Vec::with_capacity(profiles.len());
        for profile in profiles {
            records.push(self.load_record(profile).await?);
        }
        Ok(records)
    }

    pub async fn count(&self) -> AbsHardcoverResult<u64> {
        use sea_orm::PaginatorTrait;
        Ok(sync_profile::Entity::find().count(&self.db).await?)
    }

    async fn load_record(&self, profile: sync_profile::Model) -> AbsHardcoverResult<ProfileRecord> {
        let config = sync_profile_config::Entity::find_by_id(profile.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("config for profile {}", profile.id)))?;
        let state = profile_sync_state::Entity::find_by_id(profile.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("sync state for profile {}", profile.id)))?;
        Ok(ProfileRecord {
            profile,
            config,
            state,
        })
    }

    pub async fn rename(&self, id: Uuid, name: String) -> AbsHardcoverResult<ProfileRecord> {
        let record = self.get(id).await?;
        let mut active: sync_profile::ActiveModel = record.profile.into();
        active.name = Set(name);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await.map_err(map_db_err)?;
        self.get(id).await
    }

    /// Soft delete: the profile row stays for history, `active` is cleared.
    pub async fn deactivate(&self, id: Uuid) -> AbsHardcoverResult<()> {
        let record = self.get(id).await?;
        let mut active: sync_profile::ActiveModel = record.profile.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await.map_err(map_db_err)?;
        Ok(())
    }

    pub async fn update_config(
        &self,
        id: Uuid,
        update: ProfileConfigUpdate,
    ) -> AbsHardcoverResult<ProfileRecord> {
        let record = self.get(id).await?;
        let mut options = record.options();
        if let Some(patch) = &update.options {
            options.merge(patch);
        }

        let mut active: sync_profile_config::ActiveModel = record.config.into();
        if let Some(url) = update.abs_base_url.filter(|u| !u.is_empty()) {
            active.abs_base_url = Set(url);
        }
        // Empty token fields on an update preserve the stored ciphertext.
        if let Some(token) = update.abs_token.filter(|t| !t.is_empty()) {
            active.abs_token_ciphertext = Set(self.cipher.encrypt(&token)?);
        }
        if let Some(token) = update.hc_token.filter(|t| !t.is_empty()) {
            active.hc_token_ciphertext = Set(self.cipher.encrypt(&token)?);
        }
        active.sync_options = Set(serde_json::to_string(&options)?);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await.map_err(map_db_err)?;

        self.get(id).await
    }

    /// Upsert the run bookkeeping. Timestamps only move forward; a stale
    /// writer can never rewind them.
    pub async fn record_sync_state(
        &self,
        id: Uuid,
        update: SyncStateUpdate,
    ) -> AbsHardcoverResult<()> {
        let record = self.get(id).await?;
        let prev = &record.state;
        let last_full = if update.was_full_sync && update.success {
            prev.last_full_sync_ms.max(update.timestamp_ms)
        } else {
            prev.last_full_sync_ms
        };
        let last_sync = prev.last_sync_timestamp_ms.max(update.timestamp_ms);

        let mut active: profile_sync_state::ActiveModel = record.state.clone().into();
        active.last_sync_success = Set(update.success);
        active.last_sync_timestamp_ms = Set(last_sync);
        active.last_full_sync_ms = Set(last_full);
        active.books_processed = Set(update.books_processed);
        active.books_synced = Set(update.books_synced);
        active.last_duration_ms = Set(update.duration_ms);
        active.last_error = Set(update.error);
        active.run_state = Set(update.run_state);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await.map_err(map_db_err)?;
        Ok(())
    }

    /// Decrypt the per-profile tokens. Failure means the encryption key no
    /// longer matches what the row was written with.
    pub fn decrypted_tokens(
        &self,
        config: &sync_profile_config::Model,
    ) -> Result<(String, String), SyncError> {
        let abs = self.cipher.decrypt(&config.abs_token_ciphertext)?;
        let hc = self.cipher.decrypt(&config.hc_token_ciphertext)?;
        Ok((abs, hc))
    }
}

fn map_db_err(e: DbErr) -> anyhow::Error {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => SyncError::Conflict(msg).into(),
        _ => match e {
            DbErr::RecordNotFound(what) => SyncError::NotFound(what).into(),
            other => other.into(),
        },
    }
}
