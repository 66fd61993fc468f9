// Multi-tenant scheduling: one in-flight sync per profile, a registry of
// cancellation handles and live engines, and a periodic ticker. Lock
// discipline: map locks are held only to mutate the maps, never across a
// sync.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    abs_client::AbsClient,
    config::AppConfig,
    domain::models::SyncSummary,
    error::SyncError,
    hardcover::{HardcoverClient, HardcoverOps, RateLimitConfig},
    resolver::cache::PersonCache,
    store::{ProfileRecord, ProfileStore},
    sync::{EngineParams, SyncEngine},
};

const TICKER_WARMUP: Duration = Duration::from_secs(5);

/// Externally visible state of one profile's syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Syncing,
    Completed,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Syncing => "syncing",
            RunState::Completed => "completed",
            RunState::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileStatus {
    pub state: RunState,
    pub progress: String,
    /// UNIX millis of the last terminal transition.
    pub last_sync_ms: Option<i64>,
    pub error: Option<String>,
}

impl Default for ProfileStatus {
    fn default() -> Self {
        ProfileStatus {
            state: RunState::Idle,
            progress: String::new(),
            last_sync_ms: None,
            error: None,
        }
    }
}

struct SlotGuard {
    scheduler: Arc<Scheduler>,
    profile_id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler
            .engines
            .write()
            .unwrap()
            .remove(&self.profile_id);
        self.scheduler
            .active
            .write()
            .unwrap()
            .remove(&self.profile_id);
    }
}

pub struct Scheduler {
    store: Arc<ProfileStore>,
    config: Arc<AppConfig>,
    cache: Arc<PersonCache>,
    shutdown: CancellationToken,
    active: RwLock<HashMap<Uuid, CancellationToken>>,
    engines: RwLock<HashMap<Uuid, Arc<SyncEngine>>>,
    last_status: RwLock<HashMap<Uuid, ProfileStatus>>,
}

impl Scheduler {
    pub fn new(store: Arc<ProfileStore>, config: Arc<AppConfig>, cache: Arc<PersonCache>) -> Self {
        Scheduler {
            store,
            config,
            cache,
            shutdown: CancellationToken::new(),
            active: RwLock::new(HashMap::new()),
            engines: RwLock::new(HashMap::new()),
            last_status: RwLock::new(HashMap::new()),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a sync for a profile. Refuses while one is already in flight;
    /// registration of the cancellation handle is atomic with the refusal
    /// check, so two racing starts cannot both win.
    pub fn start_sync(self: &Arc<Self>, profile_id: Uuid, force_full: bool) -> Result<(), SyncError> {
        let cancel = {
            let mut active = self.active.write().unwrap();
            if active.contains_key(&profile_id) {
                return Err(SyncError::already_running(profile_id));
            }
            let cancel = self.shutdown.child_token();
            active.insert(profile_id, cancel.clone());
            cancel
        };

        self.last_status.write().unwrap().insert(
            profile_id,
            ProfileStatus {
                state: RunState::Syncing,
                progress: "Starting sync".to_string(),
                last_sync_ms: None,
                error: None,
            },
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.supervise(profile_id, force_full, cancel).await;
        });
        Ok(())
    }

    async fn supervise(self: Arc<Self>, profile_id: Uuid, force_full: bool, cancel: CancellationToken) {
        // Frees the slot even if the task below panics.
        let _guard = SlotGuard {
            scheduler: Arc::clone(&self),
            profile_id,
        };
        let status = match self.build_engine(profile_id, force_full, cancel).await {
            Ok(engine) => {
                let engine = Arc::new(engine);
                self.engines
                    .write()
                    .unwrap()
                    .insert(profile_id, Arc::clone(&engine));
                let report = engine.run().await;
                ProfileStatus {
                    state: if report.cancelled {
                        RunState::Idle
                    } else if report.success {
                        RunState::Completed
                    } else {
                        RunState::Error
                    },
                    progress: engine.progress_text(),
                    last_sync_ms: Some(Utc::now().timestamp_millis()),
                    error: report.error,
                }
            }
            Err(e) => {
                tracing::error!(profile_id = %profile_id, error = %format!("{e:#}"), "could not start sync");
                ProfileStatus {
                    state: RunState::Error,
                    progress: "Sync failed to start".to_string(),
                    last_sync_ms: Some(Utc::now().timestamp_millis()),
                    error: Some(e.to_string()),
                }
            }
        };

        self.last_status.write().unwrap().insert(profile_id, status);
    }

    async fn build_engine(
        &self,
        profile_id: Uuid,
        force_full: bool,
        cancel: CancellationToken,
    ) -> anyhow::Result<SyncEngine> {
        let record = self.store.get(profile_id).await?;
        if !record.profile.active {
            anyhow::bail!(SyncError::NotFound(format!("profile {profile_id} is inactive")));
        }
        let (abs_token, hc_token) = match self.store.decrypted_tokens(&record.config) {
            Ok(tokens) => tokens,
            Err(SyncError::InvalidCiphertext) => {
                anyhow::bail!(
                    "token decryption failed for profile {}; the encryption key likely changed, re-enter the tokens",
                    record.profile.name
                );
            }
            Err(e) => return Err(e.into()),
        };

        let opts = self.effective_options(&record);
        let abs = AbsClient::new(&record.config.abs_base_url)?.with_api_key(&abs_token);
        let hc: Arc<dyn HardcoverOps> = Arc::new(HardcoverClient::new(
            hc_token,
            RateLimitConfig::with_rate_ms(self.config.hardcover_rate_limit_ms),
            cancel.clone(),
        )?);

        Ok(SyncEngine::new(EngineParams {
            profile_id,
            profile_name: record.profile.name.clone(),
            opts,
            force_full: force_full || self.config.force_full_sync,
            abs,
            hc,
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            mismatch_dir: self.config.mismatch_output_dir.clone(),
            cancel,
        }))
    }

    /// Profile options are authoritative; global env settings act as
    /// safety overrides (a process-wide dry-run can only add, never remove).
    fn effective_options(&self, record: &ProfileRecord) -> crate::domain::models::SyncOptions {
        let mut opts = record.options();
        let defaults = &self.config.defaults;
        if defaults.dry_run {
            opts.dry_run = true;
        }
        if opts.test_book_filter.is_empty() {
            opts.test_book_filter = defaults.test_book_filter.clone();
        }
        if opts.test_book_limit == 0 {
            opts.test_book_limit = defaults.test_book_limit;
        }
        opts
    }

    /// Trigger cancellation; the running task unwinds at its next
    /// suspension point and records the terminal status itself.
    pub fn cancel_sync(&self, profile_id: Uuid) -> Result<(), SyncError> {
        let active = self.active.read().unwrap();
        match active.get(&profile_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(SyncError::NotFound(format!(
                "no sync running for profile {profile_id}"
            ))),
        }
    }

    pub fn is_syncing(&self, profile_id: Uuid) -> bool {
        self.active.read().unwrap().contains_key(&profile_id)
    }

    pub fn status(&self, profile_id: Uuid) -> ProfileStatus {
        if let Some(engine) = self.engines.read().unwrap().get(&profile_id) {
            return ProfileStatus {
                state: RunState::Syncing,
                progress: engine.progress_text(),
                last_sync_ms: None,
                error: None,
            };
        }
        self.last_status
            .read()
            .unwrap()
            .get(&profile_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Live (or last) summary snapshot for a profile, if any.
    pub fn summary(&self, profile_id: Uuid) -> Option<SyncSummary> {
        self.engines
            .read()
            .unwrap()
            .get(&profile_id)
            .map(|engine| engine.get_summary())
    }

    /// Periodic ticker: after a short warm-up, sync every active profile,
    /// then re-trigger any idle profile on each interval tick.
    pub async fn run_ticker(self: Arc<Self>) {
        if self.config.sync_interval.is_zero() {
            tracing::info!("periodic sync disabled");
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(TICKER_WARMUP) => {}
            _ = self.shutdown.cancelled() => return,
        }

        self.tick().await;
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick already handled
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = self.shutdown.cancelled() => {
                    tracing::info!("ticker stopping");
                    return;
                }
            }
        }
    }

    async fn tick(self: &Arc<Self>) {
        let profiles = match self.store.list(true).await {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::error!(error = %e, "ticker could not list profiles");
                return;
            }
        };
        for record in profiles {
            let id = record.profile.id;
            match self.start_sync(id, false) {
                Ok(()) => tracing::info!(profile = %record.profile.name, "scheduled sync started"),
                Err(SyncError::Conflict(_)) => {
                    tracing::debug!(profile = %record.profile.name, "sync already running, skipping tick");
                }
                Err(e) => tracing::warn!(profile = %record.profile.name, error = %e, "scheduled sync refused"),
            }
        }
    }

    /// Graceful shutdown: cancel everything, then wait (bounded) for the
    /// in-flight syncs to unwind and record their terminal state.
    pub async fn shutdown(&self, deadline: Duration) {
        self.shutdown.cancel();
        let waited = tokio::time::timeout(deadline, async {
            loop {
                if self.active.read().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        if waited.is_err() {
            let stuck = self.active.read().unwrap().len();
            tracing::warn!(stuck, "shutdown deadline hit with syncs still unwinding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::TokenCipher, domain::models::SyncOptions, store::NewProfile};
    use migration::MigratorTrait;
    use sea_orm::Database;

    async fn test_scheduler() -> (Arc<Scheduler>, Arc<ProfileStore>) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let store = Arc::new(ProfileStore::new(
            db,
            TokenCipher::from_key_bytes(&[3u8; 32]).unwrap(),
        ));
        let dir = tempfile::tempdir().unwrap().into_path();
        let config = Arc::new(AppConfig {
            data_dir: dir.clone(),
            database_url: None,
            bind_addr: "127.0.0.1:0".to_string(),
            sync_interval: Duration::ZERO,
            shutdown_deadline: Duration::from_secs(5),
            hardcover_rate_limit_ms: 1,
            mismatch_output_dir: dir,
            force_full_sync: false,
            defaults: SyncOptions::default(),
            legacy_abs_url: None,
            legacy_abs_token: None,
            legacy_hc_token: None,
        });
        let cache = Arc::new(PersonCache::new(crate::resolver::cache::DEFAULT_TTL));
        (
            Arc::new(Scheduler::new(Arc::clone(&store), config, cache)),
            store,
        )
    }

    #[tokio::test]
    async fn double_start_is_refused() {
        let (scheduler, _store) = test_scheduler().await;
        let id = Uuid::new_v4();
        // Simulate an in-flight sync by registering its handle.
        scheduler
            .active
            .write()
            .unwrap()
            .insert(id, CancellationToken::new());

        let err = scheduler.start_sync(id, false).unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_without_running_sync_is_not_found() {
        let (scheduler, _store) = test_scheduler().await;
        let err = scheduler.cancel_sync(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_profile_ends_in_error_status_and_frees_the_slot() {
        let (scheduler, _store) = test_scheduler().await;
        let id = Uuid::new_v4();
        scheduler.start_sync(id, false).unwrap();

        // The supervised task fails to build an engine and unwinds.
        for _ in 0..100 {
            if !scheduler.is_syncing(id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!scheduler.is_syncing(id));
        let status = scheduler.status(id);
        assert_eq!(status.state, RunState::Error);
        assert!(status.last_sync_ms.is_some());
        // The slot is free again.
        scheduler.start_sync(id, false).unwrap();
    }

    #[tokio::test]
    async fn inactive_profile_is_refused_at_build() {
        let (scheduler, store) = test_scheduler().await;
        let record = store
            .create(NewProfile {
                name: "gone".into(),
                abs_base_url: "http://localhost:1".into(),
                abs_token: "a".into(),
                hc_token: "h".into(),
                options: SyncOptions::default(),
            })
            .await
            .unwrap();
        store.deactivate(record.profile.id).await.unwrap();

        let err = scheduler
            .build_engine(record.profile.id, false, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("inactive"));
    }

    #[tokio::test]
    async fn status_defaults_to_idle() {
        let (scheduler, _store) = test_scheduler().await;
        let status = scheduler.status(Uuid::new_v4());
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.state.as_str(), "idle");
    }
}
