// Per-profile sync engine: fetch candidate items from ABS, resolve each to
// a Hardcover identity, decide status/progress, mutate, and account for
// everything in a snapshot-able summary.

pub mod state;

use std::{path::PathBuf, sync::Arc, sync::Mutex};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    abs_client::AbsClient,
    decision::{Decision, TargetState, decide},
    domain::{
        mapping::join_items_with_progress,
        models::{BookMismatch, SourceItem, SyncOptions, SyncSummary},
    },
    error::{AbsHardcoverResult, SyncError, is_cancellation},
    mismatch::MismatchRecorder,
    mutation::Mutator,
    resolver::{ResolveOutcome, Resolver, cache::PersonCache},
    hardcover::HardcoverOps,
    store::{ProfileStore, SyncStateUpdate},
    sync::state::SyncStateFile,
};
use entities::profile_sync_state;

/// A run this much after the last full sync is promoted to a full sync.
pub const FULL_SYNC_MAX_AGE_DAYS: i64 = 7;
/// Incremental runs re-fetch this far behind the last cursor.
pub const INCREMENTAL_OVERLAP_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub success: bool,
    pub cancelled: bool,
    pub full_sync: bool,
    pub processed: u64,
    pub synced: u64,
    pub duration_ms: i64,
    pub error: Option<String>,
}

pub struct EngineParams {
    pub profile_id: Uuid,
    pub profile_name: String,
    pub opts: SyncOptions,
    pub force_full: bool,
    pub abs: AbsClient,
    pub hc: Arc<dyn HardcoverOps>,
    pub cache: Arc<PersonCache>,
    pub store: Arc<ProfileStore>,
    pub mismatch_dir: PathBuf,
    pub cancel: CancellationToken,
}

pub struct SyncEngine {
    profile_id: Uuid,
    profile_name: String,
    opts: SyncOptions,
    force_full: bool,
    abs: AbsClient,
    hc: Arc<dyn HardcoverOps>,
    resolver: Resolver,
    store: Arc<ProfileStore>,
    recorder: MismatchRecorder,
    cancel: CancellationToken,
    summary: Mutex<SyncSummary>,
    progress: Mutex<String>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("profile_id", &self.profile_id)
            .field("profile_name", &self.profile_name)
            .field("force_full", &self.force_full)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(params: EngineParams) -> Self {
        let resolver = Resolver::new(Arc::clone(&params.hc), params.cache);
        SyncEngine {
            profile_id: params.profile_id,
            profile_name: params.profile_name,
            opts: params.opts,
            force_full: params.force_full,
            abs: params.abs,
            hc: params.hc,
            resolver,
            store: params.store,
            recorder: MismatchRecorder::new(params.mismatch_dir),
            cancel: params.cancel,
            summary: Mutex::new(SyncSummary::default()),
            progress: Mutex::new("idle".to_string()),
        }
    }

    /// Snapshot of the running counters. Always a deep copy; observers
    /// never see the live structure.
    pub fn get_summary(&self) -> SyncSummary {
        self.summary.lock().unwrap().clone()
    }

    pub fn progress_text(&self) -> String {
        self.progress.lock().unwrap().clone()
    }

    fn set_progress(&self, text: impl Into<String>) {
        *self.progress.lock().unwrap() = text.into();
    }

    #[tracing::instrument(level = "info", skip(self), fields(profile = %self.profile_name))]
    pub async fn run(&self) -> RunReport {
        let timer = std::time::Instant::now();
        self.set_progress("Starting sync");

        let state_before = match self.store.get(self.profile_id).await {
            Ok(record) => record.state,
            Err(e) => {
                tracing::error!(error = %e, "cannot load profile state");
                return RunReport {
                    error: Some(e.to_string()),
                    duration_ms: timer.elapsed().as_millis() as i64,
                    ..Default::default()
                };
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let full_sync = should_perform_full_sync(&state_before, self.force_full, now_ms);
        tracing::info!(full_sync, "sync run starting");

        let result = self.run_inner(full_sync, &state_before).await;
        let duration_ms = timer.elapsed().as_millis() as i64;
        let summary = self.get_summary();

        let mut report = RunReport {
            success: result.is_ok(),
            cancelled: false,
            full_sync,
            processed: summary.total_books_processed,
            synced: summary.books_synced,
            duration_ms,
            error: None,
        };
        if let Err(e) = &result {
            if is_cancellation(e) {
                report.cancelled = true;
                self.set_progress("Sync canceled");
                tracing::info!("sync canceled");
            } else {
                report.error = Some(e.to_string());
                self.set_progress(format!("Sync failed: {e}"));
                tracing::error!(error = %format!("{e:#}"), "sync failed");
            }
        } else {
            self.set_progress(format!(
                "Synced {}/{} books",
                report.synced, report.processed
            ));
            tracing::info!(
                processed = report.processed,
                synced = report.synced,
                mismatches = summary.mismatches.len(),
                duration_ms,
                "sync finished"
            );
        }

        self.persist(&report, now_ms, &state_before).await;
        report
    }

    async fn run_inner(
        &self,
        full_sync: bool,
        state_before: &profile_sync_state::Model,
    ) -> AbsHardcoverResult<()> {
        self.check_cancelled()?;
        let libraries = self.abs.get_libraries().await?;
        self.check_cancelled()?;

        let me = self.abs.get_me().await?;
        self.check_cancelled()?;

        let mut items = Vec::new();
        for library in &libraries.libraries {
            if library.media_type.as_deref() == Some("podcast") {
                continue;
            }
            if !self.opts.libraries.allows(&library.id) {
                continue;
            }
            self.set_progress(format!("Fetching library {}", library.name));
            let library_items = self.abs.list_all_library_items(&library.id).await?;
            items.extend(library_items);
            self.check_cancelled()?;
        }

        let source_items = join_items_with_progress(self.abs.base_url(), &items, &me.media_progress);
        let cutoff = if full_sync || !self.opts.incremental {
            None
        } else {
            Some((state_before.last_sync_timestamp_ms - INCREMENTAL_OVERLAP_MS).max(0))
        };
        let candidates = filter_items(source_items, &self.opts, cutoff);
        tracing::info!(candidates = candidates.len(), "items selected for sync");

        let user_id = self.hc.current_user_id().await?;
        self.process_items(&candidates, user_id).await
    }

    pub(crate) async fn process_items(
        &self,
        items: &[SourceItem],
        user_id: i64,
    ) -> AbsHardcoverResult<()> {
        let today = Utc::now().date_naive();
        let total = items.len();
        for (index, item) in items.iter().enumerate() {
            self.check_cancelled()?;
            self.set_progress(format!("Syncing {}/{}: {}", index + 1, total, item.title));

            match self.process_one(item, user_id, today).await {
                Ok(()) => {}
                Err(e) if is_cancellation(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(item = %item.title, error = %format!("{e:#}"), "item failed, continuing");
                    let mut summary = self.summary.lock().unwrap();
                    summary.total_books_processed += 1;
                    summary.books_not_found.push(item.title.clone());
                }
            }
        }
        Ok(())
    }

    async fn process_one(
        &self,
        item: &SourceItem,
        user_id: i64,
        today: chrono::NaiveDate,
    ) -> AbsHardcoverResult<()> {
        let outcome = self.resolver.resolve(item).await?;
        let resolution = match outcome {
            ResolveOutcome::Resolved(resolution) => resolution,
            ResolveOutcome::Mismatch(failure) => {
                let mismatch = BookMismatch {
                    title: item.title.clone(),
                    author: item.primary_author().unwrap_or_default().to_string(),
                    isbn: item
                        .isbn13
                        .clone()
                        .or_else(|| item.isbn10.clone())
                        .unwrap_or_default(),
                    asin: item.asin.clone().unwrap_or_default(),
                    reason: failure.reason,
                    timestamp: Utc::now().timestamp(),
                    attempts: failure.attempts,
                    book_id: failure.book_id,
                    edition_id: None,
                    canonical_id: failure.canonical_id,
                    cover_url: item.cover_url.clone(),
                    duration_seconds: item.total_duration_seconds,
                };
                if let Err(e) = self.recorder.record(&mismatch) {
                    tracing::warn!(error = %e, "could not write mismatch artifact");
                }
                let mut summary = self.summary.lock().unwrap();
                summary.total_books_processed += 1;
                summary.books_not_found.push(item.title.clone());
                summary.mismatches.push(mismatch);
                return Ok(());
            }
        };

        let existing = self
            .hc
            .get_user_book(user_id, resolution.identity.book_id)
            .await?;
        let reads = match &existing {
            Some(row) => self.hc.list_user_book_reads(row.id).await?,
            None => Vec::new(),
        };
        let target_state = existing.as_ref().map(|row| TargetState {
            status_id: row.status_id,
            reads: reads.clone(),
        });

        match decide(item, &self.opts, target_state.as_ref()) {
            Decision::Skip(reason) => {
                tracing::debug!(item = %item.title, ?reason, "item skipped");
                self.summary.lock().unwrap().total_books_processed += 1;
            }
            Decision::Sync(decision) => {
                if decision.quality_sentinel {
                    tracing::warn!(
                        item = %item.title,
                        current_time = item.current_time_seconds,
                        duration = item.total_duration_seconds,
                        "implausible position reported by source"
                    );
                }
                Mutator::new(self.hc.as_ref(), &self.opts)
                    .apply_with_state(resolution.identity, &decision, existing, reads, today)
                    .await?;
                let mut summary = self.summary.lock().unwrap();
                summary.total_books_processed += 1;
                summary.books_synced += 1;
            }
        }
        Ok(())
    }

    async fn persist(
        &self,
        report: &RunReport,
        now_ms: i64,
        state_before: &profile_sync_state::Model,
    ) {
        let update = SyncStateUpdate {
            success: report.success,
            timestamp_ms: now_ms,
            was_full_sync: report.full_sync,
            books_processed: report.processed.min(i32::MAX as u64) as i32,
            books_synced: report.synced.min(i32::MAX as u64) as i32,
            duration_ms: report.duration_ms,
            error: report.error.clone(),
            run_state: None,
        };
        if let Err(e) = self.store.record_sync_state(self.profile_id, update).await {
            tracing::error!(error = %e, "could not persist sync state");
        }

        if !self.opts.state_file_override.is_empty() {
            let path = PathBuf::from(&self.opts.state_file_override);
            let file = SyncStateFile {
                version: state::STATE_FILE_VERSION.to_string(),
                last_sync_timestamp: now_ms,
                last_full_sync: if report.full_sync && report.success {
                    now_ms
                } else {
                    state_before.last_full_sync_ms
                },
                last_sync_success: report.success,
                last_sync_duration_ms: report.duration_ms,
            };
            if let Err(e) = file.save(&path) {
                tracing::warn!(error = %e, path = %path.display(), "could not write state file");
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Full sync when forced, never fully synced, the last run failed, or the
/// last full sync is older than a week.
pub fn should_perform_full_sync(
    state: &profile_sync_state::Model,
    force: bool,
    now_ms: i64,
) -> bool {
    if force || state.last_full_sync_ms == 0 || !state.last_sync_success {
        return true;
    }
    let age_days = (now_ms - state.last_full_sync_ms) / (24 * 60 * 60 * 1000);
    age_days >= FULL_SYNC_MAX_AGE_DAYS
}

/// Candidate gating: ebooks, incremental cutoff, unstarted items, the test
/// filter, and the test limit, in that order.
pub fn filter_items(
    items: Vec<SourceItem>,
    opts: &SyncOptions,
    incremental_cutoff_ms: Option<i64>,
) -> Vec<SourceItem> {
    let filter = opts.test_book_filter.to_lowercase();
    let mut kept: Vec<SourceItem> = items
        .into_iter()
        .filter(|item| opts.include_ebooks || !item.is_ebook)
        .filter(|item| match incremental_cutoff_ms {
            Some(cutoff) => item.last_updated_ms >= cutoff,
            None => true,
        })
        .filter(|item| {
            let has_signal =
                item.progress > 0.0 || item.current_time_seconds > 0.0 || item.is_finished;
            has_signal || opts.sync_want_to_read || opts.process_unread_books
        })
        .filter(|item| filter.is_empty() || item.title.to_lowercase().contains(&filter))
        .collect();
    if opts.test_book_limit > 0 && kept.len() > opts.test_book_limit {
        kept.truncate(opts.test_book_limit);
    }
    kept
}
