// Idempotent target mutations: at most one user_book per (user, book),
// insert-vs-update of user_book_read rows with preserved started_at and a
// non-null edition_id on every write.

use chrono::NaiveDate;

use crate::{
    decision::{SyncDecision, update_suppressed},
    domain::models::{BookIdentity, SyncOptions},
    error::AbsHardcoverResult,
    hardcover::{DatesReadInput, HardcoverOps, READING_FORMAT_AUDIOBOOK, UserBookRead},
};

/// Stable sentinel ids reported for writes skipped in dry-run mode.
pub const DRY_RUN_USER_BOOK_ID: i64 = -1;
pub const DRY_RUN_READ_ID: i64 = -2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationOutcome {
    pub user_book_id: i64,
    pub created_user_book: bool,
    /// A read row was inserted or updated.
    pub wrote_read: bool,
    /// An update was withheld because the progress delta was under the
    /// change threshold.
    pub suppressed: bool,
}

pub struct Mutator<'a> {
    ops: &'a dyn HardcoverOps,
    opts: &'a SyncOptions,
}

impl<'a> Mutator<'a> {
    pub fn new(ops: &'a dyn HardcoverOps, opts: &'a SyncOptions) -> Self {
        Mutator { ops, opts }
    }

    pub async fn apply(
        &self,
        user_id: i64,
        identity: BookIdentity,
        decision: &SyncDecision,
        today: NaiveDate,
    ) -> AbsHardcoverResult<MutationOutcome> {
        let existing = self.ops.get_user_book(user_id, identity.book_id).await?;
        let reads = match &existing {
            Some(row) => self.ops.list_user_book_reads(row.id).await?,
            None => Vec::new(),
        };
        self.apply_with_state(identity, decision, existing, reads, today)
            .await
    }

    /// Like `apply`, but with the target's current rows already in hand —
    /// the sync engine fetches them once for the decision step and passes
    /// them through rather than re-probing the API.
    #[tracing::instrument(level = "debug", skip(self, decision, existing, reads))]
    pub async fn apply_with_state(
        &self,
        identity: BookIdentity,
        decision: &SyncDecision,
        existing: Option<crate::hardcover::UserBookRow>,
        reads: Vec<UserBookRead>,
        today: NaiveDate,
    ) -> AbsHardcoverResult<MutationOutcome> {
        let mut outcome = MutationOutcome::default();
        let status_id = decision.status.as_id();

        let user_book_id = match &existing {
            Some(row) => {
                if row.status_id != status_id {
                    if self.opts.dry_run {
                        tracing::info!(
                            user_book_id = row.id,
                            from = row.status_id,
                            to = status_id,
                            "dry-run: would update user_book status"
                        );
                    } else {
                        self.ops.update_user_book_status(row.id, status_id).await?;
                    }
                }
                row.id
            }
            None => {
                outcome.created_user_book = true;
                if self.opts.dry_run {
                    tracing::info!(
                        book_id = identity.book_id,
                        edition_id = identity.edition_id,
                        status_id,
                        "dry-run: would insert user_book"
                    );
                    DRY_RUN_USER_BOOK_ID
                } else {
                    self.ops
                        .insert_user_book(identity.book_id, status_id, Some(identity.edition_id))
                        .await?
                }
            }
        };
        outcome.user_book_id = user_book_id;

        let target_row = if decision.new_read_session {
            None
        } else {
            select_read_row(&reads, identity.edition_id)
        };

        match target_row {
            Some(row) => {
                let existing_seconds = row.progress_seconds.unwrap_or(0);
                let edition_settled = row.edition_id == Some(identity.edition_id);
                let finish_settled = row.finished_at.is_some() == decision.finished;
                if edition_settled
                    && finish_settled
                    && update_suppressed(
                        decision.progress_seconds,
                        existing_seconds,
                        self.opts.min_change_threshold_seconds,
                    )
                {
                    outcome.suppressed = true;
                    tracing::debug!(
                        read_id = row.id,
                        target = decision.progress_seconds,
                        existing = existing_seconds,
                        "progress delta under threshold, skipping update"
                    );
                    return Ok(self.maybe_mark_owned(outcome, existing.as_ref()).await?);
                }

                // started_at is intentionally absent: prior start dates are
                // never overwritten.
                let input = DatesReadInput {
                    progress_seconds: Some(decision.progress_seconds),
                    reading_format_id: Some(READING_FORMAT_AUDIOBOOK),
                    edition_id: Some(identity.edition_id),
                    finished_at: row
                        .finished_at
                        .or(if decision.finished { Some(today) } else { None }),
                    ..Default::default()
                };
                if self.opts.dry_run {
                    tracing::info!(read_id = row.id, "dry-run: would update user_book_read");
                } else {
                    self.ops.update_user_book_read(row.id, &input).await?;
                }
                outcome.wrote_read = true;
            }
            None => {
                let input = DatesReadInput {
                    progress_seconds: Some(decision.progress_seconds),
                    reading_format_id: Some(READING_FORMAT_AUDIOBOOK),
                    edition_id: Some(identity.edition_id),
                    started_at: Some(today),
                    finished_at: if decision.finished { Some(today) } else { None },
                    ..Default::default()
                };
                if self.opts.dry_run {
                    tracing::info!(
                        user_book_id,
                        read_id = DRY_RUN_READ_ID,
                        "dry-run: would insert user_book_read"
                    );
                } else {
                    self.ops.insert_user_book_read(user_book_id, &input).await?;
                }
                outcome.wrote_read = true;
            }
        }

        Ok(self.maybe_mark_owned(outcome, existing.as_ref()).await?)
    }

    async fn maybe_mark_owned(
        &self,
        outcome: MutationOutcome,
        existing: Option<&crate::hardcover::UserBookRow>,
    ) -> AbsHardcoverResult<MutationOutcome> {
        if !self.opts.sync_owned {
            return Ok(outcome);
        }
        let already_owned = existing.map(|row| row.owned == Some(true)).unwrap_or(false);
        if already_owned {
            return Ok(outcome);
        }
        if self.opts.dry_run {
            tracing::info!(user_book_id = outcome.user_book_id, "dry-run: would mark owned");
        } else if outcome.user_book_id != DRY_RUN_USER_BOOK_ID {
            self.ops.mark_owned(outcome.user_book_id).await?;
        }
        Ok(outcome)
    }
}

/// Row selection: the most recent read matching this edition, falling
/// back to rows with no edition recorded (a historical data-quality gap
/// this layer repairs on its next write).
fn select_read_row(reads: &[UserBookRead], edition_id: i64) -> Option<&UserBookRead> {
    reads
        .iter()
        .filter(|r| r.edition_id == Some(edition_id))
        .max_by_key(|r| r.id)
        .or_else(|| {
            reads
                .iter()
                .filter(|r| r.edition_id.is_none())
                .max_by_key(|r| r.id)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decision::{Decision, TargetState, decide},
        domain::models::{ReadingStatus, SourceItem},
        hardcover::{UserBookRow, fake::FakeHardcover},
    };

    const USER: i64 = 500;
    const BOOK: i64 = 1_348_061;
    const EDITION: i64 = 9_001;

    fn identity() -> BookIdentity {
        BookIdentity {
            book_id: BOOK,
            edition_id: EDITION,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn reading_decision(progress_seconds: i64) -> SyncDecision {
        SyncDecision {
            status: ReadingStatus::CurrentlyReading,
            progress_seconds,
            finished: false,
            new_read_session: false,
            converted_from_millis: false,
            quality_sentinel: false,
        }
    }

    #[tokio::test]
    async fn first_time_read_inserts_user_book_and_read() {
        // Scenario: ASIN hit on a fresh book, halfway through.
        let fake = FakeHardcover::new(USER);
        let opts = SyncOptions::default();
        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &reading_decision(1800), today())
            .await
            .unwrap();

        assert!(outcome.created_user_book);
        assert!(outcome.wrote_read);
        assert!(!outcome.suppressed);

        let state = fake.state.lock().unwrap();
        assert_eq!(state.user_books.len(), 1);
        let ub = &state.user_books[0];
        assert_eq!(ub.status_id, 2);
        assert_eq!(ub.edition_id, Some(EDITION));
        assert_eq!(state.inserted_reads.len(), 1);
        let (_, input) = &state.inserted_reads[0];
        assert_eq!(input.progress_seconds, Some(1800));
        assert_eq!(input.edition_id, Some(EDITION));
        assert_eq!(input.reading_format_id, Some(2));
        assert_eq!(input.started_at, Some(today()));
        assert_eq!(input.finished_at, None);
        // Ownership follows a fresh user_book.
        assert_eq!(state.mark_owned_calls, 1);
    }

    #[tokio::test]
    async fn reread_inserts_new_session_and_leaves_prior_row() {
        let fake = FakeHardcover::new(USER);
        fake.seed_user_book(UserBookRow {
            id: 77,
            user_id: USER,
            book_id: BOOK,
            status_id: 3,
            edition_id: Some(EDITION),
            owned: Some(true),
        });
        fake.seed_read(UserBookRead {
            id: 10,
            user_book_id: 77,
            progress_seconds: Some(3600),
            started_at: NaiveDate::from_ymd_opt(2024, 1, 2),
            finished_at: NaiveDate::from_ymd_opt(2024, 1, 10),
            edition_id: Some(EDITION),
            reading_format_id: Some(2),
        });

        let decision = SyncDecision {
            new_read_session: true,
            ..reading_decision(1800)
        };
        let opts = SyncOptions::default();
        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &decision, today())
            .await
            .unwrap();
        assert!(!outcome.created_user_book);
        assert!(outcome.wrote_read);

        let state = fake.state.lock().unwrap();
        // Prior finished session untouched.
        let prior = state.reads.iter().find(|r| r.id == 10).unwrap();
        assert_eq!(prior.progress_seconds, Some(3600));
        assert_eq!(prior.finished_at, NaiveDate::from_ymd_opt(2024, 1, 10));
        // New session dated today with the same edition.
        assert_eq!(state.inserted_reads.len(), 1);
        let (_, input) = &state.inserted_reads[0];
        assert_eq!(input.started_at, Some(today()));
        assert_eq!(input.progress_seconds, Some(1800));
        assert_eq!(input.edition_id, Some(EDITION));
        // Status moved from read back to currently-reading.
        assert_eq!(state.status_updates, 1);
    }

    #[tokio::test]
    async fn small_progress_delta_is_suppressed() {
        // Existing 1820, target 1800: threshold max(30, 180) = 180.
        let fake = FakeHardcover::new(USER);
        fake.seed_user_book(UserBookRow {
            id: 77,
            user_id: USER,
            book_id: BOOK,
            status_id: 2,
            edition_id: Some(EDITION),
            owned: Some(true),
        });
        fake.seed_read(UserBookRead {
            id: 10,
            user_book_id: 77,
            progress_seconds: Some(1820),
            started_at: NaiveDate::from_ymd_opt(2024, 5, 1),
            finished_at: None,
            edition_id: Some(EDITION),
            reading_format_id: Some(2),
        });

        let opts = SyncOptions::default();
        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &reading_decision(1800), today())
            .await
            .unwrap();
        assert!(outcome.suppressed);
        assert!(!outcome.wrote_read);
        assert_eq!(fake.state.lock().unwrap().mutation_count(), 0);
    }

    #[tokio::test]
    async fn short_book_delta_above_constant_floor_is_written() {
        // Target 400, existing 450: threshold is max(30, 40) = 40 under
        // default options, so the 50-second delta must go out.
        let fake = FakeHardcover::new(USER);
        fake.seed_user_book(UserBookRow {
            id: 77,
            user_id: USER,
            book_id: BOOK,
            status_id: 2,
            edition_id: Some(EDITION),
            owned: Some(true),
        });
        fake.seed_read(UserBookRead {
            id: 10,
            user_book_id: 77,
            progress_seconds: Some(450),
            started_at: NaiveDate::from_ymd_opt(2024, 5, 1),
            finished_at: None,
            edition_id: Some(EDITION),
            reading_format_id: Some(2),
        });

        let opts = SyncOptions::default();
        let item = SourceItem {
            progress: 0.11,
            current_time_seconds: 400.0,
            total_duration_seconds: 3600.0,
            ..Default::default()
        };
        let existing = TargetState {
            status_id: 2,
            reads: fake.state.lock().unwrap().reads.clone(),
        };
        let decision = match decide(&item, &opts, Some(&existing)) {
            Decision::Sync(d) => d,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decision.progress_seconds, 400);

        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &decision, today())
            .await
            .unwrap();
        assert!(!outcome.suppressed);
        assert!(outcome.wrote_read);

        let state = fake.state.lock().unwrap();
        assert_eq!(state.updated_reads.len(), 1);
        let (_, input) = &state.updated_reads[0];
        assert_eq!(input.progress_seconds, Some(400));
    }

    #[tokio::test]
    async fn update_never_carries_started_at() {
        let fake = FakeHardcover::new(USER);
        fake.seed_user_book(UserBookRow {
            id: 77,
            user_id: USER,
            book_id: BOOK,
            status_id: 2,
            edition_id: Some(EDITION),
            owned: Some(true),
        });
        let original_start = NaiveDate::from_ymd_opt(2024, 5, 1);
        fake.seed_read(UserBookRead {
            id: 10,
            user_book_id: 77,
            progress_seconds: Some(600),
            started_at: original_start,
            finished_at: None,
            edition_id: Some(EDITION),
            reading_format_id: Some(2),
        });

        let opts = SyncOptions::default();
        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &reading_decision(2400), today())
            .await
            .unwrap();
        assert!(outcome.wrote_read);

        let state = fake.state.lock().unwrap();
        assert_eq!(state.updated_reads.len(), 1);
        let (_, input) = &state.updated_reads[0];
        assert_eq!(input.started_at, None);
        assert_eq!(input.progress_seconds, Some(2400));
        // And the stored row still has the original start date.
        let row = state.reads.iter().find(|r| r.id == 10).unwrap();
        assert_eq!(row.started_at, original_start);
    }

    #[tokio::test]
    async fn null_edition_row_is_adopted_and_repaired() {
        let fake = FakeHardcover::new(USER);
        fake.seed_user_book(UserBookRow {
            id: 77,
            user_id: USER,
            book_id: BOOK,
            status_id: 2,
            edition_id: Some(EDITION),
            owned: Some(true),
        });
        fake.seed_read(UserBookRead {
            id: 10,
            user_book_id: 77,
            progress_seconds: Some(600),
            started_at: NaiveDate::from_ymd_opt(2024, 5, 1),
            finished_at: None,
            edition_id: None,
            reading_format_id: Some(2),
        });

        let opts = SyncOptions::default();
        Mutator::new(&fake, &opts)
            .apply(USER, identity(), &reading_decision(2400), today())
            .await
            .unwrap();

        let state = fake.state.lock().unwrap();
        // Updated rather than inserted, and the edition gap was filled.
        assert_eq!(state.inserted_reads.len(), 0);
        let row = state.reads.iter().find(|r| r.id == 10).unwrap();
        assert_eq!(row.edition_id, Some(EDITION));
    }

    #[tokio::test]
    async fn finish_sets_finished_at_today_and_preserves_existing() {
        let fake = FakeHardcover::new(USER);
        fake.seed_user_book(UserBookRow {
            id: 77,
            user_id: USER,
            book_id: BOOK,
            status_id: 2,
            edition_id: Some(EDITION),
            owned: Some(true),
        });
        fake.seed_read(UserBookRead {
            id: 10,
            user_book_id: 77,
            progress_seconds: Some(3000),
            started_at: NaiveDate::from_ymd_opt(2024, 5, 1),
            finished_at: None,
            edition_id: Some(EDITION),
            reading_format_id: Some(2),
        });

        let decision = SyncDecision {
            status: ReadingStatus::Read,
            progress_seconds: 3600,
            finished: true,
            new_read_session: false,
            converted_from_millis: false,
            quality_sentinel: false,
        };
        let opts = SyncOptions::default();
        Mutator::new(&fake, &opts)
            .apply(USER, identity(), &decision, today())
            .await
            .unwrap();

        let state = fake.state.lock().unwrap();
        let (_, input) = &state.updated_reads[0];
        assert_eq!(input.finished_at, Some(today()));
    }

    #[tokio::test]
    async fn second_identical_run_issues_zero_mutations() {
        // Idempotence: everything the first run wrote satisfies the second.
        let fake = FakeHardcover::new(USER);
        let opts = SyncOptions::default();
        let item = SourceItem {
            progress: 0.5,
            current_time_seconds: 1800.0,
            total_duration_seconds: 3600.0,
            ..Default::default()
        };

        let first = match decide(&item, &opts, None) {
            Decision::Sync(d) => d,
            other => panic!("unexpected {other:?}"),
        };
        Mutator::new(&fake, &opts)
            .apply(USER, identity(), &first, today())
            .await
            .unwrap();
        let after_first = fake.state.lock().unwrap().mutation_count();
        assert!(after_first > 0);

        let status_id = fake.state.lock().unwrap().user_books[0].status_id;
        let reads = fake.state.lock().unwrap().reads.clone();
        let existing = TargetState { status_id, reads };
        let second = match decide(&item, &opts, Some(&existing)) {
            Decision::Sync(d) => d,
            other => panic!("unexpected {other:?}"),
        };
        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &second, today())
            .await
            .unwrap();

        assert!(outcome.suppressed);
        assert_eq!(fake.state.lock().unwrap().mutation_count(), after_first);
    }

    #[tokio::test]
    async fn dry_run_issues_no_mutations_and_reports_sentinels() {
        let fake = FakeHardcover::new(USER);
        let opts = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        let outcome = Mutator::new(&fake, &opts)
            .apply(USER, identity(), &reading_decision(1800), today())
            .await
            .unwrap();

        assert_eq!(outcome.user_book_id, DRY_RUN_USER_BOOK_ID);
        assert!(outcome.created_user_book);
        assert!(outcome.wrote_read);
        assert_eq!(fake.state.lock().unwrap().mutation_count(), 0);
    }

    #[tokio::test]
    async fn sync_owned_disabled_never_marks() {
        let fake = FakeHardcover::new(USER);
        let opts = SyncOptions {
            sync_owned: false,
            ..Default::default()
        };
        Mutator::new(&fake, &opts)
            .apply(USER, identity(), &reading_decision(1800), today())
            .await
            .unwrap();
        assert_eq!(fake.state.lock().unwrap().mark_owned_calls, 0);
    }
}
