// Status/progress decision engine: turns noisy source signals into a
// target reading status and progress seconds. Pure functions; all I/O
// stays in the callers.

use crate::{
    domain::models::{ReadingStatus, SourceItem, SyncOptions},
    hardcover::UserBookRead,
};

/// Progress fraction at and above which an item counts as finished.
pub const FINISHED_PROGRESS: f64 = 0.99;
/// Effective progress at which a listen is treated as finished early.
pub const NEAR_END_PROGRESS: f64 = 0.95;
/// Remaining seconds at which a listen is treated as finished early.
pub const NEAR_END_REMAINING_SECONDS: f64 = 300.0;

// Millisecond-typo detection: only positions this large with this ratio
// can plausibly be milliseconds.
const MILLIS_MIN_VALUE: f64 = 180_000.0;
const MILLIS_MIN_RATIO: f64 = 100.0;
// A converted position must not exceed the duration by more than this
// factor, otherwise the value is garbage rather than a unit mixup.
const MILLIS_MAX_OVERSHOOT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedTime {
    pub current_time_seconds: f64,
    pub converted_from_millis: bool,
    /// Position was anomalous but conversion would not have explained it;
    /// the raw value is kept and flagged.
    pub quality_sentinel: bool,
}

/// Some sources report positions in milliseconds. Convert only when both
/// the magnitude and the position/duration ratio say so, and refuse when
/// even the converted value would still be far past the end.
pub fn normalize_current_time(current_time: f64, total_duration: f64) -> NormalizedTime {
    let unchanged = NormalizedTime {
        current_time_seconds: current_time,
        converted_from_millis: false,
        quality_sentinel: false,
    };
    if total_duration <= 0.0 || current_time < MILLIS_MIN_VALUE {
        return unchanged;
    }
    let ratio = current_time / total_duration;
    if ratio < MILLIS_MIN_RATIO {
        return unchanged;
    }
    let converted = current_time / 1000.0;
    if converted > total_duration * MILLIS_MAX_OVERSHOOT {
        return NormalizedTime {
            quality_sentinel: true,
            ..unchanged
        };
    }
    NormalizedTime {
        current_time_seconds: converted,
        converted_from_millis: true,
        quality_sentinel: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No listening signals and want-to-read syncing is off.
    NoSignals,
    /// Started, but below the configured minimum progress.
    BelowMinimumProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip(SkipReason),
    Sync(SyncDecision),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncDecision {
    pub status: ReadingStatus,
    pub progress_seconds: i64,
    pub finished: bool,
    /// Target already shows the book read; record a fresh session instead
    /// of touching the finished one.
    pub new_read_session: bool,
    pub converted_from_millis: bool,
    pub quality_sentinel: bool,
}

/// What the target currently knows about this (user, book).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetState {
    pub status_id: i64,
    pub reads: Vec<UserBookRead>,
}

pub fn decide(item: &SourceItem, opts: &SyncOptions, existing: Option<&TargetState>) -> Decision {
    let duration = item.total_duration_seconds;
    let normalized = normalize_current_time(item.current_time_seconds, duration);
    let current_time = normalized.current_time_seconds;
    let progress = item.progress;

    let has_signal = progress > 0.0 || current_time > 0.0 || item.is_finished;

    let mut finished = item.is_finished || progress >= FINISHED_PROGRESS;

    // Some completed listens come back with a near-zero position; a long
    // book with seconds of progress is one of those, not a fresh start.
    if !finished && has_signal && progress < 0.01 && current_time < 60.0 && duration > 1800.0 {
        finished = true;
    }

    // Close enough to the end counts as done.
    if !finished && duration > 0.0 {
        let effective = current_time / duration;
        if effective >= NEAR_END_PROGRESS || duration - current_time <= NEAR_END_REMAINING_SECONDS {
            finished = current_time > 0.0;
        }
    }

    let status = if finished {
        ReadingStatus::Read
    } else if current_time > 0.0 || progress > 0.0 {
        ReadingStatus::CurrentlyReading
    } else if opts.sync_want_to_read {
        ReadingStatus::WantToRead
    } else {
        return Decision::Skip(SkipReason::NoSignals);
    };

    if status == ReadingStatus::CurrentlyReading && progress < opts.minimum_progress {
        return Decision::Skip(SkipReason::BelowMinimumProgress);
    }

    let new_read_session = existing
        .map(|state| {
            state.status_id == ReadingStatus::Read.as_id()
                && status == ReadingStatus::CurrentlyReading
                && progress < FINISHED_PROGRESS
        })
        .unwrap_or(false);

    let progress_seconds = if finished {
        duration.round() as i64
    } else {
        current_time.round() as i64
    };

    Decision::Sync(SyncDecision {
        status,
        progress_seconds,
        finished,
        new_read_session,
        converted_from_millis: normalized.converted_from_millis,
        quality_sentinel: normalized.quality_sentinel,
    })
}

/// Threshold under which a progress delta is noise, not an update:
/// `max(30, 10% of target)`. The configured minimum change can raise the
/// 30-second floor but never lower it; at the default of 30 the formula
/// is exactly the constant one.
pub fn change_threshold(target_seconds: i64, min_floor_seconds: i64) -> i64 {
    let floor = min_floor_seconds.max(30);
    floor.max((target_seconds as f64 * 0.1).round() as i64)
}

pub fn update_suppressed(target_seconds: i64, existing_seconds: i64, min_floor_seconds: i64) -> bool {
    (target_seconds - existing_seconds).abs() <= change_threshold(target_seconds, min_floor_seconds)
}
