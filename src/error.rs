use thiserror::Error;

pub type AbsHardcoverResult<T> = anyhow::Result<T>;

/// Error kinds surfaced across component boundaries. Per-item kinds
/// (`Mismatch`, single-item `Upstream`) never abort a run; per-profile kinds
/// end that profile's run only; `Fatal` terminates the process after
/// graceful shutdown.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored token could not be decrypted. Usually means the encryption
    /// key changed; the token must be re-entered.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    /// No (book, edition) identity could be resolved for an item.
    #[error("no match: {reason}")]
    Mismatch { reason: String },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl SyncError {
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        SyncError::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn already_running(profile_id: uuid::Uuid) -> Self {
        SyncError::Conflict(format!("sync already running for profile {profile_id}"))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

/// True when `err` is (or wraps) a cancellation; cancellations are reported
/// as status transitions, not logged as errors.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SyncError>()
        .map(SyncError::is_cancelled)
        .unwrap_or(false)
}
