use chrono::{DateTime, Utc};
use poem_openapi::{ApiResponse, Object, payload::Json};
use uuid::Uuid;

use crate::{
    domain::models::{SyncOptions, SyncOptionsPatch, SyncSummary},
    scheduler::ProfileStatus,
    store::ProfileRecord,
};

#[derive(Debug, Clone, Object)]
pub struct ErrorDto {
    /// Human-readable error message
    pub message: String,
}

impl From<String> for ErrorDto {
    fn from(message: String) -> Self {
        ErrorDto { message }
    }
}

#[derive(Debug, Clone, Object)]
pub struct ProfileDto {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub abs_base_url: String,
    /// Tokens never leave the process; only their presence is reported.
    pub has_abs_token: bool,
    pub has_hardcover_token: bool,
    pub options: SyncOptionsDto,
}

impl From<&ProfileRecord> for ProfileDto {
    fn from(record: &ProfileRecord) -> Self {
        ProfileDto {
            id: record.profile.id,
            name: record.profile.name.clone(),
            active: record.profile.active,
            created_at: record.profile.created_at,
            updated_at: record.profile.updated_at,
            abs_base_url: record.config.abs_base_url.clone(),
            has_abs_token: !record.config.abs_token_ciphertext.is_empty(),
            has_hardcover_token: !record.config.hc_token_ciphertext.is_empty(),
            options: record.options().into(),
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct SyncOptionsDto {
    pub incremental: bool,
    pub state_file_override: String,
    pub min_change_threshold_seconds: i64,
    pub libraries_include: Vec<String>,
    pub libraries_exclude: Vec<String>,
    pub sync_interval: String,
    pub minimum_progress: f64,
    pub sync_want_to_read: bool,
    pub process_unread_books: bool,
    pub sync_owned: bool,
    pub include_ebooks: bool,
    pub dry_run: bool,
    pub test_book_filter: String,
    pub test_book_limit: u64,
}

impl From<SyncOptions> for SyncOptionsDto {
    fn from(opts: SyncOptions) -> Self {
        SyncOptionsDto {
            incremental: opts.incremental,
            state_file_override: opts.state_file_override,
            min_change_threshold_seconds: opts.min_change_threshold_seconds,
            libraries_include: opts.libraries.include.into_iter().collect(),
            libraries_exclude: opts.libraries.exclude.into_iter().collect(),
            sync_interval: opts.sync_interval,
            minimum_progress: opts.minimum_progress,
            sync_want_to_read: opts.sync_want_to_read,
            process_unread_books: opts.process_unread_books,
            sync_owned: opts.sync_owned,
            include_ebooks: opts.include_ebooks,
            dry_run: opts.dry_run,
            test_book_filter: opts.test_book_filter,
            test_book_limit: opts.test_book_limit as u64,
        }
    }
}

/// Patch shape for option updates: absent fields leave the stored value
/// alone, explicit booleans replace.
#[derive(Debug, Clone, Default, Object)]
pub struct SyncOptionsPatchDto {
    pub incremental: Option<bool>,
    pub state_file_override: Option<String>,
    pub min_change_threshold_seconds: Option<i64>,
    pub libraries_include: Option<Vec<String>>,
    pub libraries_exclude: Option<Vec<String>>,
    pub sync_interval: Option<String>,
    pub minimum_progress: Option<f64>,
    pub sync_want_to_read: Option<bool>,
    pub process_unread_books: Option<bool>,
    pub sync_owned: Option<bool>,
    pub include_ebooks: Option<bool>,
    pub dry_run: Option<bool>,
    pub test_book_filter: Option<String>,
    pub test_book_limit: Option<u64>,
}

impl SyncOptionsPatchDto {
    pub fn into_patch(self) -> SyncOptionsPatch {
        let libraries = match (&self.libraries_include, &self.libraries_exclude) {
            (None, None) => None,
            (include, exclude) => Some(crate::domain::models::LibraryFilter {
                include: include.clone().unwrap_or_default().into_iter().collect(),
                exclude: exclude.clone().unwrap_or_default().into_iter().collect(),
            }),
        };
        SyncOptionsPatch {
            incremental: self.incremental,
            state_file_override: self.state_file_override,
            min_change_threshold_seconds: self.min_change_threshold_seconds,
            libraries,
            sync_interval: self.sync_interval,
            minimum_progress: self.minimum_progress,
            sync_want_to_read: self.sync_want_to_read,
            process_unread_books: self.process_unread_books,
            sync_owned: self.sync_owned,
            include_ebooks: self.include_ebooks,
            dry_run: self.dry_run,
            test_book_filter: self.test_book_filter,
            test_book_limit: self.test_book_limit.map(|v| v as usize),
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct CreateProfileRequestDto {
    pub name: String,
    pub abs_base_url: String,
    pub abs_token: String,
    pub hardcover_token: String,
    pub options: Option<SyncOptionsPatchDto>,
}

#[derive(Debug, Clone, Default, Object)]
pub struct UpdateProfileRequestDto {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Object)]
pub struct UpdateConfigRequestDto {
    pub abs_base_url: Option<String>,
    /// Empty or absent token fields keep the stored secret.
    pub abs_token: Option<String>,
    pub hardcover_token: Option<String>,
    pub options: Option<SyncOptionsPatchDto>,
}

#[derive(Debug, Clone, Object)]
pub struct SyncSummaryDto {
    pub total_books_processed: u64,
    pub books_synced: u64,
    pub books_not_found: Vec<String>,
    pub mismatch_count: u64,
}

impl From<SyncSummary> for SyncSummaryDto {
    fn from(summary: SyncSummary) -> Self {
        SyncSummaryDto {
            total_books_processed: summary.total_books_processed,
            books_synced: summary.books_synced,
            books_not_found: summary.books_not_found,
            mismatch_count: summary.mismatches.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct ProfileStatusDto {
    /// idle | syncing | completed | error
    pub state: String,
    pub progress: String,
    pub last_sync_ms: Option<i64>,
    pub error: Option<String>,
    pub summary: Option<SyncSummaryDto>,
}

impl ProfileStatusDto {
    pub fn from_status(status: ProfileStatus, summary: Option<SyncSummary>) -> Self {
        ProfileStatusDto {
            state: status.state.as_str().to_string(),
            progress: status.progress,
            last_sync_ms: status.last_sync_ms,
            error: status.error,
            summary: summary.map(SyncSummaryDto::from),
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct SystemStatusEntryDto {
    pub id: Uuid,
    pub name: String,
    pub status: ProfileStatusDto,
}

// ===== Response enums =====

#[derive(ApiResponse)]
pub enum ProfileListResponseDto {
    #[oai(status = 200)]
    Ok(Json<Vec<ProfileDto>>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ProfileResponseDto {
    #[oai(status = 200)]
    Ok(Json<ProfileDto>),

    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum CreateProfileResponseDto {
    #[oai(status = 201)]
    Created(Json<ProfileDto>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),

    #[oai(status = 409)]
    Conflict(Json<ErrorDto>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum DeleteProfileResponseDto {
    #[oai(status = 204)]
    NoContent,

    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum SyncStartResponseDto {
    /// Sync accepted and running in the background
    #[oai(status = 202)]
    Accepted(Json<ProfileStatusDto>),

    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    /// A sync is already running for this profile
    #[oai(status = 409)]
    Conflict(Json<ErrorDto>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum SyncCancelResponseDto {
    #[oai(status = 202)]
    Accepted,

    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ProfileStatusResponseDto {
    #[oai(status = 200)]
    Ok(Json<ProfileStatusDto>),

    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum SystemStatusResponseDto {
    #[oai(status = 200)]
    Ok(Json<Vec<SystemStatusEntryDto>>),

    #[oai(status = 500)]
    Internal(Json<ErrorDto>),
}
