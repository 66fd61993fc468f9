use std::sync::Arc;

use poem_openapi::payload::Json;
use uuid::Uuid;

use crate::{
    api::models::{
        ErrorDto, ProfileStatusDto, ProfileStatusResponseDto, SyncCancelResponseDto,
        SyncStartResponseDto, SystemStatusEntryDto, SystemStatusResponseDto,
    },
    error::SyncError,
    scheduler::Scheduler,
    store::ProfileStore,
};

pub struct StatusService<'a> {
    pub store: &'a Arc<ProfileStore>,
    pub scheduler: &'a Arc<Scheduler>,
}

impl<'a> StatusService<'a> {
    pub fn new(store: &'a Arc<ProfileStore>, scheduler: &'a Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn profile_status(&self, id: Uuid) -> ProfileStatusResponseDto {
        if let Err(e) = self.store.get(id).await {
            return match e.downcast_ref::<SyncError>() {
                Some(SyncError::NotFound(_)) => {
                    ProfileStatusResponseDto::NotFound(Json(ErrorDto::from(e.to_string())))
                }
                _ => ProfileStatusResponseDto::Internal(Json(ErrorDto::from(e.to_string()))),
            };
        }
        let status = self.scheduler.status(id);
        let summary = self.scheduler.summary(id);
        ProfileStatusResponseDto::Ok(Json(ProfileStatusDto::from_status(status, summary)))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn system_status(&self) -> SystemStatusResponseDto {
        match self.store.list(true).await {
            Ok(records) => {
                let entries = records
                    .iter()
                    .map(|record| {
                        let id = record.profile.id;
                        SystemStatusEntryDto {
                            id,
                            name: record.profile.name.clone(),
                            status: ProfileStatusDto::from_status(
                                self.scheduler.status(id),
                                self.scheduler.summary(id),
                            ),
                        }
                    })
                    .collect();
                SystemStatusResponseDto::Ok(Json(entries))
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "failed to collect status");
                SystemStatusResponseDto::Internal(Json(ErrorDto::from(e.to_string())))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn start_sync(&self, id: Uuid, force_full: bool) -> SyncStartResponseDto {
        match self.store.get(id).await {
            Ok(record) if record.profile.active => {}
            Ok(_) => {
                return SyncStartResponseDto::NotFound(Json(ErrorDto::from(format!(
                    "profile {id} is inactive"
                ))));
            }
            Err(e) => {
                return match e.downcast_ref::<SyncError>() {
                    Some(SyncError::NotFound(_)) => {
                        SyncStartResponseDto::NotFound(Json(ErrorDto::from(e.to_string())))
                    }
                    _ => SyncStartResponseDto::Internal(Json(ErrorDto::from(e.to_string()))),
                };
            }
        }

        match self.scheduler.start_sync(id, force_full) {
            Ok(()) => {
                let status = self.scheduler.status(id);
                SyncStartResponseDto::Accepted(Json(ProfileStatusDto::from_status(status, None)))
            }
            Err(e @ SyncError::Conflict(_)) => {
                SyncStartResponseDto::Conflict(Json(ErrorDto::from(e.to_string())))
            }
            Err(e) => SyncStartResponseDto::Internal(Json(ErrorDto::from(e.to_string()))),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn cancel_sync(&self, id: Uuid) -> SyncCancelResponseDto {
        match self.scheduler.cancel_sync(id) {
            Ok(()) => SyncCancelResponseDto::Accepted,
            Err(e) => SyncCancelResponseDto::NotFound(Json(ErrorDto::from(e.to_string()))),
        }
    }
}
