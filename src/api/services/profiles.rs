use std::sync::Arc;

use poem_openapi::payload::Json;
use uuid::Uuid;

use crate::{
    api::models::{
        CreateProfileRequestDto, CreateProfileResponseDto, DeleteProfileResponseDto, ErrorDto,
        ProfileDto, ProfileListResponseDto, ProfileResponseDto, UpdateConfigRequestDto,
        UpdateProfileRequestDto,
    },
    domain::models::SyncOptions,
    error::SyncError,
    scheduler::Scheduler,
    store::{NewProfile, ProfileConfigUpdate, ProfileStore},
};

pub struct ProfileService<'a> {
    pub store: &'a Arc<ProfileStore>,
    pub scheduler: &'a Arc<Scheduler>,
}

impl<'a> ProfileService<'a> {
    pub fn new(store: &'a Arc<ProfileStore>, scheduler: &'a Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list(&self) -> ProfileListResponseDto {
        match self.store.list(false).await {
            Ok(records) => {
                ProfileListResponseDto::Ok(Json(records.iter().map(ProfileDto::from).collect()))
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "failed to list profiles");
                ProfileListResponseDto::Internal(Json(ErrorDto::from(e.to_string())))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, req))]
    pub async fn create(&self, req: CreateProfileRequestDto) -> CreateProfileResponseDto {
        if req.name.trim().is_empty() {
            return CreateProfileResponseDto::BadRequest(Json(ErrorDto::from(
                "name is required".to_string(),
            )));
        }
        if req.abs_base_url.trim().is_empty()
            || req.abs_token.is_empty()
            || req.hardcover_token.is_empty()
        {
            return CreateProfileResponseDto::BadRequest(Json(ErrorDto::from(
                "abs_base_url, abs_token and hardcover_token are required".to_string(),
            )));
        }

        let mut options = SyncOptions::default();
        if let Some(patch) = req.options {
            options.merge(&patch.into_patch());
        }

        let new = NewProfile {
            name: req.name.trim().to_string(),
            abs_base_url: req.abs_base_url.trim_end_matches('/').to_string(),
            abs_token: req.abs_token,
            hc_token: req.hardcover_token,
            options,
        };
        match self.store.create(new).await {
            Ok(record) => CreateProfileResponseDto::Created(Json(ProfileDto::from(&record))),
            Err(e) => match e.downcast_ref::<SyncError>() {
                Some(SyncError::Conflict(_)) => {
                    CreateProfileResponseDto::Conflict(Json(ErrorDto::from(e.to_string())))
                }
                _ => {
                    tracing::error!(error = %format!("{e:#}"), "failed to create profile");
                    CreateProfileResponseDto::Internal(Json(ErrorDto::from(e.to_string())))
                }
            },
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, id: Uuid) -> ProfileResponseDto {
        match self.store.get(id).await {
            Ok(record) => ProfileResponseDto::Ok(Json(ProfileDto::from(&record))),
            Err(e) => match e.downcast_ref::<SyncError>() {
                Some(SyncError::NotFound(_)) => {
                    ProfileResponseDto::NotFound(Json(ErrorDto::from(e.to_string())))
                }
                _ => ProfileResponseDto::Internal(Json(ErrorDto::from(e.to_string()))),
            },
        }
    }

    #[tracing::instrument(level = "debug", skip(self, req))]
    pub async fn update(&self, id: Uuid, req: UpdateProfileRequestDto) -> ProfileResponseDto {
        let result = match req.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => self.store.rename(id, name.trim().to_string()).await,
            None => self.store.get(id).await,
        };
        match result {
            Ok(record) => ProfileResponseDto::Ok(Json(ProfileDto::from(&record))),
            Err(e) => match e.downcast_ref::<SyncError>() {
                Some(SyncError::NotFound(_)) => {
                    ProfileResponseDto::NotFound(Json(ErrorDto::from(e.to_string())))
                }
                _ => ProfileResponseDto::Internal(Json(ErrorDto::from(e.to_string()))),
            },
        }
    }

    #[tracing::instrument(level = "debug", skip(self, req))]
    pub async fn update_config(&self, id: Uuid, req: UpdateConfigRequestDto) -> ProfileResponseDto {
        let update = ProfileConfigUpdate {
            abs_base_url: req.abs_base_url,
            abs_token: req.abs_token,
            hc_token: req.hardcover_token,
            options: req.options.map(|o| o.into_patch()),
        };
        match self.store.update_config(id, update).await {
            Ok(record) => ProfileResponseDto::Ok(Json(ProfileDto::from(&record))),
            Err(e) => match e.downcast_ref::<SyncError>() {
                Some(SyncError::NotFound(_)) => {
                    ProfileResponseDto::NotFound(Json(ErrorDto::from(e.to_string())))
                }
                _ => {
                    tracing::error!(error = %format!("{e:#}"), "failed to update profile config");
                    ProfileResponseDto::Internal(Json(ErrorDto::from(e.to_string())))
                }
            },
        }
    }

    /// Soft delete: deactivate the profile and cancel any in-flight sync.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete(&self, id: Uuid) -> DeleteProfileResponseDto {
        match self.store.deactivate(id).await {
            Ok(()) => {
                let _ = self.scheduler.cancel_sync(id);
                DeleteProfileResponseDto::NoContent
            }
            Err(e) => match e.downcast_ref::<SyncError>() {
                Some(SyncError::NotFound(_)) => {
                    DeleteProfileResponseDto::NotFound(Json(ErrorDto::from(e.to_string())))
                }
                _ => DeleteProfileResponseDto::Internal(Json(ErrorDto::from(e.to_string()))),
            },
        }
    }
}
