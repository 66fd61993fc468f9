pub mod models;
pub mod services;

use std::sync::Arc;

use poem_openapi::{
    OpenApi,
    param::{Path, Query},
    payload::{Json, PlainText},
};
use uuid::Uuid;

use crate::{scheduler::Scheduler, store::ProfileStore};
use models::{
    CreateProfileRequestDto, CreateProfileResponseDto, DeleteProfileResponseDto,
    ProfileListResponseDto, ProfileResponseDto, ProfileStatusResponseDto, SyncCancelResponseDto,
    SyncStartResponseDto, SystemStatusResponseDto, UpdateConfigRequestDto, UpdateProfileRequestDto,
};
use services::{profiles::ProfileService, status::StatusService};

pub struct SyncApi {
    pub store: Arc<ProfileStore>,
    pub scheduler: Arc<Scheduler>,
}

#[OpenApi]
impl SyncApi {
    /// Liveness probe
    #[oai(path = "/healthz", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn healthz(&self) -> PlainText<String> {
        PlainText("ok".to_string())
    }

    /// List all profiles, including deactivated ones
    #[oai(path = "/api/profiles", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_profiles(&self) -> ProfileListResponseDto {
        ProfileService::new(&self.store, &self.scheduler).list().await
    }

    /// Create a profile (tokens are encrypted at rest)
    #[oai(path = "/api/profiles", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn create_profile(&self, body: Json<CreateProfileRequestDto>) -> CreateProfileResponseDto {
        ProfileService::new(&self.store, &self.scheduler)
            .create(body.0)
            .await
    }

    /// Fetch one profile with its config and options
    #[oai(path = "/api/profiles/:id", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, id))]
    async fn get_profile(&self, id: Path<Uuid>) -> ProfileResponseDto {
        ProfileService::new(&self.store, &self.scheduler)
            .get(id.0)
            .await
    }

    /// Rename a profile
    #[oai(path = "/api/profiles/:id", method = "put")]
    #[tracing::instrument(level = "debug", skip(self, id, body))]
    async fn update_profile(
        &self,
        id: Path<Uuid>,
        body: Json<UpdateProfileRequestDto>,
    ) -> ProfileResponseDto {
        ProfileService::new(&self.store, &self.scheduler)
            .update(id.0, body.0)
            .await
    }

    /// Deactivate a profile and cancel its running sync, if any
    #[oai(path = "/api/profiles/:id", method = "delete")]
    #[tracing::instrument(level = "debug", skip(self, id))]
    async fn delete_profile(&self, id: Path<Uuid>) -> DeleteProfileResponseDto {
        ProfileService::new(&self.store, &self.scheduler)
            .delete(id.0)
            .await
    }

    /// Update connection settings and sync options. Empty token fields
    /// preserve the stored secrets.
    #[oai(path = "/api/profiles/:id/config", method = "put")]
    #[tracing::instrument(level = "debug", skip(self, id, body))]
    async fn update_profile_config(
        &self,
        id: Path<Uuid>,
        body: Json<UpdateConfigRequestDto>,
    ) -> ProfileResponseDto {
        ProfileService::new(&self.store, &self.scheduler)
            .update_config(id.0, body.0)
            .await
    }

    /// Current sync status for a profile (live summary while syncing)
    #[oai(path = "/api/profiles/:id/status", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, id))]
    async fn profile_status(&self, id: Path<Uuid>) -> ProfileStatusResponseDto {
        StatusService::new(&self.store, &self.scheduler)
            .profile_status(id.0)
            .await
    }

    /// Start a sync for a profile
    #[oai(path = "/api/profiles/:id/sync", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, id, force_full))]
    async fn start_sync(
        &self,
        id: Path<Uuid>,
        /// Force a full sync regardless of the incremental cursor
        Query(force_full): Query<Option<bool>>,
    ) -> SyncStartResponseDto {
        StatusService::new(&self.store, &self.scheduler)
            .start_sync(id.0, force_full.unwrap_or(false))
            .await
    }

    /// Cancel the running sync for a profile
    #[oai(path = "/api/profiles/:id/sync", method = "delete")]
    #[tracing::instrument(level = "debug", skip(self, id))]
    async fn cancel_sync(&self, id: Path<Uuid>) -> SyncCancelResponseDto {
        StatusService::new(&self.store, &self.scheduler)
            .cancel_sync(id.0)
            .await
    }

    /// Status of every active profile
    #[oai(path = "/api/status", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn system_status(&self) -> SystemStatusResponseDto {
        StatusService::new(&self.store, &self.scheduler)
            .system_status()
            .await
    }
}
