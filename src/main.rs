mod abs_client;
mod api;
mod config;
mod crypto;
mod decision;
mod domain;
mod error;
mod hardcover;
mod mismatch;
mod mutation;
mod resolver;
mod scheduler;
mod store;
mod sync;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use config::AppConfig;
use crypto::TokenCipher;
use domain::models::SyncOptions;
use error::AbsHardcoverResult;
use migration::MigratorTrait;
use poem::{
    EndpointExt, Route, Server,
    listener::TcpListener,
    middleware::{Cors, Tracing as PoemTracing},
};
use poem_openapi::OpenApiService;
use resolver::cache::PersonCache;
use scheduler::Scheduler;
use store::{NewProfile, ProfileStore};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};

#[tokio::main]
async fn main() -> AbsHardcoverResult<()> {
    // Initialize tracing (logs). Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!(
        "{}=info,poem=info,reqwest=warn,h2=warn,sqlx=warn",
        env!("CARGO_PKG_NAME")
    );
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting ABS Hardcover Sync"
    );

    // Load environment variables from .env files
    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Arc::new(AppConfig::load());
    if let Err(e) = config.validate() {
        return Err(error::SyncError::Fatal(e).into());
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let cipher = TokenCipher::load(&config.data_dir)?;

    let db_conn = store::connect(&config).await?;
    migration::Migrator::up(&db_conn, None)
        .await
        .with_context(|| "Failed to run database migrations")?;

    let store = Arc::new(ProfileStore::new(db_conn, cipher));
    seed_legacy_profile(&store, &config).await?;

    let cache = Arc::new(PersonCache::new(resolver::cache::DEFAULT_TTL));
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&cache),
    ));
    cache.spawn_cleanup(scheduler.shutdown_token());
    tokio::spawn(Arc::clone(&scheduler).run_ticker());

    run_poem(store, Arc::clone(&scheduler), Arc::clone(&config)).await?;

    // Signal observed: stop the ticker, cancel in-flight syncs, let them
    // record their terminal state, then exit.
    scheduler.shutdown(config.shutdown_deadline).await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Pre-multi-tenant deployments configured exactly one source/target pair
/// through the environment; seed it as the "default" profile on first boot.
async fn seed_legacy_profile(store: &Arc<ProfileStore>, config: &AppConfig) -> AbsHardcoverResult<()> {
    let Some((abs_url, abs_token, hc_token)) = config.legacy_profile() else {
        return Ok(());
    };
    if store.count().await? > 0 {
        return Ok(());
    }
    let options = SyncOptions {
        sync_interval: String::new(),
        ..config.defaults.clone()
    };
    let record = store
        .create(NewProfile {
            name: "default".to_string(),
            abs_base_url: abs_url,
            abs_token,
            hc_token,
            options,
        })
        .await?;
    tracing::info!(profile_id = %record.profile.id, "seeded legacy single-profile configuration");
    Ok(())
}

pub async fn run_poem(
    store: Arc<ProfileStore>,
    scheduler: Arc<Scheduler>,
    config: Arc<AppConfig>,
) -> AbsHardcoverResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    let api = api::SyncApi { store, scheduler };
    let api_service = OpenApiService::new(api, "ABS Hardcover Sync API", version)
        .server(format!("http://{}", config.bind_addr));
    let ui = api_service.rapidoc();
    let spec = api_service.spec();
    let route = Route::new()
        .nest("/", api_service)
        .nest("/ui", ui)
        .nest("/spec", poem::endpoint::make_sync(move |_| spec.clone()))
        .with(Cors::new())
        .with(PoemTracing);

    let bind_addr = config.bind_addr.clone();
    tracing::info!(%bind_addr, "starting HTTP server");
    Server::new(TcpListener::bind(bind_addr))
        .run_with_graceful_shutdown(
            route,
            async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("signal received, shutting down");
            },
            Some(config.shutdown_deadline),
        )
        .await?;
    Ok(())
}
