use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ephemera::app::auth::AuthService;
use ephemera::app::intake::MediaIntake;
use ephemera::app::stories::StoryService;
use ephemera::app::views::ViewLedger;
use ephemera::config::{AppConfig, AppMode};
use ephemera::http;
use ephemera::infra::cache::RedisCache;
use ephemera::infra::clock::SystemClock;
use ephemera::infra::db::Db;
use ephemera::infra::memory::{MemoryObjectStore, MemoryStoryRepository};
use ephemera::infra::repo::{PgStoryRepository, StoryRepository};
use ephemera::infra::storage::{ObjectStore, S3ObjectStorage};
use ephemera::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let state = match config.app_mode {
        AppMode::Api => api_state(&config).await?,
        AppMode::Standalone => standalone_state(&config)?,
    };

    let app = http::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(mode = ?config.app_mode, "listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn api_state(config: &AppConfig) -> Result<AppState> {
    let db = Db::connect(config).await?;
    if let Some(dir) = &config.migrations_dir {
        db.run_migrations(Path::new(dir)).await?;
    }
    let cache = RedisCache::connect(&config.redis_url).await?;
    let storage: Arc<dyn ObjectStore> = Arc::new(S3ObjectStorage::new(config).await?);
    let repo: Arc<dyn StoryRepository> = Arc::new(PgStoryRepository::new(db));

    let stories = StoryService::new(repo.clone(), storage, Arc::new(SystemClock))
        .with_feed_cache(cache.clone(), config.stories_feed_cache_ttl_seconds);

    Ok(build_state(config, stories, repo, Some(cache)))
}

fn standalone_state(config: &AppConfig) -> Result<AppState> {
    tracing::warn!("standalone mode: stories and media are kept in memory only");
    let public_endpoint = config
        .s3_public_endpoint
        .as_deref()
        .unwrap_or(&config.s3_endpoint);
    let storage: Arc<dyn ObjectStore> =
        Arc::new(MemoryObjectStore::new(public_endpoint, &config.s3_bucket)?);
    let repo: Arc<dyn StoryRepository> = Arc::new(MemoryStoryRepository::default());
    let stories = StoryService::new(repo.clone(), storage, Arc::new(SystemClock));

    Ok(build_state(config, stories, repo, None))
}

fn build_state(
    config: &AppConfig,
    stories: StoryService,
    repo: Arc<dyn StoryRepository>,
    cache: Option<RedisCache>,
) -> AppState {
    AppState {
        stories,
        views: ViewLedger::new(repo),
        intake: MediaIntake::new(config.image_max_bytes, config.video_max_bytes),
        auth: AuthService::new(config.paseto_access_key, config.access_ttl_minutes),
        cache,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
