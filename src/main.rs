use axum::Router;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bambiland::config::AppConfig;
use bambiland::http;
use bambiland::infra::{cache::RedisCache, db::Db, devstore::DevStore, storage::ObjectStorage};
use bambiland::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    // With the dev fallback on, start even if Postgres and Redis are down.
    let (db, cache, fallback) = match config.dev_fallback_dir {
        Some(ref dir) => {
            let fallback = DevStore::open(dir)?;
            tracing::warn!(dir = %dir.display(), "dev fallback enabled");
            (
                Db::connect_lazy(&config)?,
                RedisCache::open(&config.redis_url)?,
                Some(fallback),
            )
        }
        None => (
            Db::connect(&config).await?,
            RedisCache::connect(&config.redis_url).await?,
            None,
        ),
    };
    let storage = ObjectStorage::new(&config).await?;

    let state = AppState::new(&config, db, cache, storage, fallback);

    let app: Router = http::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
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
