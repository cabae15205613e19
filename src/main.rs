use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plaza::app::auth::hash_password;
use plaza::config::{AppConfig, StoreBackend};
use plaza::http;
use plaza::infra::{db::Db, memory::MemoryStore, postgres::PgStore, storage::DiskStorage, store::Store};
use plaza::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;
    init_tracing(&config);

    let store: Store = match config.store_backend {
        StoreBackend::Postgres => {
            let db = Db::connect(&config).await?;
            if config.seed_demo_data {
                tracing::warn!("SEED_DEMO_DATA is only honoured by the memory backend");
            }
            Arc::new(PgStore::new(db))
        }
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            if config.seed_demo_data {
                store.seed_demo(hash_password("123456")?).await?;
                tracing::info!("seeded demo data");
            }
            Arc::new(store)
        }
    };
    let storage = DiskStorage::new(&config.upload_dir, config.max_file_size).await?;

    let state = AppState {
        store,
        storage,
        token_key: config.token_key,
        token_ttl_hours: config.token_ttl_hours,
    };

    let app: Router = http::router(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(
        addr = %config.http_addr,
        backend = ?config.store_backend,
        env = %config.app_env,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let default_level = if config.is_production() { "info" } else { "debug" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
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
                std::future::pending::<()>().await;
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
