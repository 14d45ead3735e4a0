//! Shelfsync Server binary.

use std::sync::Arc;

use shelfsync_server::config::Config;
use shelfsync_server::db::{self, PgBookStore, PgCheckpointStore};
use shelfsync_server::memory::{InMemoryBookStore, InMemoryCheckpointStore, InMemoryTransport};
use shelfsync_server::service::SyncService;
use shelfsync_server::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Shelfsync Server on {}:{}", config.host, config.port);

    let transport = Arc::new(InMemoryTransport::new());

    let service = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;

            let service = SyncService::new_shared(
                transport,
                Arc::new(PgCheckpointStore::new(pool.clone())),
                config.sync.clone(),
            );
            for id in &config.store_ids {
                service.register_store(Arc::new(PgBookStore::open(pool.clone(), id).await?));
            }
            service
        }
        None => {
            tracing::warn!("DATABASE_URL not set; libraries are kept in memory");
            let service = SyncService::new_shared(
                transport,
                Arc::new(InMemoryCheckpointStore::new()),
                config.sync.clone(),
            );
            for id in &config.store_ids {
                service.register_store(Arc::new(InMemoryBookStore::new(id.clone())));
            }
            service
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(service, config);
    let app = app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
