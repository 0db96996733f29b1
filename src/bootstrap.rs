use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::{
    api::handler::AppState,
    config::{Config, StoreBackend},
    error::AppResult,
    store::{MemoryStore, PgStore, SyncStore},
    sync::{AssignmentPrimitive, AuditScheduler, Auditor, Dispatcher, GroupRoster, Reconciler},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let store: Arc<dyn SyncStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = initialize_database(&config.database_url, config.db.max_connections).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("⚠️  Using in-memory store - data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = build_state(store, config);
    info!("✅ Application state initialized");
    Ok(state)
}

/// Wire the sync services around an already opened store.
pub fn build_state(store: Arc<dyn SyncStore>, config: &Config) -> AppState {
    let primitive = Arc::new(AssignmentPrimitive::new(store.clone()));
    let auditor = Arc::new(Auditor::new(store.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        primitive.clone(),
        config.sync.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        primitive,
        auditor.clone(),
        config.sync.clone(),
    ));
    let roster = Arc::new(GroupRoster::new(store.clone()));
    let scheduler = Arc::new(AuditScheduler::new(
        store.clone(),
        auditor,
        config.audit.report_retention(),
    ));

    info!(
        "✓ Sync services ready ({} concurrent member writes)",
        config.sync.max_concurrent_writes.max(1)
    );

    AppState {
        store,
        backend: config.store_backend,
        dispatcher,
        reconciler,
        roster,
        scheduler,
        audit: config.audit.clone(),
    }
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
