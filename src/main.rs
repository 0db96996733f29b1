mod error;
mod api;
mod store;
mod sync;
mod server;
mod bootstrap;
mod middleware;
mod config;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::info;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,group_sync=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before tracing so RUST_LOG from .env applies
    let config = config::Config::from_env()?;

    init_tracing();

    info!("🚀 Starting group content sync service");

    let state = bootstrap::initialize_app_state(&config).await?;

    // Create HTTP server
    let app = server::create_app(state, &config.cors_allowed_origins).await;

    // Run the Server
    server::run_server(app, &config.bind_address).await?;

    Ok(())
}
