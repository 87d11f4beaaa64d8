//! Vehicle inventory server.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vehicle_inventory::config::Config;
use vehicle_inventory::db::{self, SharedStore, SqliteDocumentStore};
use vehicle_inventory::sync::VehicleInventorySync;
use vehicle_inventory::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vehicle inventory");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (VEHICLES_API_PSK). Authentication is disabled!");
    }

    let pool = db::init_database(&config.db_path).await?;
    let store: SharedStore = Arc::new(SqliteDocumentStore::new(pool, config.event_capacity));

    // Never loaded for a user, so it reports changes to every vehicle.
    let audit = VehicleInventorySync::new(store.clone());
    let _audit_subscription = audit.subscribe(
        |vehicle| tracing::info!("Vehicle updated: {} ({})", vehicle.name, vehicle.id),
        |vehicle| tracing::info!("Vehicle deleted: {} ({})", vehicle.name, vehicle.id),
    );

    let state = AppState::new(store, config.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
