//! Vehicle inventory
//!
//! Keeps each signed-in user's vehicle list in step with a shared document store, and serves
//! it over a small REST API.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod sync;
pub mod view;

use std::sync::Arc;

use axum::{
    extract::State,
    middleware,
    routing::{get, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::SharedStore;
use errors::AppError;
use sync::VehicleInventorySync;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SharedStore, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Inventory for a single request. HTTP callers share no load state or cache.
    pub fn inventory(&self) -> VehicleInventorySync {
        VehicleInventorySync::new(self.store.clone())
    }
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route(
            "/vehicles",
            get(api::list_vehicles).post(api::create_vehicle),
        )
        .route(
            "/vehicles/{id}",
            put(api::update_vehicle).delete(api::delete_vehicle),
        )
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Result<&'static str, AppError> {
    state.store.health_check().await?;
    Ok("OK")
}
