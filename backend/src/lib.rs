//! RPiTube backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod events;
pub mod network;
pub mod openapi;
pub mod playback;
pub mod process;
pub mod state;

use config::Config;
use state::AppState;

/// Create the Axum application router with default configuration.
///
/// This function is used both by the main server binary and by integration tests.
pub async fn create_app() -> Router {
    create_app_with_state(AppState::new(Config::default())).await
}

/// Create the Axum application router with a given state.
pub async fn create_app_with_state(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/cast", post(api::cast::cast))
        .route("/stop", post(api::cast::stop))
        .route("/status", get(api::cast::status))
        .route("/vlc", get(api::cast::vlc_interface))
        .route("/logs", get(api::sse::logs_stream))
        .route("/devices", get(api::devices::list_devices));

    Router::new()
        .route("/health", get(health))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .nest("/api", api_router)
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
