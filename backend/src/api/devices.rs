//! Receiver discovery endpoint.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use rpitube_types::ErrorResponse;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;
use utoipa::IntoParams;

use crate::discovery::{DeviceResponse, DiscoveryError};
use crate::state::AppState;

/// Upper bound for a requested discovery window.
const MAX_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Query parameters for device discovery.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DevicesQuery {
    /// Discovery window in milliseconds (defaults to the configured window)
    pub timeout_ms: Option<u64>,
}

/// Discover cast receivers on the local network.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "discovery",
    params(DevicesQuery),
    responses(
        (status = 200, description = "Receivers found during the window", body = Vec<DeviceResponse>),
        (status = 400, description = "Invalid timeout", body = ErrorResponse),
        (status = 503, description = "Multicast listener unavailable", body = ErrorResponse)
    )
)]
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DevicesQuery>,
) -> Result<Json<Vec<DeviceResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config().discovery_timeout)
        .min(MAX_DISCOVERY_TIMEOUT);

    match state.discovery().discover(timeout).await {
        Ok(devices) => Ok(Json(
            devices.iter().map(|device| device.to_api_response()).collect(),
        )),
        Err(e @ DiscoveryError::InvalidTimeout) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string())),
        )),
        Err(e @ DiscoveryError::Unavailable(_)) => {
            warn!("Discovery failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::with_details(
                    "Discovery unavailable",
                    e.to_string(),
                )),
            ))
        }
    }
}
