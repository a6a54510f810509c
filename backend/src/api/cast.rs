//! Cast session endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use garde::Validate;
use rpitube_types::{
    CastRequest, CastResponse, ErrorResponse, StatusResponse, VlcInterfaceResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use utoipa::IntoParams;

use crate::cache;
use crate::network;
use crate::playback::PlayOutcome;
use crate::state::AppState;

/// Query parameters for a cast request.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CastQuery {
    /// Wait until playback ends instead of answering right away
    #[serde(default)]
    pub wait: bool,
}

/// Download a video and cast it to a receiver.
///
/// A running session is stopped first. Without `wait=true` the request is
/// answered as soon as the session has been scheduled; progress and errors
/// are reported on `/api/logs`.
#[utoipa::path(
    post,
    path = "/api/cast",
    tag = "cast",
    params(CastQuery),
    request_body = CastRequest,
    responses(
        (status = 200, description = "Playback finished (wait=true)", body = CastResponse),
        (status = 202, description = "Playback scheduled", body = CastResponse),
        (status = 400, description = "Invalid URL", body = ErrorResponse),
        (status = 500, description = "Playback failed (wait=true)", body = ErrorResponse),
        (status = 503, description = "No receiver known", body = ErrorResponse)
    )
)]
pub async fn cast(
    State(state): State<AppState>,
    Query(query): Query<CastQuery>,
    Json(req): Json<CastRequest>,
) -> Result<(StatusCode, Json<CastResponse>), (StatusCode, Json<ErrorResponse>)> {
    if let Err(report) = req.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_details("Invalid URL", report.to_string())),
        ));
    }

    let receiver = req
        .receiver
        .or_else(|| state.default_receiver())
        .ok_or_else(|| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("No cast receiver available")),
            )
        })?;

    info!("Cast request for {} to {}", req.url, receiver);

    let config = state.config();
    if let Err(e) = cache::evict_oldest(&config.cache_dir, config.max_cached_files).await {
        warn!(
            "Failed to clean cache directory {}: {}",
            config.cache_dir.display(),
            e
        );
    }

    let orchestrator = state.orchestrator().clone();
    let url = req.url;

    if query.wait {
        return match orchestrator.play(receiver, &url).await {
            Ok(outcome) => {
                let status = match outcome {
                    PlayOutcome::Completed => "completed",
                    PlayOutcome::Cancelled => "cancelled",
                };
                Ok((
                    StatusCode::OK,
                    Json(CastResponse {
                        url,
                        receiver,
                        status: status.to_string(),
                    }),
                ))
            }
            Err(e) => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_details(e.to_string(), e.kind())),
            )),
        };
    }

    let response = CastResponse {
        url: url.clone(),
        receiver,
        status: "accepted".to_string(),
    };
    tokio::spawn(async move {
        // Failures were already reported on the event stream
        if let Err(e) = orchestrator.play(receiver, &url).await {
            debug!("Cast of {} ended with error: {}", url, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Stop the current session.
#[utoipa::path(
    post,
    path = "/api/stop",
    tag = "cast",
    responses(
        (status = 200, description = "Session stopped", body = StatusResponse)
    )
)]
pub async fn stop(State(state): State<AppState>) -> Json<StatusResponse> {
    state.orchestrator().stop().await;
    Json(state.status())
}

/// Current playback state.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "cast",
    responses(
        (status = 200, description = "Playback status", body = StatusResponse)
    )
)]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.status())
}

/// Address of the VLC web interface that controls the running stream.
#[utoipa::path(
    get,
    path = "/api/vlc",
    tag = "cast",
    responses(
        (status = 200, description = "VLC interface address", body = VlcInterfaceResponse)
    )
)]
pub async fn vlc_interface() -> Json<VlcInterfaceResponse> {
    Json(VlcInterfaceResponse {
        address: network::vlc_interface_url(),
    })
}
