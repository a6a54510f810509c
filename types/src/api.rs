//! API request and response types.

use crate::state::{PlaybackState, SessionId};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

// ============================================================================
// Cast API Types
// ============================================================================

/// Request to cast a remote media URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[cfg_attr(feature = "validation", derive(garde::Validate))]
pub struct CastRequest {
    /// Page or media URL handed to the fetch stage (http or https only)
    #[cfg_attr(feature = "validation", garde(custom(validate_http_url)))]
    pub url: String,
    /// Receiver address; defaults to the receiver selected at startup
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    #[cfg_attr(feature = "validation", garde(skip))]
    pub receiver: Option<IpAddr>,
}

/// Only `http` and `https` URLs are accepted.
#[cfg(feature = "validation")]
#[allow(clippy::ptr_arg)]
fn validate_http_url(value: &String, _ctx: &()) -> garde::Result {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(garde::Error::new(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        ))),
        Err(e) => Err(garde::Error::new(format!("invalid URL: {}", e))),
    }
}

/// Response to an accepted cast request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CastResponse {
    pub url: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub receiver: IpAddr,
    /// `accepted` when playback runs in the background, `completed` or
    /// `cancelled` when the request waited for the session to end
    pub status: String,
}

/// Current playback session status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StatusResponse {
    pub state: PlaybackState,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = Uuid))]
    pub session_id: Option<SessionId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    pub receiver: Option<IpAddr>,
}

/// Address of the VLC HTTP remote-control interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct VlcInterfaceResponse {
    pub address: String,
}

// ============================================================================
// Error Response
// ============================================================================

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}
