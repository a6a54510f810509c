//! Playback session state definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Unique identifier for one playback session (one `play` request).
pub type SessionId = Uuid;

/// State of the single playback session.
///
/// `Stopped -> Downloading -> Streaming -> Stopped` is the happy path.
/// `Erroring` precedes cleanup after a failed stage, and `Stopping` is the
/// transient state while live stages are being terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing is running
    #[default]
    Stopped,
    /// The fetch stage is retrieving the media
    Downloading,
    /// The stream stage is casting the media to the receiver
    Streaming,
    /// A stage failed and cleanup is about to run
    Erroring,
    /// Live stages are being terminated
    Stopping,
}

impl PlaybackState {
    /// Whether a pipeline stage may be running in this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Streaming)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Downloading => write!(f, "DOWNLOADING"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Erroring => write!(f, "ERRORING"),
            Self::Stopping => write!(f, "STOPPING"),
        }
    }
}
