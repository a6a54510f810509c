//! Shared types for the RPiTube casting server.
//!
//! This crate contains domain models and API types shared between
//! the server and its clients.

/// Default port for the RPiTube HTTP server.
pub const DEFAULT_PORT: u16 = 3000;

pub mod api;
pub mod events;
pub mod state;

// Re-export commonly used types
pub use api::{CastRequest, CastResponse, ErrorResponse, StatusResponse, VlcInterfaceResponse};
pub use events::{CastEvent, OutputStream};
pub use state::{PlaybackState, SessionId};
