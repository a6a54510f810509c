//! API handlers.

pub mod cast;
pub mod devices;
pub mod sse;
