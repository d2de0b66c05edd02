//! HTTP API for controlling a running voice session
//!
//! - GET /health - Health check
//! - GET /session/status - Current state and statistics
//! - GET /session/transcript - Turns completed so far
//! - POST /session/interrupt - Stop the reply currently playing
//! - POST /session/stop - End the session

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
