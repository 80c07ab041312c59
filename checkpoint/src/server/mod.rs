//! HTTP server for the ticket API.
//!
//! Serves the ticket store to remote doors (the REST backend), runs server-side scans for
//! terminals without direct store access, and exposes health and metrics endpoints.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod health;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
