//! HTTP API module.
//!
//! Provides the processing, delivery and Jockey proxy endpoints.

mod error;
mod handlers;
mod routes;
mod sse;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::{RouterOptions, create_router};
pub use state::{AppState, StreamSettings};
