//! Jockey client module.
//!
//! Provides an async client for the remote Jockey run API: streaming runs,
//! posting run corrections, and the thin thread/assistant/video calls.

mod client;
mod error;
mod types;

pub use client::{JockeyApi, JockeyClient, JockeyClientConfig, LineStream, RetryPolicy};
pub use error::{JockeyError, JockeyResult};
pub use types::*;
