//! Jockey relay library.
//!
//! Relays runs of the Jockey video agent to browser clients: requests come
//! in over HTTP or WebSocket, the upstream run stream is parsed and reduced,
//! and user-facing messages fan out over SSE and WebSocket.

pub mod api;
pub mod jockey;
pub mod relay;
pub mod settings;
pub mod ws;
