//! Session registry and WebSocket delivery.
//!
//! ```text
//!   Orchestrator ──broadcast(thread_id)──▶ SessionRegistry
//!                                            │  one unbounded queue
//!                                            │  per subscriber
//!                          ┌─────────────────┼─────────────────┐
//!                          ▼                 ▼                 ▼
//!                    WebSocket client   SSE client       SSE client
//! ```

mod handler;
mod hub;
mod types;

pub use handler::ws_handler;
pub use hub::{MessageSender, SessionRegistry, Subscription};
pub use types::{RunCommand, WsCommand, WsControl};
