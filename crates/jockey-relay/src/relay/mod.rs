//! Run stream relay.
//!
//! Raw upstream lines flow through [`parser`], data updates through
//! [`reducer`], and everything user-facing through [`projector`] before a
//! [`session`] broadcasts it to the thread's subscribers.

pub mod parser;
pub mod projector;
pub mod reducer;
pub mod session;

pub use parser::{DataLineError, LineParser, StreamEvent};
pub use projector::{DisplayMessage, MAX_JSON_UNWRAP_DEPTH, Unwrapped};
pub use reducer::{Correction, Reducer, Reduction, ensure_valid_state, reduce};
pub use session::{
    Orchestrator, RunRequest, SessionOutcome, SessionPhase, SpawnedSession,
};
