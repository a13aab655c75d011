//! Sandbox module - Out-of-process execution of untrusted code
//!
//! - launcher: spawns one interpreter per request with unbuffered, piped output
//! - relay: streams stdout then stderr line by line, then reaps the child
//! - session: owns the child and guarantees it is reaped on every exit path

mod launcher;
mod relay;
mod session;

pub use launcher::Launcher;
pub use relay::{collect, relay, Chunk, ExecutionOutput, Notice};
pub use session::{ExecutionRequest, ExecutionSession, SessionLimits, SessionState};
