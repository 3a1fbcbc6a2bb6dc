//! Session Management Module
//!
//! Multiplexes concurrent remote-desktop sessions onto a single ordered
//! event stream:
//! - Session identity and lifecycle (DashMap-backed table)
//! - Sink registry with session-scoped event isolation
//! - One dispatch task serializing engine callbacks into per-session
//!   FIFO delivery

pub mod events;
pub mod manager;
pub mod registry;
pub mod state;

/// Unique 64-bit session identifier, assigned at creation and never
/// reused while in-flight events could still reference it.
pub type SessionId = u64;

pub use events::{DispatchPolicy, EventStream, SessionEvent};
pub use manager::{SessionError, SessionManager};
pub use registry::{EventSink, SinkRegistry};
pub use state::{SessionInfo, SessionState, SessionStatus};
