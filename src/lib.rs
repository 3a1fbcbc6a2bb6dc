//! vncbridge - session orchestration and event delivery for remote-desktop
//! (RFB/VNC) clients.
//!
//! Bridges concurrent protocol-engine sessions to asynchronous event
//! consumers: per-session lifecycle, a thread-safe sink registry, one
//! ordered dispatch path from engine callbacks to subscribers, and
//! render-target allocation tied to session teardown.
//!
//! The wire protocol itself lives behind [`engine::ProtocolEngine`];
//! presentation lives behind [`render::RenderTargetAllocator`].

// Declare modules
pub mod channel;
pub mod engine;
pub mod fault;
pub mod render;
pub mod session;

pub use channel::{ControlChannel, ControlRequest, ControlResponse, SubscribeError};
pub use engine::{ConnectParams, EngineCallbacks, EngineError, EngineSession, ProtocolEngine};
pub use render::{RenderTarget, RenderTargetAllocator, Surface, TextureAllocator};
pub use session::{
    DispatchPolicy, EventStream, SessionError, SessionEvent, SessionId, SessionInfo,
    SessionManager, SessionStatus,
};
