//! Protocol Engine Boundary
//!
//! The RFB/VNC wire protocol itself (handshake, authentication,
//! framebuffer decoding) lives behind these traits. The bridge only
//! constructs engine instances, forwards commands to them, and receives
//! their callback hooks.

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::render::RenderTarget;
use crate::session::events::{DispatchCommand, EngineSignal};
use crate::session::SessionId;

pub mod mock;

/// Connection parameters handed to the engine at construction
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub credential: Option<String>,
}

/// Errors the engine can raise while constructing a session instance.
/// Anything that happens after construction is reported through the
/// callback hooks, never as a command failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection parameters rejected: {0}")]
    InvalidParams(String),

    #[error("Engine instance construction failed: {0}")]
    Construction(String),
}

/// Callback surface handed to an engine instance at construction.
///
/// Each hook performs the callback-plane to dispatch-plane hand-off by
/// enqueueing exactly one typed signal; hooks are safe to invoke from any
/// thread. Posting after the bridge shut down is a silent drop.
#[derive(Debug, Clone)]
pub struct EngineCallbacks {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl EngineCallbacks {
    pub(crate) fn new(session_id: SessionId, tx: mpsc::UnboundedSender<DispatchCommand>) -> Self {
        Self { session_id, tx }
    }

    /// The session this callback surface belongs to
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The remote accepted the connection and reported its geometry
    pub fn on_connect_success(&self, width: u32, height: u32) {
        self.post(EngineSignal::ConnectSuccess { width, height });
    }

    /// A framebuffer region was decoded into the render surface
    pub fn on_frame_update(&self, width: u32, height: u32) {
        self.post(EngineSignal::FrameUpdate { width, height });
    }

    /// The remote framebuffer geometry changed
    pub fn on_resize(&self, width: u32, height: u32) {
        self.post(EngineSignal::Resize { width, height });
    }

    /// The engine hit a failure; the session may continue or close next
    pub fn on_error(&self, code: i32, msg: impl Into<String>) {
        self.post(EngineSignal::Error {
            code,
            msg: msg.into(),
        });
    }

    /// The engine shut down. Invoked at most once per instance.
    pub fn on_closed(&self) {
        self.post(EngineSignal::Closed);
    }

    fn post(&self, signal: EngineSignal) {
        if self
            .tx
            .send(DispatchCommand::Engine {
                id: self.session_id,
                signal,
            })
            .is_err()
        {
            debug!(
                "Dropping engine signal for session {}: dispatcher stopped",
                self.session_id
            );
        }
    }
}

/// Factory seam for the external protocol-engine collaborator
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Construct an engine instance bound to `target` and `callbacks`.
    ///
    /// Must not perform network I/O; connecting begins only on
    /// [`EngineSession::start`].
    async fn connect(
        &self,
        params: ConnectParams,
        target: &RenderTarget,
        callbacks: EngineCallbacks,
    ) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One live engine instance, exclusively owned by its session.
///
/// All methods are prompt, fire-and-forget triggers; outcomes arrive
/// through the callback hooks.
pub trait EngineSession: Send + Sync {
    /// Begin connecting and pumping protocol events
    fn start(&self);

    /// Request shutdown; the engine answers with `on_closed` at most once
    fn close(&self);

    /// Forward a pointer event
    fn pointer(&self, x: i32, y: i32, mask: u8);

    /// Forward a key event
    fn key(&self, code: u32, down: bool);
}
