//! Session State Management
//!
//! Tracks the state of individual remote-desktop sessions and the
//! resources each one owns.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::EngineSession;
use crate::render::RenderTarget;

use super::SessionId;

/// Status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Engine instance constructed, no subscriber yet
    Created,
    /// A sink is bound and has accepted `Ready`
    Subscribed,
    /// Engine instructed to begin connecting
    Started,
    /// Remote framebuffer is live
    Connected,
    /// Engine reported a failure; the session can still reach Closed
    Errored,
    /// Terminal state, resources released
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Started => write!(f, "started"),
            Self::Connected => write!(f, "connected"),
            Self::Errored => write!(f, "errored"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Shared map of live sessions, keyed by session id.
pub(crate) type SessionTable = DashMap<SessionId, SessionState>;

/// Complete state of a single session
pub struct SessionState {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote host this session connects to
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Current status
    pub status: SessionStatus,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last active
    pub last_activity: DateTime<Utc>,
    /// Presentable surface owned by this session, taken exactly once on close
    render_target: Option<RenderTarget>,
    /// Exclusively owned engine instance, dropped on close
    engine: Option<Box<dyn EngineSession>>,
}

impl SessionState {
    /// Create a new session state in [`SessionStatus::Created`]
    pub(crate) fn new(id: SessionId, host: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id,
            host: host.into(),
            port,
            status: SessionStatus::Created,
            created_at: now,
            last_activity: now,
            render_target: None,
            engine: None,
        }
    }

    /// Attach the session's render target
    pub(crate) fn with_render_target(mut self, target: RenderTarget) -> Self {
        self.render_target = Some(target);
        self
    }

    /// Attach the session's engine instance
    pub(crate) fn with_engine(mut self, engine: Box<dyn EngineSession>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Texture handle of the currently owned render target, if any
    pub fn texture_id(&self) -> Option<u64> {
        self.render_target.as_ref().map(|t| t.texture_id())
    }

    pub(crate) fn engine(&self) -> Option<&dyn EngineSession> {
        self.engine.as_deref()
    }

    /// Take ownership of the render target. Yields `Some` at most once.
    pub(crate) fn take_render_target(&mut self) -> Option<RenderTarget> {
        self.render_target.take()
    }

    pub(crate) fn take_engine(&mut self) -> Option<Box<dyn EngineSession>> {
        self.engine.take()
    }

    /// Update status and activity time. Closed is terminal: once reached,
    /// no further transition is applied.
    pub fn set_status(&mut self, status: SessionStatus) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.status = status;
        self.touch();
    }

    /// Record activity without a status change
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Check if the session accepts input forwarding
    pub fn accepts_input(&self) -> bool {
        matches!(self.status, SessionStatus::Started | SessionStatus::Connected)
    }

    /// Check if the session reached its terminal state
    pub fn is_terminal(&self) -> bool {
        self.status == SessionStatus::Closed
    }

    /// Get session duration in seconds
    pub fn duration_secs(&self) -> i64 {
        (self.last_activity - self.created_at).num_seconds()
    }
}

/// Serializable session info for listing and inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub host: String,
    pub port: u16,
    pub status: SessionStatus,
    pub texture_id: Option<u64>,
    pub created_at: String,
    pub last_activity: String,
}

impl From<&SessionState> for SessionInfo {
    fn from(state: &SessionState) -> Self {
        Self {
            id: state.id,
            host: state.host.clone(),
            port: state.port,
            status: state.status,
            texture_id: state.texture_id(),
            created_at: state.created_at.to_rfc3339(),
            last_activity: state.last_activity.to_rfc3339(),
        }
    }
}
