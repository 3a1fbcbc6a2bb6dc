//! Session Manager
//!
//! Concurrent session lifecycle management using DashMap. Issues unique
//! session ids, constructs engine instances wired to the dispatch plane,
//! and forwards input commands. Every command returns promptly; network
//! work happens in the engine and surfaces later as events.

use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::{ConnectParams, EngineCallbacks, EngineError, ProtocolEngine};
use crate::render::RenderTargetAllocator;

use super::events::{DispatchPolicy, EventDispatcher, EventStream};
use super::registry::SinkRegistry;
use super::state::{SessionInfo, SessionState, SessionStatus, SessionTable};
use super::SessionId;

/// Session manager errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The engine refused to construct a session instance. Everything the
    /// engine reports after construction arrives on the event stream
    /// instead.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Session Manager - handles multiple concurrent remote-desktop sessions
pub struct SessionManager {
    /// Live sessions (session_id -> SessionState), shared with the dispatcher
    sessions: Arc<SessionTable>,
    /// Sink bindings, shared with the dispatcher
    registry: Arc<SinkRegistry>,
    /// The single ordered delivery path
    dispatcher: EventDispatcher,
    /// Protocol-engine collaborator
    engine: Arc<dyn ProtocolEngine>,
    /// Render-target allocation seam
    allocator: Arc<dyn RenderTargetAllocator>,
    /// Next session id to issue; ids are never reused
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager. Must be called within a tokio runtime
    /// (the dispatch task is spawned here).
    pub fn new(engine: Arc<dyn ProtocolEngine>, allocator: Arc<dyn RenderTargetAllocator>) -> Self {
        Self::with_policy(engine, allocator, DispatchPolicy::default())
    }

    /// Create with explicit hook-forwarding switches
    pub fn with_policy(
        engine: Arc<dyn ProtocolEngine>,
        allocator: Arc<dyn RenderTargetAllocator>,
        policy: DispatchPolicy,
    ) -> Self {
        let sessions = Arc::new(SessionTable::new());
        let registry = Arc::new(SinkRegistry::new());
        let dispatcher =
            EventDispatcher::spawn(sessions.clone(), registry.clone(), allocator.clone(), policy);

        Self {
            sessions,
            registry,
            dispatcher,
            engine,
            allocator,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new session bound to a fresh render target.
    ///
    /// Returns the new id immediately; connecting begins only on
    /// [`start`](Self::start). If the engine refuses to construct the
    /// instance, the allocated render target is handed straight back.
    pub async fn create(
        &self,
        host: impl Into<String>,
        port: u16,
        credential: Option<String>,
    ) -> Result<SessionId, SessionError> {
        let host = host.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let target = self.allocator.allocate();
        let callbacks = EngineCallbacks::new(id, self.dispatcher.sender());
        let params = ConnectParams {
            host: host.clone(),
            port,
            credential,
        };

        let engine = match self.engine.connect(params, &target, callbacks).await {
            Ok(engine) => engine,
            Err(e) => {
                self.allocator.release(target);
                return Err(e.into());
            }
        };

        let state = SessionState::new(id, host.as_str(), port)
            .with_render_target(target)
            .with_engine(engine);
        self.sessions.insert(id, state);

        info!("Created session {} for {}:{}", id, host, port);
        Ok(id)
    }

    /// Begin listening to a session's event stream.
    ///
    /// `Ready` is guaranteed to be the first event on the returned stream;
    /// events generated before the subscription are dropped, not replayed.
    pub fn subscribe(&self, id: SessionId) -> EventStream {
        self.dispatcher.bind(id)
    }

    /// Stop delivering events for `id`. The session keeps running and
    /// silently drops events until the next subscribe.
    pub fn unsubscribe(&self, id: SessionId) {
        self.registry.unregister(id);
    }

    /// Instruct the engine to begin connecting and pumping events.
    /// A safe no-op for unknown, already-started, or terminal sessions.
    pub fn start(&self, id: SessionId) {
        match self.sessions.get_mut(&id) {
            Some(mut session) => match session.status {
                SessionStatus::Created | SessionStatus::Subscribed => {
                    session.set_status(SessionStatus::Started);
                    if let Some(engine) = session.engine() {
                        engine.start();
                    }
                }
                other => debug!("Ignoring start for session {} in state {}", id, other),
            },
            None => debug!("Ignoring start for unknown session {}", id),
        }
    }

    /// Request engine shutdown. Idempotent; resource release happens once,
    /// on the dispatcher's Closed path.
    pub fn close(&self, id: SessionId) {
        match self.sessions.get(&id) {
            Some(session) => {
                if let Some(engine) = session.engine() {
                    engine.close();
                }
            }
            None => debug!("Ignoring close for unknown session {}", id),
        }
    }

    /// Forward a pointer event if the session currently accepts input
    pub fn send_pointer(&self, id: SessionId, x: i32, y: i32, button_mask: u8) {
        if let Some(session) = self.sessions.get(&id) {
            if session.accepts_input() {
                if let Some(engine) = session.engine() {
                    engine.pointer(x, y, button_mask);
                }
                return;
            }
        }
        debug!("Dropping pointer input for session {}", id);
    }

    /// Forward a key event if the session currently accepts input
    pub fn send_key(&self, id: SessionId, key_code: u32, is_down: bool) {
        if let Some(session) = self.sessions.get(&id) {
            if session.accepts_input() {
                if let Some(engine) = session.engine() {
                    engine.key(key_code, is_down);
                }
                return;
            }
        }
        debug!("Dropping key input for session {}", id);
    }

    /// Snapshot of one session
    pub fn session_info(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|s| SessionInfo::from(s.value()))
    }

    /// Snapshots of all live sessions
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|s| SessionInfo::from(s.value()))
            .collect()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Issue close to every live session - for teardown on app exit
    pub fn shutdown_all(&self) {
        info!("Closing all {} sessions", self.sessions.len());
        for session in self.sessions.iter() {
            if let Some(engine) = session.engine() {
                engine.close();
            }
        }
    }
}
