//! Mock protocol engine
//!
//! Used by the test suites to drive the engine callback plane without a
//! network peer. Tests obtain the per-session [`MockRemote`] and fire
//! hooks on it as if the wire protocol had produced them.

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::render::RenderTarget;
use crate::session::SessionId;

use super::{ConnectParams, EngineCallbacks, EngineError, EngineSession, ProtocolEngine};

/// Input events recorded by a mock engine session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedInput {
    Pointer { x: i32, y: i32, mask: u8 },
    Key { code: u32, down: bool },
}

struct RemoteInner {
    params: ConnectParams,
    texture_id: u64,
    callbacks: EngineCallbacks,
    started: AtomicBool,
    start_calls: AtomicUsize,
    closed: AtomicBool,
    inputs: Mutex<Vec<RecordedInput>>,
    auto_connect: Option<(u32, u32)>,
}

/// Shared handle onto one mock engine instance, observable from tests
#[derive(Clone)]
pub struct MockRemote {
    inner: Arc<RemoteInner>,
}

impl MockRemote {
    /// The callback surface wired into the bridge for this session
    pub fn callbacks(&self) -> EngineCallbacks {
        self.inner.callbacks.clone()
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.callbacks.session_id()
    }

    /// Parameters the session was constructed with
    pub fn params(&self) -> ConnectParams {
        self.inner.params.clone()
    }

    /// Texture id of the render target the session was bound to
    pub fn texture_id(&self) -> u64 {
        self.inner.texture_id
    }

    pub fn started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// How many times `start` reached the engine
    pub fn start_calls(&self) -> usize {
        self.inner.start_calls.load(Ordering::SeqCst)
    }

    /// Inputs forwarded to the engine so far
    pub fn inputs(&self) -> Vec<RecordedInput> {
        self.inner.inputs.lock().clone()
    }

    /// Emit `on_closed`, honoring the at-most-once engine contract across
    /// any number of close requests.
    pub fn emit_closed(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.callbacks.on_closed();
        } else {
            debug!(
                "Mock engine for session {} already closed",
                self.session_id()
            );
        }
    }
}

struct MockEngineSession {
    remote: MockRemote,
}

impl EngineSession for MockEngineSession {
    fn start(&self) {
        self.remote.inner.started.store(true, Ordering::SeqCst);
        self.remote.inner.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((width, height)) = self.remote.inner.auto_connect {
            self.remote.inner.callbacks.on_connect_success(width, height);
        }
    }

    fn close(&self) {
        self.remote.emit_closed();
    }

    fn pointer(&self, x: i32, y: i32, mask: u8) {
        self.remote
            .inner
            .inputs
            .lock()
            .push(RecordedInput::Pointer { x, y, mask });
    }

    fn key(&self, code: u32, down: bool) {
        self.remote
            .inner
            .inputs
            .lock()
            .push(RecordedInput::Key { code, down });
    }
}

/// Scriptable engine collaborator for tests
#[derive(Default)]
pub struct MockEngine {
    remotes: Mutex<HashMap<SessionId, MockRemote>>,
    auto_connect: Option<(u32, u32)>,
    fail_next: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a successful connection with the given geometry as soon as
    /// a session is started.
    pub fn with_auto_connect(width: u32, height: u32) -> Self {
        Self {
            auto_connect: Some((width, height)),
            ..Self::default()
        }
    }

    /// Make the next `connect` fail with a construction error
    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Handle onto the instance constructed for `id`
    pub fn remote(&self, id: SessionId) -> Option<MockRemote> {
        self.remotes.lock().get(&id).cloned()
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    async fn connect(
        &self,
        params: ConnectParams,
        target: &RenderTarget,
        callbacks: EngineCallbacks,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Construction(
                "scripted connect failure".to_string(),
            ));
        }

        let remote = MockRemote {
            inner: Arc::new(RemoteInner {
                params,
                texture_id: target.texture_id(),
                callbacks,
                started: AtomicBool::new(false),
                start_calls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                inputs: Mutex::new(Vec::new()),
                auto_connect: self.auto_connect,
            }),
        };
        self.remotes
            .lock()
            .insert(remote.session_id(), remote.clone());

        Ok(Box::new(MockEngineSession { remote }))
    }
}
