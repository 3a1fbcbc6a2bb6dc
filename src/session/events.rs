//! Session Events
//!
//! Event types delivered to session subscribers, and the dispatch task
//! that serializes engine-plane callbacks into per-session ordered
//! delivery. Engine callbacks enqueue typed messages; one consumer task
//! dequeues and dispatches, so the registry lock is never held during
//! consumer hand-off and no callback thread ever runs consumer code.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::render::RenderTargetAllocator;

use super::registry::{EventSink, SinkRegistry};
use super::state::{SessionStatus, SessionTable};
use super::SessionId;

/// Events delivered to a session's bound sink, tagged on the wire by `flag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag")]
pub enum SessionEvent {
    /// First event after every successful subscription; never replayed
    #[serde(rename = "onReady")]
    Ready,

    /// Engine-reported failure; does not terminate the session by itself
    #[serde(rename = "onError")]
    Error { code: i32, msg: String },

    /// Terminal notification; the session's resources are gone afterwards
    #[serde(rename = "onClose")]
    Closed,

    /// Remote framebuffer geometry changed. `textureId` is the handle
    /// currently backing this session's render target, read at delivery
    /// time.
    #[serde(rename = "imageResize")]
    Resize {
        width: u32,
        height: u32,
        #[serde(rename = "textureId")]
        texture_id: u64,
    },

    /// Forwarded only when [`DispatchPolicy::forward_connect_success`] is set
    #[serde(rename = "onConnect")]
    Connected { width: u32, height: u32 },

    /// Forwarded only when [`DispatchPolicy::forward_frame_update`] is set
    #[serde(rename = "onFrameUpdate")]
    FrameUpdated { width: u32, height: u32 },
}

/// Typed notification enqueued by an engine callback hook
#[derive(Debug, Clone)]
pub(crate) enum EngineSignal {
    ConnectSuccess { width: u32, height: u32 },
    FrameUpdate { width: u32, height: u32 },
    Resize { width: u32, height: u32 },
    Error { code: i32, msg: String },
    Closed,
}

/// Messages accepted by the dispatch task
#[derive(Debug)]
pub(crate) enum DispatchCommand {
    /// Bind `sink` for `id` and deliver `Ready` before anything else
    Bind { id: SessionId, sink: EventSink },
    /// An engine-plane notification for `id`
    Engine { id: SessionId, signal: EngineSignal },
}

/// Forwarding switches for the two engine hooks the event stream does not
/// carry by default. The engine always invokes them; these choose whether
/// subscribers see them too.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchPolicy {
    pub forward_connect_success: bool,
    pub forward_frame_update: bool,
}

/// Subscriber handle for one session's event stream.
///
/// `Ready` is guaranteed to be the first item. The stream ends when the
/// session closes or the sink is superseded by a newer subscription.
#[derive(Debug)]
pub struct EventStream {
    session_id: SessionId,
    inner: UnboundedReceiverStream<SessionEvent>,
}

impl EventStream {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Receive the next event, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.inner.next().await
    }
}

impl tokio_stream::Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// The dispatch plane: one task draining one queue, giving per-session
/// FIFO delivery and exactly one thread hand-off per event.
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl EventDispatcher {
    /// Spawn the dispatch task. Must be called within a tokio runtime.
    pub(crate) fn spawn(
        sessions: Arc<SessionTable>,
        registry: Arc<SinkRegistry>,
        allocator: Arc<dyn RenderTargetAllocator>,
        policy: DispatchPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, sessions, registry, allocator, policy));
        Self { tx }
    }

    /// Sender handed to engine callback hooks
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<DispatchCommand> {
        self.tx.clone()
    }

    /// Create a fresh sink for `id` and queue its binding. The dispatcher
    /// delivers `Ready` on that sink before any later event for the id.
    pub(crate) fn bind(&self, id: SessionId) -> EventStream {
        let (sink, rx) = mpsc::unbounded_channel();
        if self.tx.send(DispatchCommand::Bind { id, sink }).is_err() {
            debug!("Bind for session {} dropped: dispatcher stopped", id);
        }
        EventStream {
            session_id: id,
            inner: UnboundedReceiverStream::new(rx),
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<DispatchCommand>,
    sessions: Arc<SessionTable>,
    registry: Arc<SinkRegistry>,
    allocator: Arc<dyn RenderTargetAllocator>,
    policy: DispatchPolicy,
) {
    while let Some(command) = rx.recv().await {
        match command {
            DispatchCommand::Bind { id, sink } => handle_bind(&sessions, &registry, id, sink),
            DispatchCommand::Engine { id, signal } => {
                handle_signal(&sessions, &registry, allocator.as_ref(), policy, id, signal)
            }
        }
    }
    debug!("Event dispatcher stopped");
}

fn handle_bind(sessions: &SessionTable, registry: &SinkRegistry, id: SessionId, sink: EventSink) {
    // Anything enqueued before this bind found no sink and was dropped,
    // so Ready is the first event the fresh sink can observe.
    let ready_sink = sink.clone();
    registry.register(id, sink);
    deliver(&ready_sink, id, SessionEvent::Ready);

    if let Some(mut session) = sessions.get_mut(&id) {
        if session.status == SessionStatus::Created {
            session.set_status(SessionStatus::Subscribed);
        }
    } else {
        debug!("Bound sink for unknown session {}", id);
    }
}

fn handle_signal(
    sessions: &SessionTable,
    registry: &SinkRegistry,
    allocator: &dyn RenderTargetAllocator,
    policy: DispatchPolicy,
    id: SessionId,
    signal: EngineSignal,
) {
    match signal {
        EngineSignal::ConnectSuccess { width, height } => {
            if let Some(mut session) = sessions.get_mut(&id) {
                if session.status == SessionStatus::Started {
                    session.set_status(SessionStatus::Connected);
                } else {
                    session.touch();
                }
            }
            if policy.forward_connect_success {
                if let Some(sink) = registry.lookup(id) {
                    deliver(&sink, id, SessionEvent::Connected { width, height });
                }
            }
        }

        EngineSignal::FrameUpdate { width, height } => {
            // Frame pixels go straight to the render surface; the stream
            // only carries the notification, and only on request.
            if let Some(mut session) = sessions.get_mut(&id) {
                session.touch();
            }
            if policy.forward_frame_update {
                if let Some(sink) = registry.lookup(id) {
                    deliver(&sink, id, SessionEvent::FrameUpdated { width, height });
                }
            }
        }

        EngineSignal::Resize { width, height } => {
            let texture_id = sessions.get(&id).and_then(|s| s.texture_id());
            match texture_id {
                Some(texture_id) => {
                    if let Some(sink) = registry.lookup(id) {
                        deliver(&sink, id, SessionEvent::Resize { width, height, texture_id });
                    }
                }
                None => debug!("Resize for session {} without a render target", id),
            }
        }

        EngineSignal::Error { code, msg } => {
            warn!("Session {} engine error {}: {}", id, code, msg);
            if let Some(mut session) = sessions.get_mut(&id) {
                if matches!(session.status, SessionStatus::Started | SessionStatus::Connected) {
                    session.set_status(SessionStatus::Errored);
                }
            }
            if let Some(sink) = registry.lookup(id) {
                deliver(&sink, id, SessionEvent::Error { code, msg });
            }
        }

        EngineSignal::Closed => {
            // Exactly-once teardown, defensive against replayed signals:
            // the entry leaves the table before anything else happens.
            let Some((_, mut session)) = sessions.remove(&id) else {
                debug!("Closed signal for already-removed session {}", id);
                return;
            };
            session.set_status(SessionStatus::Closed);
            if let Some(sink) = registry.lookup(id) {
                deliver(&sink, id, SessionEvent::Closed);
            }
            if let Some(target) = session.take_render_target() {
                allocator.release(target);
            }
            drop(session.take_engine());
            registry.unregister(id);
            info!("Session {} closed", id);
        }
    }
}

fn deliver(sink: &EventSink, id: SessionId, event: SessionEvent) {
    if sink.send(event).is_err() {
        debug!("Sink for session {} dropped its receiver", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TextureAllocator;
    use crate::session::state::SessionState;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_event_wire_names() {
        let ready = serde_json::to_value(SessionEvent::Ready).unwrap();
        assert_eq!(ready, serde_json::json!({ "flag": "onReady" }));

        let error = serde_json::to_value(SessionEvent::Error {
            code: 5,
            msg: "auth failed".to_string(),
        })
        .unwrap();
        assert_eq!(
            error,
            serde_json::json!({ "flag": "onError", "code": 5, "msg": "auth failed" })
        );

        let closed = serde_json::to_value(SessionEvent::Closed).unwrap();
        assert_eq!(closed, serde_json::json!({ "flag": "onClose" }));

        let resize = serde_json::to_value(SessionEvent::Resize {
            width: 800,
            height: 600,
            texture_id: 3,
        })
        .unwrap();
        assert_eq!(
            resize,
            serde_json::json!({ "flag": "imageResize", "width": 800, "height": 600, "textureId": 3 })
        );
    }

    #[test]
    fn test_event_roundtrip() {
        let event = SessionEvent::Resize {
            width: 1024,
            height: 768,
            texture_id: 9,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    struct Fixture {
        sessions: Arc<SessionTable>,
        registry: Arc<SinkRegistry>,
        allocator: Arc<TextureAllocator>,
        dispatcher: EventDispatcher,
    }

    fn fixture(policy: DispatchPolicy) -> Fixture {
        let sessions = Arc::new(SessionTable::new());
        let registry = Arc::new(SinkRegistry::new());
        let allocator = Arc::new(TextureAllocator::new());
        let dispatcher = EventDispatcher::spawn(
            sessions.clone(),
            registry.clone(),
            allocator.clone(),
            policy,
        );
        Fixture {
            sessions,
            registry,
            allocator,
            dispatcher,
        }
    }

    fn add_session(fx: &Fixture, id: SessionId) -> u64 {
        use crate::render::RenderTargetAllocator;
        let target = fx.allocator.allocate();
        let texture_id = target.texture_id();
        fx.sessions
            .insert(id, SessionState::new(id, "host", 5900).with_render_target(target));
        texture_id
    }

    async fn next(stream: &mut EventStream) -> SessionEvent {
        timeout(Duration::from_secs(2), stream.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended")
    }

    fn post(fx: &Fixture, id: SessionId, signal: EngineSignal) {
        fx.dispatcher
            .sender()
            .send(DispatchCommand::Engine { id, signal })
            .unwrap();
    }

    #[tokio::test]
    async fn test_ready_is_first_even_with_earlier_signals() {
        let fx = fixture(DispatchPolicy::default());
        add_session(&fx, 1);

        // Generated before any sink exists: must be dropped, not buffered.
        post(&fx, 1, EngineSignal::Resize { width: 640, height: 480 });

        let mut stream = fx.dispatcher.bind(1);
        assert_eq!(next(&mut stream).await, SessionEvent::Ready);

        post(
            &fx,
            1,
            EngineSignal::Error { code: 2, msg: "io".to_string() },
        );
        assert_eq!(
            next(&mut stream).await,
            SessionEvent::Error { code: 2, msg: "io".to_string() }
        );
    }

    #[tokio::test]
    async fn test_resize_reads_current_texture() {
        let fx = fixture(DispatchPolicy::default());
        let texture_id = add_session(&fx, 4);

        let mut stream = fx.dispatcher.bind(4);
        assert_eq!(next(&mut stream).await, SessionEvent::Ready);

        post(&fx, 4, EngineSignal::Resize { width: 800, height: 600 });
        assert_eq!(
            next(&mut stream).await,
            SessionEvent::Resize { width: 800, height: 600, texture_id }
        );
    }

    #[tokio::test]
    async fn test_closed_teardown_is_exactly_once() {
        let fx = fixture(DispatchPolicy::default());
        add_session(&fx, 2);
        assert_eq!(fx.allocator.live_count(), 1);

        let mut stream = fx.dispatcher.bind(2);
        assert_eq!(next(&mut stream).await, SessionEvent::Ready);

        post(&fx, 2, EngineSignal::Closed);
        post(&fx, 2, EngineSignal::Closed);

        assert_eq!(next(&mut stream).await, SessionEvent::Closed);
        // Sink was unregistered during teardown, so the stream ends.
        assert_eq!(
            timeout(Duration::from_secs(2), stream.recv()).await.unwrap(),
            None
        );

        assert_eq!(fx.allocator.live_count(), 0);
        assert!(fx.sessions.get(&2).is_none());
        assert!(!fx.registry.is_bound(2));
    }

    #[tokio::test]
    async fn test_bind_for_unknown_session_still_delivers_ready() {
        let fx = fixture(DispatchPolicy::default());
        let mut stream = fx.dispatcher.bind(99);
        assert_eq!(next(&mut stream).await, SessionEvent::Ready);
    }

    #[tokio::test]
    async fn test_connect_success_is_internal_by_default() {
        let fx = fixture(DispatchPolicy::default());
        add_session(&fx, 5);
        fx.sessions.get_mut(&5).unwrap().set_status(SessionStatus::Started);

        let mut stream = fx.dispatcher.bind(5);
        assert_eq!(next(&mut stream).await, SessionEvent::Ready);

        post(&fx, 5, EngineSignal::ConnectSuccess { width: 1280, height: 720 });
        post(&fx, 5, EngineSignal::Resize { width: 1280, height: 720 });

        // The connect-success hook only transitions state; the first
        // visible event is the resize.
        assert!(matches!(next(&mut stream).await, SessionEvent::Resize { .. }));
        assert_eq!(
            fx.sessions.get(&5).unwrap().status,
            SessionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_connect_success_forwarded_when_policy_enables() {
        let fx = fixture(DispatchPolicy {
            forward_connect_success: true,
            forward_frame_update: false,
        });
        add_session(&fx, 6);

        let mut stream = fx.dispatcher.bind(6);
        assert_eq!(next(&mut stream).await, SessionEvent::Ready);

        post(&fx, 6, EngineSignal::ConnectSuccess { width: 1920, height: 1080 });
        assert_eq!(
            next(&mut stream).await,
            SessionEvent::Connected { width: 1920, height: 1080 }
        );
    }
}
