//! Control Channel
//!
//! The command surface consumers drive the bridge with, plus event-stream
//! subscription keyed by string-encoded session ids. Commands are
//! best-effort triggers: malformed or unknown requests are a silent no-op,
//! and engine failures surface on the event stream, never here.

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::session::events::EventStream;
use crate::session::{SessionId, SessionManager};

/// Control-plane commands, tagged by `method` on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ControlRequest {
    #[serde(rename_all = "camelCase")]
    Create {
        host: String,
        port: u16,
        #[serde(default)]
        credential: Option<String>,
    },
    Start {
        id: SessionId,
    },
    Close {
        id: SessionId,
    },
    #[serde(rename_all = "camelCase")]
    SendPointer {
        id: SessionId,
        x: i32,
        y: i32,
        button_mask: u8,
    },
    #[serde(rename_all = "camelCase")]
    SendKey {
        id: SessionId,
        key_code: u32,
        is_down: bool,
    },
}

/// Control-plane replies. `create` answers with the new session id;
/// every other command answers empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    ClientId(SessionId),
    Empty,
}

/// Subscription failures, reported through the subscription attempt only
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
}

impl SubscribeError {
    /// Stable error code carried on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidClientId(_) => "INVALID_CLIENT_ID",
        }
    }
}

/// Thin command layer routing the wire surface onto a [`SessionManager`]
pub struct ControlChannel {
    manager: Arc<SessionManager>,
}

impl ControlChannel {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Apply one typed command
    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Create {
                host,
                port,
                credential,
            } => match self.manager.create(host, port, credential).await {
                Ok(id) => ControlResponse::ClientId(id),
                Err(e) => {
                    debug!("Create command failed: {}", e);
                    ControlResponse::Empty
                }
            },
            ControlRequest::Start { id } => {
                self.manager.start(id);
                ControlResponse::Empty
            }
            ControlRequest::Close { id } => {
                self.manager.close(id);
                ControlResponse::Empty
            }
            ControlRequest::SendPointer {
                id,
                x,
                y,
                button_mask,
            } => {
                self.manager.send_pointer(id, x, y, button_mask);
                ControlResponse::Empty
            }
            ControlRequest::SendKey {
                id,
                key_code,
                is_down,
            } => {
                self.manager.send_key(id, key_code, is_down);
                ControlResponse::Empty
            }
        }
    }

    /// Best-effort JSON entry point: malformed or unknown commands are
    /// logged and answered empty.
    pub async fn handle_json(&self, payload: Value) -> ControlResponse {
        match serde_json::from_value::<ControlRequest>(payload) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                debug!("Ignoring malformed control request: {}", e);
                ControlResponse::Empty
            }
        }
    }

    /// Subscribe to a session's event stream by its string-encoded id.
    ///
    /// An unparsable id yields [`SubscribeError::InvalidClientId`]; no
    /// session is created and no `Ready` is delivered.
    pub fn subscribe(&self, client_id: &str) -> Result<EventStream, SubscribeError> {
        let id = parse_client_id(client_id)
            .ok_or_else(|| SubscribeError::InvalidClientId(client_id.to_string()))?;
        Ok(self.manager.subscribe(id))
    }

    /// Cancel a subscription. Unparsable ids are silently ignored.
    pub fn unsubscribe(&self, client_id: &str) {
        match parse_client_id(client_id) {
            Some(id) => self.manager.unsubscribe(id),
            None => debug!("Ignoring unsubscribe for invalid client id {:?}", client_id),
        }
    }
}

fn parse_client_id(raw: &str) -> Option<SessionId> {
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::render::TextureAllocator;

    fn channel() -> (ControlChannel, Arc<SessionManager>) {
        let manager = Arc::new(SessionManager::new(
            Arc::new(MockEngine::new()),
            Arc::new(TextureAllocator::new()),
        ));
        (ControlChannel::new(manager.clone()), manager)
    }

    #[test]
    fn test_request_wire_shape() {
        let request: ControlRequest = serde_json::from_value(serde_json::json!({
            "method": "sendPointer",
            "id": 1,
            "x": 10,
            "y": 20,
            "buttonMask": 4
        }))
        .unwrap();
        assert!(matches!(
            request,
            ControlRequest::SendPointer { id: 1, x: 10, y: 20, button_mask: 4 }
        ));

        let json = serde_json::to_value(ControlRequest::SendKey {
            id: 2,
            key_code: 65,
            is_down: true,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "method": "sendKey", "id": 2, "keyCode": 65, "isDown": true })
        );
    }

    #[test]
    fn test_create_credential_defaults_to_none() {
        let request: ControlRequest = serde_json::from_value(serde_json::json!({
            "method": "create",
            "host": "10.0.0.2",
            "port": 5900
        }))
        .unwrap();
        assert!(matches!(
            request,
            ControlRequest::Create { credential: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_answers_with_client_id() {
        let (channel, manager) = channel();

        let response = channel
            .handle_json(serde_json::json!({
                "method": "create",
                "host": "10.0.0.2",
                "port": 5900,
                "credential": "secret"
            }))
            .await;

        assert_eq!(response, ControlResponse::ClientId(1));
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_is_silent_noop() {
        let (channel, manager) = channel();

        let response = channel
            .handle_json(serde_json::json!({ "method": "create", "port": 5900 }))
            .await;
        assert_eq!(response, ControlResponse::Empty);

        let response = channel
            .handle_json(serde_json::json!({ "method": "selfDestruct" }))
            .await;
        assert_eq!(response, ControlResponse::Empty);

        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_non_numeric_client_id() {
        let (channel, manager) = channel();

        let err = channel.subscribe("abc").unwrap_err();
        assert_eq!(err.code(), "INVALID_CLIENT_ID");
        assert_eq!(manager.session_count(), 0);

        // Unparsable cancellation is ignored outright.
        channel.unsubscribe("abc");
    }

    #[tokio::test]
    async fn test_response_serialization() {
        assert_eq!(
            serde_json::to_value(ControlResponse::ClientId(7)).unwrap(),
            serde_json::json!(7)
        );
        assert_eq!(
            serde_json::to_value(ControlResponse::Empty).unwrap(),
            serde_json::Value::Null
        );
    }
}
