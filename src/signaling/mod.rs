//! Signaling protocol and the socket seam.
//!
//! Frames are JSON objects `{"event": <tag>, "data": <payload>}`. Offer and
//! answer payloads are opaque blobs forwarded without inspection.

mod ws;

pub use ws::WsSignalingChannel;

use crate::auth::AuthToken;
use crate::error::SignalingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const OFFER_EVENT: &str = "webrtc-offer";
pub const ANSWER_EVENT: &str = "webrtc-answer";
pub const ERROR_EVENT: &str = "error";

/// Opaque session-description blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(pub serde_json::Value);

impl SignalPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    /// Client → server: local offer.
    #[serde(rename = "webrtc-offer")]
    Offer(SignalPayload),

    /// Server → client: the viewer's answer.
    #[serde(rename = "webrtc-answer")]
    Answer(SignalPayload),

    /// Server → client: the server gave up on this session.
    #[serde(rename = "error")]
    Error(String),
}

impl SignalingMessage {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Offer(_) => OFFER_EVENT,
            Self::Answer(_) => ANSWER_EVENT,
            Self::Error(_) => ERROR_EVENT,
        }
    }

    pub fn encode(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Protocol(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Protocol(e.to_string()))
    }
}

/// What an established connection reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    /// The socket went away; no further events follow.
    Closed(String),
}

/// A live socket session.
#[async_trait]
pub trait SignalingConnection: Send + Sync {
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError>;

    /// Close the socket. Calling it again is a no-op.
    async fn disconnect(&self) -> Result<(), SignalingError>;
}

/// Result of a successful connect: the connection plus its inbound events.
pub struct SignalingLink {
    pub connection: Box<dyn SignalingConnection>,
    pub events: mpsc::UnboundedReceiver<SignalingEvent>,
}

impl std::fmt::Debug for SignalingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingLink").finish_non_exhaustive()
    }
}

/// Opens signaling connections.
///
/// `Ok` is the `connect` outcome and `Err` the `connect_error` outcome; each
/// attempt produces exactly one of them.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn connect(&self, endpoint: &str, token: &AuthToken)
        -> Result<SignalingLink, SignalingError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_format() {
        let msg = SignalingMessage::Offer(SignalPayload::new(json!({
            "type": "offer",
            "sdp": "v=0\r\n"
        })));
        let wire: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(wire["event"], "webrtc-offer");
        assert_eq!(wire["data"]["type"], "offer");
        assert_eq!(msg.tag(), OFFER_EVENT);
    }

    #[test]
    fn test_answer_and_error_decode() {
        let answer =
            SignalingMessage::decode(r#"{"event":"webrtc-answer","data":{"type":"answer","sdp":"x"}}"#)
                .unwrap();
        assert_eq!(
            answer,
            SignalingMessage::Answer(SignalPayload::new(json!({"type": "answer", "sdp": "x"})))
        );

        let error = SignalingMessage::decode(r#"{"event":"error","data":"viewer left"}"#).unwrap();
        assert_eq!(error, SignalingMessage::Error("viewer left".into()));
    }

    #[test]
    fn test_payload_passes_through_unchanged() {
        let blob = json!({"sdp": "a=ice-ufrag:abc", "extra": [1, 2, {"nested": null}]});
        let msg = SignalingMessage::Answer(SignalPayload::new(blob.clone()));
        let back = SignalingMessage::decode(&msg.encode().unwrap()).unwrap();
        match back {
            SignalingMessage::Answer(p) => assert_eq!(p.into_value(), blob),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_a_protocol_error() {
        let result = SignalingMessage::decode(r#"{"event":"chat","data":"hi"}"#);
        assert!(matches!(result, Err(SignalingError::Protocol(_))));
    }
}
