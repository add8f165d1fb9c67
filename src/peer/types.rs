use crate::signaling::SignalPayload;
use serde::{Deserialize, Serialize};

/// ICE server entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// What a peer connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The complete local offer (trickle ICE is off, so this is the only one).
    Signal(SignalPayload),
    /// The media path is up.
    Connected,
    /// The connection failed; the session must be destroyed.
    Error(String),
    /// The underlying connection was closed.
    Closed,
}
