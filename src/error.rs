//! Error types for every stage of the session.
//!
//! Each stage has its own error enum. When a stage failure ends an attempt it
//! is folded into a [`FailureReason`], which is what the state machine stores
//! in `SessionState::Failed` and what the UI layer shows.

use thiserror::Error;

/// Errors from exchanging credentials for a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server refused the credentials (4xx).
    #[error("Authentication rejected: {0}")]
    Rejected(String),

    /// Transport failure or unexpected status.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// 2xx response whose body did not carry a token.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

/// Errors from the durable token store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    #[error("Token store I/O error: {0}")]
    Io(String),

    #[error("Token store is corrupt: {0}")]
    Corrupt(String),
}

/// Errors from local media acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media permission denied: {0}")]
    PermissionDenied(String),

    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Errors from the signaling socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The connection could not be established.
    #[error("Signaling connect failed: {0}")]
    ConnectFailed(String),

    /// The server refused the handshake (bad or expired token).
    #[error("Signaling rejected by server: {0}")]
    Rejected(String),

    /// The socket went away after it was established.
    #[error("Signaling connection closed: {0}")]
    Closed(String),

    /// A frame could not be encoded or decoded.
    #[error("Signaling protocol error: {0}")]
    Protocol(String),

    /// The server reported an error over the channel.
    #[error("Signaling server error: {0}")]
    Server(String),
}

/// Errors from a peer connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The peer connection could not be constructed.
    #[error("Peer init error: {0}")]
    Init(String),

    /// A handshake step was invoked out of order or rejected.
    #[error("Peer signal error: {0}")]
    Signal(String),

    /// The connection failed while negotiating or after it was established.
    #[error("Peer runtime error: {0}")]
    Runtime(String),
}

/// Errors returned by the [`crate::session::SessionHandle`] API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The coordinator task has stopped.
    #[error("Session coordinator is no longer running")]
    CoordinatorGone,
}

/// Terminal reason for a failed attempt, tagged by the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Auth(String),
    Media(String),
    Signaling(String),
    PeerInit(String),
    PeerSignal(String),
    PeerRuntime(String),
}

impl FailureReason {
    /// Short stage tag used in logs.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Media(_) => "media",
            Self::Signaling(_) => "signaling",
            Self::PeerInit(_) => "peer_init",
            Self::PeerSignal(_) => "peer_signal",
            Self::PeerRuntime(_) => "peer_runtime",
        }
    }

    /// Detail string carried by the reason.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Auth(d)
            | Self::Media(d)
            | Self::Signaling(d)
            | Self::PeerInit(d)
            | Self::PeerSignal(d)
            | Self::PeerRuntime(d) => d,
        }
    }

    /// Title and message shown to the user.
    #[must_use]
    pub fn user_message(&self) -> (&'static str, &'static str) {
        match self {
            Self::Auth(_) => ("Login Failed", "Invalid username or password."),
            Self::Media(_) => ("Media Error", "Could not access camera and microphone."),
            Self::Signaling(_) => ("Connection Error", "Could not connect to the server."),
            Self::PeerInit(_) | Self::PeerSignal(_) | Self::PeerRuntime(_) => {
                ("Connection Error", "Could not establish the video connection.")
            }
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage(), self.detail())
    }
}

impl From<AuthError> for FailureReason {
    fn from(e: AuthError) -> Self {
        Self::Auth(e.to_string())
    }
}

impl From<MediaError> for FailureReason {
    fn from(e: MediaError) -> Self {
        Self::Media(e.to_string())
    }
}

impl From<SignalingError> for FailureReason {
    fn from(e: SignalingError) -> Self {
        Self::Signaling(e.to_string())
    }
}

impl From<PeerError> for FailureReason {
    fn from(e: PeerError) -> Self {
        match e {
            PeerError::Init(_) => Self::PeerInit(e.to_string()),
            PeerError::Signal(_) => Self::PeerSignal(e.to_string()),
            PeerError::Runtime(_) => Self::PeerRuntime(e.to_string()),
        }
    }
}
