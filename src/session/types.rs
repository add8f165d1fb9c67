use crate::config::ClientConfig;
use crate::error::FailureReason;
use crate::media::MediaConstraints;

/// Where the coordinator is in the Auth → Media → Signaling → Peer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    AcquiringMedia,
    MediaReady,
    Connecting,
    Signaling,
    PeerNegotiating,
    Active,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::AcquiringMedia => "acquiring_media",
            Self::MediaReady => "media_ready",
            Self::Connecting => "connecting",
            Self::Signaling => "signaling",
            Self::PeerNegotiating => "peer_negotiating",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Failed(_) => "failed",
        }
    }

    /// States from which a new attempt may start.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Closed | Self::Failed(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Which resources the coordinator currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub token: bool,
    pub media: bool,
    pub signaling: bool,
    pub peer: bool,
}

impl ResourceSnapshot {
    /// A peer may only exist alongside live media and an open signaling connection.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.peer || (self.media && self.signaling)
    }
}

/// Latest state plus resource view, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub resources: ResourceSnapshot,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            resources: ResourceSnapshot::default(),
        }
    }
}

/// What the UI layer is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    StateChanged(SessionStatus),
    /// An attempt ended; `title` and `message` are meant for an alert.
    Failure {
        title: String,
        message: String,
        reason: FailureReason,
    },
    Warning(String),
}

/// What a teardown actually released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub peer_destroyed: bool,
    pub signaling_disconnected: bool,
    pub media_released: bool,
    /// Errors raised by individual release steps. Later steps still ran.
    pub errors: Vec<String>,
}

impl TeardownReport {
    #[must_use]
    pub fn released_anything(&self) -> bool {
        self.peer_destroyed || self.signaling_disconnected || self.media_released
    }
}

/// Per-session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub signaling_url: String,
    pub media: MediaConstraints,
}

impl SessionSettings {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            media: MediaConstraints::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            signaling_url: config.signaling_url.clone(),
            media: config.media,
        }
    }
}
