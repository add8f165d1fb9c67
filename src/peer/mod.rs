pub mod connection;
pub mod ice;
pub mod session;
pub mod state;
pub mod types;

pub use connection::RtcPeerConnector;
pub use session::PeerSession;
pub use state::PeerState;
pub use types::{PeerEvent, ServerConfig};

use crate::error::PeerError;
use crate::media::MediaStream;
use crate::signaling::SignalPayload;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Opens the underlying peer connection for one session attempt.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Open an initiating connection carrying `stream`'s tracks.
    ///
    /// The connection reports through `events`; its first event of interest
    /// is a single `PeerEvent::Signal` carrying the complete offer.
    async fn open(
        &self,
        stream: &MediaStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerTransport>, PeerError>;
}

/// An open peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Apply the remote answer.
    async fn apply_answer(&self, answer: SignalPayload) -> Result<(), PeerError>;

    /// Close the connection and free its resources.
    async fn close(&self) -> Result<(), PeerError>;
}
