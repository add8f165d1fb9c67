use super::{MediaConstraints, MediaSource, MediaStream};
use crate::error::MediaError;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Source backed by `webrtc` sample tracks (Opus audio, VP8 video).
///
/// The capture device is exclusive: a second `acquire` while a stream is live
/// fails until that stream is released. The tracks are handed to the peer
/// connection through [`super::MediaTrack::rtc_track`].
#[derive(Default)]
pub struct LocalTrackSource {
    live: Mutex<HashSet<String>>,
    denied: bool,
}

impl LocalTrackSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose permission prompt was refused.
    #[cfg(test)]
    pub fn denied() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
            denied: true,
        }
    }

    #[cfg(test)]
    pub async fn live_streams(&self) -> usize {
        self.live.lock().await.len()
    }
}

#[async_trait]
impl MediaSource for LocalTrackSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if self.denied {
            return Err(MediaError::PermissionDenied(
                "camera and microphone access refused".into(),
            ));
        }
        if !constraints.audio && !constraints.video {
            return Err(MediaError::DeviceUnavailable("no tracks requested".into()));
        }

        let mut live = self.live.lock().await;
        if !live.is_empty() {
            warn!(target: "peerlink.media", "Capture requested while another stream is live");
            return Err(MediaError::DeviceUnavailable("capture device is busy".into()));
        }

        let stream = MediaStream::with_constraints(constraints);
        live.insert(stream.id().to_string());
        info!(
            target: "peerlink.media",
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            "Media stream started"
        );
        Ok(stream)
    }

    async fn release(&self, stream: MediaStream) {
        stream.stop_tracks();
        if self.live.lock().await.remove(stream.id()) {
            debug!(target: "peerlink.media", stream_id = %stream.id(), "Media stream released");
        } else {
            warn!(target: "peerlink.media", stream_id = %stream.id(), "Released an unknown stream");
        }
    }
}
