//! Local capture handles.
//!
//! A [`MediaSource`] hands out a [`MediaStream`]; the coordinator wraps it in a
//! [`MediaHandle`] and is its only owner until the handle is released.

mod local;

pub use local::LocalTrackSource;

use crate::error::MediaError;
use crate::utils::random_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Which kinds of tracks to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

/// One local track. Clones share the same underlying track and stop flag.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    local: Arc<TrackLocalStaticSample>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", stream_id, random_id());
        let local = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.to_string(),
        ));
        Self {
            id,
            kind,
            local,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!(target: "peerlink.media", track_id = %self.id, kind = ?self.kind, "Track stopped");
        }
    }

    /// Track as handed to a peer connection.
    #[must_use]
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.local.clone()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A set of live capture tracks.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Build a stream with one track per requested kind.
    pub fn with_constraints(constraints: MediaConstraints) -> Self {
        let id = random_id();
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, &id));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, &id));
        }
        Self { id, tracks }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn stop_tracks(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// True when every track is still capturing.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| !t.is_stopped())
    }
}

/// Acquires and releases local capture.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;

    /// Give the stream back to the device layer. Tracks are already stopped.
    async fn release(&self, stream: MediaStream);
}

/// Exclusive ownership of an acquired stream until release.
#[derive(Debug)]
pub struct MediaHandle {
    stream: Option<MediaStream>,
}

impl MediaHandle {
    pub fn new(stream: MediaStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// The stream, or `None` once released.
    #[must_use]
    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    /// Stop all tracks and return the stream to its source.
    ///
    /// Returns `false` if the handle was already released.
    pub async fn release(&mut self, source: &dyn MediaSource) -> bool {
        let Some(stream) = self.stream.take() else {
            return false;
        };
        stream.stop_tracks();
        debug!(target: "peerlink.media", stream_id = %stream.id(), "Releasing media stream");
        source.release(stream).await;
        true
    }
}
