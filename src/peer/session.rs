//! One initiating peer connection attempt.
//!
//! `PeerSession` owns the transport and enforces the handshake order: the
//! offer is handed out once, an answer is only accepted after it, and nothing
//! is accepted after `destroy`. A call rejected by these guards leaves the
//! session exactly as it was.

use super::state::PeerState;
use super::types::PeerEvent;
use super::{PeerConnector, PeerTransport};
use crate::error::PeerError;
use crate::media::MediaHandle;
use crate::signaling::SignalPayload;
use crate::utils::random_id;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct PeerSession {
    id: String,
    transport: Option<Box<dyn PeerTransport>>,
    state: PeerState,
}

impl PeerSession {
    /// Open a connection bound to the handle's stream.
    pub async fn create(
        connector: &dyn PeerConnector,
        media: &MediaHandle,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, PeerError> {
        let stream = media
            .stream()
            .ok_or_else(|| PeerError::Init("media stream has been released".into()))?;
        if !stream.is_live() {
            return Err(PeerError::Init("media stream has no live tracks".into()));
        }

        let id = random_id();
        let transport = connector.open(stream, events).await?;
        info!(
            target: "peerlink.peer",
            peer_id = %id,
            stream_id = %stream.id(),
            "Peer session created"
        );

        Ok(Self {
            id,
            transport: Some(transport),
            state: PeerState::Created,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> &PeerState {
        &self.state
    }

    /// True between sending the offer and applying an answer.
    #[must_use]
    pub fn awaiting_answer(&self) -> bool {
        self.state == PeerState::OfferSent
    }

    /// Hand out the local offer. Only the first signal gets through.
    pub fn take_offer(&mut self, payload: SignalPayload) -> Option<SignalPayload> {
        if self.state == PeerState::Created {
            self.state = PeerState::OfferSent;
            debug!(target: "peerlink.peer", peer_id = %self.id, "Local offer ready");
            Some(payload)
        } else {
            warn!(
                target: "peerlink.peer",
                peer_id = %self.id,
                state = self.state.name(),
                "Dropping extra local signal"
            );
            None
        }
    }

    /// Apply the remote answer to complete the handshake.
    pub async fn accept_answer(&mut self, answer: SignalPayload) -> Result<(), PeerError> {
        match &self.state {
            PeerState::OfferSent => {}
            PeerState::Created => {
                return Err(PeerError::Signal("no offer has been sent yet".into()));
            }
            PeerState::AnswerApplied | PeerState::Connected => {
                return Err(PeerError::Signal("an answer was already applied".into()));
            }
            PeerState::Failed(reason) => {
                return Err(PeerError::Signal(format!("session has failed: {reason}")));
            }
            PeerState::Destroyed => {
                return Err(PeerError::Signal("session has been destroyed".into()));
            }
        }

        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| PeerError::Signal("session has no transport".into()))?;
        transport.apply_answer(answer).await?;

        self.state = PeerState::AnswerApplied;
        info!(target: "peerlink.peer", peer_id = %self.id, "Remote answer applied");
        Ok(())
    }

    /// Record connectivity. Returns `true` only the first time.
    pub fn mark_connected(&mut self) -> bool {
        match self.state {
            PeerState::OfferSent | PeerState::AnswerApplied => {
                self.state = PeerState::Connected;
                info!(target: "peerlink.peer", peer_id = %self.id, "Peer connected");
                true
            }
            _ => false,
        }
    }

    /// Mark the session unusable.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.state != PeerState::Destroyed {
            self.state = PeerState::Failed(reason.into());
        }
    }

    /// Close the transport. Safe to call more than once.
    pub async fn destroy(&mut self) -> Result<(), PeerError> {
        if self.state == PeerState::Destroyed {
            return Ok(());
        }
        self.state = PeerState::Destroyed;
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };
        debug!(target: "peerlink.peer", peer_id = %self.id, "Destroying peer session");
        transport.close().await
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaConstraints, MediaSource, MediaStream, LocalTrackSource};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        answers: AtomicUsize,
        closes: AtomicUsize,
    }

    struct StubConnector {
        counters: Arc<Counters>,
        reject_answer: bool,
    }

    struct StubTransport {
        counters: Arc<Counters>,
        reject_answer: bool,
    }

    #[async_trait]
    impl PeerConnector for StubConnector {
        async fn open(
            &self,
            _stream: &MediaStream,
            _events: mpsc::UnboundedSender<PeerEvent>,
        ) -> Result<Box<dyn PeerTransport>, PeerError> {
            Ok(Box::new(StubTransport {
                counters: self.counters.clone(),
                reject_answer: self.reject_answer,
            }))
        }
    }

    #[async_trait]
    impl PeerTransport for StubTransport {
        async fn apply_answer(&self, _answer: SignalPayload) -> Result<(), PeerError> {
            self.counters.answers.fetch_add(1, Ordering::SeqCst);
            if self.reject_answer {
                Err(PeerError::Signal("malformed sdp".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), PeerError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn payload(kind: &str) -> SignalPayload {
        SignalPayload::new(json!({ "type": kind, "sdp": "v=0" }))
    }

    async fn new_session(reject_answer: bool) -> (PeerSession, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let connector = StubConnector {
            counters: counters.clone(),
            reject_answer,
        };
        let source = LocalTrackSource::new();
        let media = MediaHandle::new(source.acquire(MediaConstraints::default()).await.unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = PeerSession::create(&connector, &media, tx).await.unwrap();
        (session, counters)
    }

    #[tokio::test]
    async fn test_create_requires_live_stream() {
        let connector = StubConnector {
            counters: Arc::default(),
            reject_answer: false,
        };
        let source = LocalTrackSource::new();
        let mut media = MediaHandle::new(source.acquire(MediaConstraints::default()).await.unwrap());
        media.release(&source).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = PeerSession::create(&connector, &media, tx).await;
        assert!(matches!(result, Err(PeerError::Init(_))));
    }

    #[tokio::test]
    async fn test_offer_is_single_fire() {
        let (mut session, _) = new_session(false).await;

        assert!(session.take_offer(payload("offer")).is_some());
        assert!(session.take_offer(payload("offer")).is_none());
        assert!(session.take_offer(payload("offer")).is_none());
        assert_eq!(session.state(), &PeerState::OfferSent);
    }

    #[tokio::test]
    async fn test_answer_before_offer_is_rejected_without_side_effects() {
        let (mut session, counters) = new_session(false).await;

        let result = session.accept_answer(payload("answer")).await;
        assert!(matches!(result, Err(PeerError::Signal(_))));
        assert_eq!(session.state(), &PeerState::Created);
        assert_eq!(counters.answers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_answer_after_destroy_is_rejected() {
        let (mut session, counters) = new_session(false).await;
        session.take_offer(payload("offer"));
        session.destroy().await.unwrap();

        let result = session.accept_answer(payload("answer")).await;
        assert!(matches!(result, Err(PeerError::Signal(_))));
        assert_eq!(session.state(), &PeerState::Destroyed);
        assert_eq!(counters.answers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handshake_then_connect_once() {
        let (mut session, counters) = new_session(false).await;
        session.take_offer(payload("offer"));
        assert!(session.awaiting_answer());

        session.accept_answer(payload("answer")).await.unwrap();
        assert_eq!(session.state(), &PeerState::AnswerApplied);
        assert!(matches!(
            session.accept_answer(payload("answer")).await,
            Err(PeerError::Signal(_))
        ));
        assert_eq!(counters.answers.load(Ordering::SeqCst), 1);

        assert!(session.mark_connected());
        assert!(!session.mark_connected());
    }

    #[tokio::test]
    async fn test_rejected_answer_keeps_waiting() {
        let (mut session, _) = new_session(true).await;
        session.take_offer(payload("offer"));

        assert!(session.accept_answer(payload("answer")).await.is_err());
        assert_eq!(session.state(), &PeerState::OfferSent);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (mut session, counters) = new_session(false).await;
        session.mark_failed("ice failed");
        assert!(matches!(session.state(), PeerState::Failed(_)));

        session.destroy().await.unwrap();
        session.destroy().await.unwrap();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(!session.mark_connected());
    }
}
