//! Recording collaborators for driving the coordinator end to end.

#![allow(dead_code)]

use async_trait::async_trait;
use peerlink::auth::{AuthClient, AuthToken, Credentials, MemoryTokenStore, TokenStore};
use peerlink::error::{AuthError, MediaError, PeerError, SignalingError};
use peerlink::media::{MediaConstraints, MediaSource, MediaStream};
use peerlink::peer::{PeerConnector, PeerEvent, PeerTransport};
use peerlink::signaling::{
    SignalPayload, SignalingChannel, SignalingConnection, SignalingEvent, SignalingLink,
    SignalingMessage,
};
use peerlink::{
    SessionCoordinator, SessionDeps, SessionHandle, SessionNotice, SessionSettings, SessionStatus,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

/// Every acquire/release call, in order.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }

    /// Position of the last occurrence of `entry`.
    pub fn last_index(&self, entry: &str) -> Option<usize> {
        self.entries().iter().rposition(|e| e == entry)
    }
}

pub struct MockAuth {
    journal: Journal,
    error: Option<AuthError>,
}

#[async_trait]
impl AuthClient for MockAuth {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, AuthError> {
        self.journal.record("auth.login");
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(AuthToken::new(format!("token-for-{}", credentials.username))),
        }
    }
}

pub struct MockMedia {
    journal: Journal,
    errors: Mutex<VecDeque<MediaError>>,
    pub gate: Option<Arc<Notify>>,
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        self.journal.record("media.acquire");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next_error = self.errors.lock().unwrap().pop_front();
        match next_error {
            Some(e) => Err(e),
            None => Ok(MediaStream::with_constraints(constraints)),
        }
    }

    async fn release(&self, _stream: MediaStream) {
        self.journal.record("media.release");
    }
}

pub struct MockSignaling {
    journal: Journal,
    error: Option<SignalingError>,
    auto_answer: bool,
    disconnect_error: bool,
    pub gate: Option<Arc<Notify>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<SignalingEvent>>>,
    tokens_seen: Mutex<Vec<String>>,
}

impl MockSignaling {
    /// Push an event as if the server had sent it.
    pub fn inject(&self, event: SignalingEvent) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn connect(
        &self,
        _endpoint: &str,
        token: &AuthToken,
    ) -> Result<SignalingLink, SignalingError> {
        self.journal.record("signaling.connect");
        self.tokens_seen
            .lock()
            .unwrap()
            .push(token.expose().to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().unwrap() = Some(tx.clone());
        Ok(SignalingLink {
            connection: Box::new(MockConnection {
                journal: self.journal.clone(),
                inbound: tx,
                auto_answer: self.auto_answer,
                disconnect_error: self.disconnect_error,
            }),
            events: rx,
        })
    }
}

struct MockConnection {
    journal: Journal,
    inbound: mpsc::UnboundedSender<SignalingEvent>,
    auto_answer: bool,
    disconnect_error: bool,
}

#[async_trait]
impl SignalingConnection for MockConnection {
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.journal.record(format!("signaling.send:{}", message.tag()));
        if self.auto_answer && matches!(message, SignalingMessage::Offer(_)) {
            let _ = self
                .inbound
                .send(SignalingEvent::Message(SignalingMessage::Answer(answer())));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        self.journal.record("signaling.disconnect");
        if self.disconnect_error {
            return Err(SignalingError::Closed("socket already gone".into()));
        }
        Ok(())
    }
}

pub struct MockPeers {
    journal: Journal,
    double_signal: bool,
    connect_on_answer: bool,
    open_error: Option<PeerError>,
    reject_answer: bool,
    close_error: bool,
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl MockPeers {
    /// Report an event from the most recently opened connection.
    pub fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl PeerConnector for MockPeers {
    async fn open(
        &self,
        stream: &MediaStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerTransport>, PeerError> {
        assert!(stream.is_live(), "peer opened on a dead stream");
        self.journal.record("peer.open");
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        *self.events.lock().unwrap() = Some(events.clone());

        let _ = events.send(PeerEvent::Signal(offer()));
        if self.double_signal {
            let _ = events.send(PeerEvent::Signal(offer()));
        }

        Ok(Box::new(MockTransport {
            journal: self.journal.clone(),
            events,
            connect_on_answer: self.connect_on_answer,
            reject_answer: self.reject_answer,
            close_error: self.close_error,
        }))
    }
}

struct MockTransport {
    journal: Journal,
    events: mpsc::UnboundedSender<PeerEvent>,
    connect_on_answer: bool,
    reject_answer: bool,
    close_error: bool,
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn apply_answer(&self, _answer: SignalPayload) -> Result<(), PeerError> {
        self.journal.record("peer.answer");
        if self.reject_answer {
            return Err(PeerError::Signal("remote description rejected".into()));
        }
        if self.connect_on_answer {
            let _ = self.events.send(PeerEvent::Connected);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.journal.record("peer.close");
        if self.close_error {
            return Err(PeerError::Runtime("close failed".into()));
        }
        Ok(())
    }
}

pub fn offer() -> SignalPayload {
    SignalPayload::new(json!({ "type": "offer", "sdp": "v=0 offer" }))
}

pub fn answer() -> SignalPayload {
    SignalPayload::new(json!({ "type": "answer", "sdp": "v=0 answer" }))
}

pub fn credentials() -> Credentials {
    Credentials::new("alice", "hunter2")
}

/// How the collaborators should behave.
#[derive(Default)]
pub struct Scenario {
    pub auth_error: Option<AuthError>,
    pub media_errors: Vec<MediaError>,
    pub media_gate: bool,
    pub signaling_error: Option<SignalingError>,
    pub signaling_gate: bool,
    pub disconnect_error: bool,
    pub auto_answer: bool,
    pub double_signal: bool,
    pub connect_on_answer: bool,
    pub open_error: Option<PeerError>,
    pub reject_answer: bool,
    pub close_error: bool,
    pub stored_token: Option<String>,
}

impl Scenario {
    /// Every stage succeeds and the viewer answers and connects.
    pub fn happy() -> Self {
        Self {
            auto_answer: true,
            connect_on_answer: true,
            ..Self::default()
        }
    }

    pub fn start(self) -> Harness {
        let journal = Journal::default();
        let auth = Arc::new(MockAuth {
            journal: journal.clone(),
            error: self.auth_error,
        });
        let media = Arc::new(MockMedia {
            journal: journal.clone(),
            errors: Mutex::new(self.media_errors.into()),
            gate: self.media_gate.then(|| Arc::new(Notify::new())),
        });
        let signaling = Arc::new(MockSignaling {
            journal: journal.clone(),
            error: self.signaling_error,
            auto_answer: self.auto_answer,
            disconnect_error: self.disconnect_error,
            gate: self.signaling_gate.then(|| Arc::new(Notify::new())),
            inbound: Mutex::new(None),
            tokens_seen: Mutex::new(Vec::new()),
        });
        let peers = Arc::new(MockPeers {
            journal: journal.clone(),
            double_signal: self.double_signal,
            connect_on_answer: self.connect_on_answer,
            open_error: self.open_error,
            reject_answer: self.reject_answer,
            close_error: self.close_error,
            events: Mutex::new(None),
        });
        let tokens = Arc::new(match self.stored_token {
            Some(token) => MemoryTokenStore::with_token(AuthToken::new(token)),
            None => MemoryTokenStore::new(),
        });

        let deps = SessionDeps {
            auth,
            tokens: tokens.clone(),
            media: media.clone(),
            signaling: signaling.clone(),
            peers: peers.clone(),
        };
        let (handle, task) =
            SessionCoordinator::spawn(deps, SessionSettings::new("ws://signaling.test"));
        let notices = handle.subscribe();

        Harness {
            handle,
            task,
            notices,
            journal,
            media,
            signaling,
            peers,
            tokens,
        }
    }
}

pub struct Harness {
    pub handle: SessionHandle,
    pub task: JoinHandle<()>,
    pub notices: broadcast::Receiver<SessionNotice>,
    pub journal: Journal,
    pub media: Arc<MockMedia>,
    pub signaling: Arc<MockSignaling>,
    pub peers: Arc<MockPeers>,
    pub tokens: Arc<MemoryTokenStore>,
}

impl Harness {
    pub async fn wait_for(&self, pred: impl FnMut(&SessionStatus) -> bool) -> SessionStatus {
        tokio::time::timeout(WAIT, self.handle.wait_for(pred))
            .await
            .expect("timed out waiting for state")
            .expect("coordinator stopped")
    }

    /// Poll the journal until `entry` shows up.
    pub async fn wait_journal(&self, entry: &str) {
        tokio::time::timeout(WAIT, async {
            while !self.journal.contains(entry) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {entry}"));
    }

    pub fn open_gate(&self) {
        self.media
            .gate
            .as_ref()
            .expect("scenario has no media gate")
            .notify_one();
    }

    pub fn open_signaling_gate(&self) {
        self.signaling
            .gate
            .as_ref()
            .expect("scenario has no signaling gate")
            .notify_one();
    }

    pub async fn stored_token(&self) -> Option<String> {
        self.tokens
            .load()
            .await
            .unwrap()
            .map(|t| t.expose().to_string())
    }

    /// Wait for the next warning notice, skipping everything else.
    pub async fn next_warning(&mut self) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                if let SessionNotice::Warning(message) = self.notices.recv().await.unwrap() {
                    return message;
                }
            }
        })
        .await
        .expect("timed out waiting for a warning")
    }

    /// Every notice published so far.
    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}
