//! The session coordinator.
//!
//! One task owns the token, the media handle, the signaling connection and the
//! peer session, and walks them through Auth → Media → Signaling → Peer.
//! Stage work runs in spawned tasks that report back through the event queue,
//! each report tagged with the epoch of the attempt that started it. Teardown
//! and failure bump the epoch, so anything still in flight lands as a stale
//! event and whatever it carries is released on arrival.
//!
//! Release order is always peer, then signaling, then media.

mod handle;
mod types;

pub use handle::SessionHandle;
pub use types::{
    ResourceSnapshot, SessionNotice, SessionSettings, SessionState, SessionStatus, TeardownReport,
};

use crate::auth::{AuthClient, AuthToken, Credentials, TokenStore};
use crate::error::{AuthError, FailureReason, MediaError, PeerError, SignalingError};
use crate::media::{MediaHandle, MediaSource, MediaStream};
use crate::peer::{PeerConnector, PeerEvent, PeerSession};
use crate::signaling::{
    SignalPayload, SignalingChannel, SignalingConnection, SignalingEvent, SignalingLink,
    SignalingMessage,
};
use handle::Command;
use std::sync::Arc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_CHANNEL_BUFFER: usize = 32;
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// The collaborators a coordinator drives.
#[derive(Clone)]
pub struct SessionDeps {
    pub auth: Arc<dyn AuthClient>,
    pub tokens: Arc<dyn TokenStore>,
    pub media: Arc<dyn MediaSource>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub peers: Arc<dyn PeerConnector>,
}

enum StageEvent {
    LoggedIn(Result<AuthToken, AuthError>),
    MediaAcquired(Result<MediaStream, MediaError>),
    SignalingConnected(Result<SignalingLink, SignalingError>),
    Signaling(SignalingEvent),
    Peer(PeerEvent),
}

impl StageEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::LoggedIn(_) => "logged_in",
            Self::MediaAcquired(_) => "media_acquired",
            Self::SignalingConnected(_) => "signaling_connected",
            Self::Signaling(_) => "signaling",
            Self::Peer(_) => "peer",
        }
    }
}

struct Tagged {
    epoch: u64,
    event: StageEvent,
}

struct OpenSignaling {
    connection: Box<dyn SignalingConnection>,
    pump: JoinHandle<()>,
}

struct OpenPeer {
    session: PeerSession,
    pump: JoinHandle<()>,
}

pub struct SessionCoordinator {
    deps: SessionDeps,
    settings: SessionSettings,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events: mpsc::UnboundedReceiver<Tagged>,
    status: watch::Sender<SessionStatus>,
    notices: broadcast::Sender<SessionNotice>,
    /// Bumped whenever in-flight stage work must be disowned.
    epoch: u64,
    state: SessionState,
    token: Option<AuthToken>,
    media: Option<MediaHandle>,
    signaling: Option<OpenSignaling>,
    peer: Option<OpenPeer>,
}

impl SessionCoordinator {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionStatus::default());
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let handle = SessionHandle::new(command_tx, status_rx, notices.clone());
        let coordinator = Self {
            deps,
            settings,
            commands,
            events_tx,
            events,
            status,
            notices,
            epoch: 0,
            state: SessionState::Unauthenticated,
            token: None,
            media: None,
            signaling: None,
            peer: None,
        };
        (coordinator, handle)
    }

    /// Spawn the coordinator on the current runtime.
    pub fn spawn(deps: SessionDeps, settings: SessionSettings) -> (SessionHandle, JoinHandle<()>) {
        let (coordinator, handle) = Self::new(deps, settings);
        (handle, tokio::spawn(coordinator.run()))
    }

    /// Process commands and stage events until shutdown.
    pub async fn run(mut self) {
        info!(
            target: "peerlink.session",
            signaling_url = %self.settings.signaling_url,
            "Session coordinator started"
        );

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!(target: "peerlink.session", "All session handles dropped");
                        self.teardown().await;
                        break;
                    }
                },

                Some(tagged) = self.events.recv() => self.handle_event(tagged).await,
            }
        }

        self.drain_events().await;
        info!(target: "peerlink.session", "Session coordinator stopped");
    }

    /// Release whatever stage results are still queued. Once the queue is
    /// closed, stage tasks that finish later release their own results.
    async fn drain_events(&mut self) {
        self.events.close();
        while let Ok(tagged) = self.events.try_recv() {
            debug!(
                target: "peerlink.session",
                event = tagged.event.name(),
                "Releasing event queued at shutdown"
            );
            self.discard(tagged.event).await;
        }
    }

    /// Returns `true` when the loop should exit.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Login(credentials) => self.start_login(credentials),
            Command::Resume => self.resume().await,
            Command::Teardown(reply) => {
                let report = self.teardown().await;
                let _ = reply.send(report);
            }
            Command::Logout(reply) => {
                let report = self.logout().await;
                let _ = reply.send(report);
            }
            Command::Shutdown(reply) => {
                let report = self.teardown().await;
                let _ = reply.send(report);
                return true;
            }
        }
        false
    }

    fn start_login(&mut self, credentials: Credentials) {
        if !self.state.is_idle() {
            self.reject_busy("login");
            return;
        }

        self.epoch += 1;
        self.token = None;
        info!(
            target: "peerlink.session",
            username = %credentials.username,
            epoch = self.epoch,
            "Logging in"
        );
        self.set_state(SessionState::Authenticating);

        let auth = self.deps.auth.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = auth.login(&credentials).await;
            let _ = tx.send(Tagged {
                epoch,
                event: StageEvent::LoggedIn(result),
            });
        });
    }

    async fn resume(&mut self) {
        if !self.state.is_idle() {
            self.reject_busy("resume");
            return;
        }

        match self.deps.tokens.load().await {
            Ok(Some(token)) => {
                self.epoch += 1;
                info!(target: "peerlink.session", epoch = self.epoch, "Resuming with stored token");
                self.token = Some(token);
                self.enter_authenticated();
            }
            Ok(None) => {
                info!(target: "peerlink.session", "No stored token to resume with");
                self.publish_warning("No saved login; sign in to start a session".into());
            }
            Err(e) => {
                warn!(target: "peerlink.session", error = %e, "Could not load stored token");
                self.publish_warning(format!("Could not read saved login: {e}"));
            }
        }
    }

    async fn handle_event(&mut self, tagged: Tagged) {
        if tagged.epoch != self.epoch || !self.expects(&tagged.event) {
            debug!(
                target: "peerlink.session",
                event = tagged.event.name(),
                event_epoch = tagged.epoch,
                epoch = self.epoch,
                state = self.state.name(),
                "Discarding stale event"
            );
            self.discard(tagged.event).await;
            return;
        }

        match tagged.event {
            StageEvent::LoggedIn(result) => self.on_logged_in(result).await,
            StageEvent::MediaAcquired(result) => self.on_media_acquired(result).await,
            StageEvent::SignalingConnected(result) => self.on_signaling_connected(result).await,
            StageEvent::Signaling(event) => self.on_signaling_event(event).await,
            StageEvent::Peer(event) => self.on_peer_event(event).await,
        }
    }

    fn expects(&self, event: &StageEvent) -> bool {
        match event {
            StageEvent::LoggedIn(_) => self.state == SessionState::Authenticating,
            StageEvent::MediaAcquired(_) => self.state == SessionState::AcquiringMedia,
            StageEvent::SignalingConnected(_) => self.state == SessionState::Connecting,
            StageEvent::Signaling(_) => self.signaling.is_some(),
            StageEvent::Peer(_) => self.peer.is_some(),
        }
    }

    /// Release whatever a disowned event carries.
    async fn discard(&self, event: StageEvent) {
        match event {
            StageEvent::LoggedIn(Ok(_token)) => {
                debug!(target: "peerlink.session", "Dropping token from a cancelled login");
            }
            StageEvent::MediaAcquired(Ok(stream)) => {
                info!(
                    target: "peerlink.session",
                    stream_id = %stream.id(),
                    "Releasing media acquired by a cancelled attempt"
                );
                MediaHandle::new(stream)
                    .release(self.deps.media.as_ref())
                    .await;
            }
            StageEvent::SignalingConnected(Ok(link)) => {
                info!(target: "peerlink.session", "Closing signaling opened by a cancelled attempt");
                if let Err(e) = link.connection.disconnect().await {
                    warn!(target: "peerlink.session", error = %e, "Disconnect of stale signaling failed");
                }
            }
            _ => {}
        }
    }

    async fn on_logged_in(&mut self, result: Result<AuthToken, AuthError>) {
        let token = match result {
            Ok(token) => token,
            Err(e) => return self.fail(e.into()).await,
        };

        info!(target: "peerlink.auth", "Login succeeded");
        if let Err(e) = self.deps.tokens.save(&token).await {
            warn!(target: "peerlink.auth", error = %e, "Could not persist token");
            self.publish_warning(format!("Could not save login: {e}"));
        }
        self.token = Some(token);
        self.enter_authenticated();
    }

    fn enter_authenticated(&mut self) {
        self.set_state(SessionState::Authenticated);
        self.set_state(SessionState::AcquiringMedia);

        let media = self.deps.media.clone();
        let constraints = self.settings.media;
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = media.acquire(constraints).await;
            let sent = tx.send(Tagged {
                epoch,
                event: StageEvent::MediaAcquired(result),
            });
            if let Err(SendError(Tagged {
                event: StageEvent::MediaAcquired(Ok(stream)),
                ..
            })) = sent
            {
                MediaHandle::new(stream).release(media.as_ref()).await;
            }
        });
    }

    async fn on_media_acquired(&mut self, result: Result<MediaStream, MediaError>) {
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => return self.fail(e.into()).await,
        };

        info!(
            target: "peerlink.media",
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            "Media ready"
        );
        self.media = Some(MediaHandle::new(stream));
        self.set_state(SessionState::MediaReady);
        self.start_signaling().await;
    }

    async fn start_signaling(&mut self) {
        let Some(token) = self.token.clone() else {
            return self
                .fail(FailureReason::Signaling("no auth token for signaling".into()))
                .await;
        };
        self.set_state(SessionState::Connecting);

        let channel = self.deps.signaling.clone();
        let endpoint = self.settings.signaling_url.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = channel.connect(&endpoint, &token).await;
            let sent = tx.send(Tagged {
                epoch,
                event: StageEvent::SignalingConnected(result),
            });
            if let Err(SendError(Tagged {
                event: StageEvent::SignalingConnected(Ok(link)),
                ..
            })) = sent
            {
                let _ = link.connection.disconnect().await;
            }
        });
    }

    async fn on_signaling_connected(&mut self, result: Result<SignalingLink, SignalingError>) {
        let SignalingLink { connection, events } = match result {
            Ok(link) => link,
            Err(e) => return self.fail(e.into()).await,
        };

        info!(target: "peerlink.signaling", "Signaling connected");
        let pump = forward(events, self.events_tx.clone(), self.epoch, StageEvent::Signaling);
        self.signaling = Some(OpenSignaling { connection, pump });
        self.set_state(SessionState::Signaling);
        self.start_peer().await;
    }

    async fn start_peer(&mut self) {
        let (Some(media), Some(_)) = (self.media.as_ref(), self.signaling.as_ref()) else {
            let err = PeerError::Init("media and signaling must be ready first".into());
            return self.fail(err.into()).await;
        };

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        match PeerSession::create(self.deps.peers.as_ref(), media, peer_tx).await {
            Ok(session) => {
                let pump = forward(peer_rx, self.events_tx.clone(), self.epoch, StageEvent::Peer);
                self.peer = Some(OpenPeer { session, pump });
                self.set_state(SessionState::PeerNegotiating);
            }
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn on_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(SignalingMessage::Answer(answer)) => self.on_answer(answer).await,
            SignalingEvent::Message(SignalingMessage::Offer(_)) => {
                warn!(target: "peerlink.signaling", "Ignoring inbound offer");
            }
            SignalingEvent::Message(SignalingMessage::Error(reason)) => {
                self.on_signaling_lost(SignalingError::Server(reason)).await;
            }
            SignalingEvent::Closed(reason) => {
                self.on_signaling_lost(SignalingError::Closed(reason)).await;
            }
        }
    }

    async fn on_signaling_lost(&mut self, err: SignalingError) {
        if self.state == SessionState::Active {
            // Media is already flowing peer to peer.
            warn!(target: "peerlink.signaling", error = %err, "Signaling lost while active");
            self.publish_warning(err.to_string());
        } else {
            self.fail(err.into()).await;
        }
    }

    async fn on_answer(&mut self, answer: SignalPayload) {
        let Some(peer) = self.peer.as_mut() else {
            let err = PeerError::Signal("answer arrived with no peer session".into());
            warn!(target: "peerlink.peer", error = %err, "Dropping answer");
            self.publish_warning(err.to_string());
            return;
        };

        if !peer.session.awaiting_answer() {
            warn!(
                target: "peerlink.peer",
                peer_id = %peer.session.id(),
                state = peer.session.state().name(),
                "Ignoring unexpected answer"
            );
            return;
        }

        let result = peer.session.accept_answer(answer).await;
        if let Err(e) = result {
            self.fail(e.into()).await;
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        match event {
            PeerEvent::Signal(payload) => {
                let Some(offer) = peer.session.take_offer(payload) else {
                    return;
                };
                let sent = match self.signaling.as_ref() {
                    Some(signaling) => signaling.connection.send(SignalingMessage::Offer(offer)).await,
                    None => Err(SignalingError::Closed("no signaling connection".into())),
                };
                match sent {
                    Ok(()) => info!(target: "peerlink.signaling", "Offer sent"),
                    Err(e) => self.fail(e.into()).await,
                }
            }
            PeerEvent::Connected => {
                if peer.session.mark_connected() && self.state == SessionState::PeerNegotiating {
                    self.set_state(SessionState::Active);
                }
            }
            PeerEvent::Error(reason) => {
                peer.session.mark_failed(reason.clone());
                self.fail(PeerError::Runtime(reason).into()).await;
            }
            PeerEvent::Closed => {
                self.fail(PeerError::Runtime("peer connection closed".into()).into())
                    .await;
            }
        }
    }

    /// End the attempt: release everything and land in `Failed`.
    ///
    /// The token is kept so that a later attempt can resume.
    async fn fail(&mut self, reason: FailureReason) {
        error!(
            target: "peerlink.session",
            stage = reason.stage(),
            detail = reason.detail(),
            state = self.state.name(),
            "Session attempt failed"
        );

        self.epoch += 1;
        let report = self.release_resources().await;
        if !report.errors.is_empty() {
            warn!(target: "peerlink.session", errors = ?report.errors, "Errors while releasing resources");
        }

        let (title, message) = reason.user_message();
        let _ = self.notices.send(SessionNotice::Failure {
            title: title.to_string(),
            message: message.to_string(),
            reason: reason.clone(),
        });
        self.set_state(SessionState::Failed(reason));
    }

    async fn teardown(&mut self) -> TeardownReport {
        if self.state == SessionState::Closed {
            debug!(target: "peerlink.session", "Teardown on a closed session");
            return TeardownReport::default();
        }

        self.epoch += 1;
        let report = self.release_resources().await;
        self.token = None;
        info!(
            target: "peerlink.session",
            peer = report.peer_destroyed,
            signaling = report.signaling_disconnected,
            media = report.media_released,
            errors = report.errors.len(),
            "Session torn down"
        );
        self.set_state(SessionState::Closed);
        report
    }

    async fn logout(&mut self) -> TeardownReport {
        let mut report = self.teardown().await;
        if let Err(e) = self.deps.tokens.clear().await {
            warn!(target: "peerlink.auth", error = %e, "Could not clear stored token");
            report.errors.push(e.to_string());
        }
        info!(target: "peerlink.auth", "Logged out");
        report
    }

    /// Peer, then signaling, then media. Every step runs even if an earlier
    /// one errors.
    async fn release_resources(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(mut peer) = self.peer.take() {
            peer.pump.abort();
            if let Err(e) = peer.session.destroy().await {
                warn!(target: "peerlink.peer", error = %e, "Peer destroy failed");
                report.errors.push(e.to_string());
            }
            report.peer_destroyed = true;
        }

        if let Some(signaling) = self.signaling.take() {
            signaling.pump.abort();
            if let Err(e) = signaling.connection.disconnect().await {
                warn!(target: "peerlink.signaling", error = %e, "Signaling disconnect failed");
                report.errors.push(e.to_string());
            }
            report.signaling_disconnected = true;
        }

        if let Some(mut media) = self.media.take() {
            report.media_released = media.release(self.deps.media.as_ref()).await;
        }

        report
    }

    fn reject_busy(&self, command: &str) {
        warn!(
            target: "peerlink.session",
            command,
            state = self.state.name(),
            "Ignoring command while a session is in progress"
        );
        self.publish_warning(format!(
            "Ignoring {command}: session is {}",
            self.state.name()
        ));
    }

    fn publish_warning(&self, message: String) {
        let _ = self.notices.send(SessionNotice::Warning(message));
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            state: self.state.clone(),
            resources: ResourceSnapshot {
                token: self.token.is_some(),
                media: self.media.as_ref().is_some_and(|m| !m.is_released()),
                signaling: self.signaling.is_some(),
                peer: self.peer.is_some(),
            },
        }
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(
            target: "peerlink.session",
            from = self.state.name(),
            to = state.name(),
            epoch = self.epoch,
            "State transition"
        );
        self.state = state;

        let status = self.snapshot();
        if !status.resources.is_consistent() {
            error!(
                target: "peerlink.session",
                resources = ?status.resources,
                "Peer session held without media and signaling"
            );
        }
        self.status.send_replace(status.clone());
        let _ = self.notices.send(SessionNotice::StateChanged(status));
    }
}

/// Forward a collaborator's event stream into the coordinator queue.
fn forward<T, F>(
    mut rx: mpsc::UnboundedReceiver<T>,
    tx: mpsc::UnboundedSender<Tagged>,
    epoch: u64,
    wrap: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> StageEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if tx
                .send(Tagged {
                    epoch,
                    event: wrap(item),
                })
                .is_err()
            {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{HttpAuthClient, MemoryTokenStore};
    use crate::media::{LocalTrackSource, MediaConstraints};
    use crate::peer::RtcPeerConnector;
    use crate::signaling::WsSignalingChannel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingConnection {
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SignalingConnection for CountingConnection {
        async fn send(&self, _message: SignalingMessage) -> Result<(), SignalingError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SignalingError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Real adapters pointed at nothing; only the media source is exercised.
    fn coordinator(media: Arc<LocalTrackSource>) -> (SessionCoordinator, SessionHandle) {
        let deps = SessionDeps {
            auth: Arc::new(
                HttpAuthClient::new("http://127.0.0.1:9/login", Duration::from_secs(1)).unwrap(),
            ),
            tokens: Arc::new(MemoryTokenStore::new()),
            media,
            signaling: Arc::new(WsSignalingChannel::new(Duration::from_secs(1))),
            peers: Arc::new(RtcPeerConnector::new(
                Vec::new(),
                Duration::from_secs(1),
                Duration::from_secs(1),
            )),
        };
        SessionCoordinator::new(deps, SessionSettings::new("ws://127.0.0.1:9"))
    }

    #[tokio::test]
    async fn test_answer_without_peer_is_reported_and_ignored() {
        let (mut coordinator, handle) = coordinator(Arc::new(LocalTrackSource::new()));
        let mut notices = handle.subscribe();
        let disconnects = Arc::new(AtomicUsize::new(0));
        coordinator.signaling = Some(OpenSignaling {
            connection: Box::new(CountingConnection {
                disconnects: disconnects.clone(),
            }),
            pump: tokio::spawn(async {}),
        });
        coordinator.state = SessionState::Signaling;

        let answer = SignalPayload::new(json!({ "type": "answer", "sdp": "v=0" }));
        let epoch = coordinator.epoch;
        coordinator
            .handle_event(Tagged {
                epoch,
                event: StageEvent::Signaling(SignalingEvent::Message(SignalingMessage::Answer(
                    answer,
                ))),
            })
            .await;

        assert_eq!(coordinator.state, SessionState::Signaling);
        assert!(coordinator.peer.is_none());
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
        match notices.try_recv().unwrap() {
            SessionNotice::Warning(message) => assert!(message.contains("Peer signal error")),
            other => panic!("unexpected notice: {other:?}"),
        }
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_queued_at_exit_are_released() {
        let media = Arc::new(LocalTrackSource::new());
        let (coordinator, handle) = coordinator(media.clone());

        let stream = media.acquire(MediaConstraints::default()).await.unwrap();
        let tracks = stream.clone();
        coordinator
            .events_tx
            .send(Tagged {
                epoch: coordinator.epoch,
                event: StageEvent::MediaAcquired(Ok(stream)),
            })
            .unwrap_or_else(|_| panic!("queue closed"));

        // No handles left: the loop tears down before looking at the queue.
        drop(handle);
        coordinator.run().await;

        assert_eq!(media.live_streams().await, 0);
        assert!(!tracks.is_live());
    }
}
