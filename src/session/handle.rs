use super::types::{SessionNotice, SessionState, SessionStatus, TeardownReport};
use crate::auth::Credentials;
use crate::error::SessionError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub(super) enum Command {
    Login(Credentials),
    Resume,
    Teardown(oneshot::Sender<TeardownReport>),
    Logout(oneshot::Sender<TeardownReport>),
    Shutdown(oneshot::Sender<TeardownReport>),
}

/// Handle to a running [`super::SessionCoordinator`].
///
/// Cloneable. When the last handle is dropped the coordinator tears down and
/// exits.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    pub(super) fn new(
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<SessionStatus>,
        notices: broadcast::Sender<SessionNotice>,
    ) -> Self {
        Self {
            commands,
            status,
            notices,
        }
    }

    /// Start an attempt with fresh credentials.
    ///
    /// Ignored (with a warning notice) unless the session is idle.
    pub async fn login(&self, credentials: Credentials) -> Result<(), SessionError> {
        self.send(Command::Login(credentials)).await
    }

    /// Start an attempt with the stored token, if there is one.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.send(Command::Resume).await
    }

    /// Release everything and move to `Closed`.
    pub async fn teardown(&self) -> Result<TeardownReport, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Teardown(tx)).await?;
        rx.await.map_err(|_| SessionError::CoordinatorGone)
    }

    /// Tear down and forget the stored token.
    pub async fn logout(&self) -> Result<TeardownReport, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Logout(tx)).await?;
        rx.await.map_err(|_| SessionError::CoordinatorGone)
    }

    /// Tear down and stop the coordinator.
    pub async fn shutdown(&self) -> Result<TeardownReport, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| SessionError::CoordinatorGone)
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.borrow().state.clone()
    }

    /// Notices published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Wait until the published status satisfies `pred`.
    pub async fn wait_for(
        &self,
        pred: impl FnMut(&SessionStatus) -> bool,
    ) -> Result<SessionStatus, SessionError> {
        let mut status = self.status.clone();
        let result = status
            .wait_for(pred)
            .await
            .map(|s| s.clone())
            .map_err(|_| SessionError::CoordinatorGone);
        result
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::CoordinatorGone)
    }
}
