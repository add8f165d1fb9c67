pub mod auth;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use error::FailureReason;
pub use session::{
    SessionCoordinator, SessionDeps, SessionHandle, SessionNotice, SessionSettings, SessionState,
    SessionStatus, TeardownReport,
};
