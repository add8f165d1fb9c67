//! Credentials, the auth token, and the two auth collaborators.

mod client;
mod store;

pub use client::HttpAuthClient;
pub use store::{FileTokenStore, MemoryTokenStore, TOKEN_KEY};

use crate::error::{AuthError, TokenStoreError};
use async_trait::async_trait;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username and password for the login call.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Opaque bearer token. Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for attaching to a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

/// Exchanges credentials for a token.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, AuthError>;
}

/// Durable storage for the one token the client keeps across restarts.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save(&self, token: &AuthToken) -> Result<(), TokenStoreError>;
    async fn load(&self) -> Result<Option<AuthToken>, TokenStoreError>;
    async fn clear(&self) -> Result<(), TokenStoreError>;
}
