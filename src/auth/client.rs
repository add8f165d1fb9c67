//! HTTP login against the auth server.

use super::{AuthClient, AuthToken, Credentials};
use crate::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// `POST {login_url}` with `{username, password}`, expecting `{token}`.
pub struct HttpAuthClient {
    login_url: String,
    http: reqwest::Client,
}

impl HttpAuthClient {
    pub fn new(login_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AuthError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            login_url: login_url.into(),
            http,
        })
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    #[instrument(skip_all, fields(username = %credentials.username))]
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, AuthError> {
        debug!(target: "peerlink.auth", url = %self.login_url, "Requesting token");

        let response = self
            .http
            .post(&self.login_url)
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(|e| {
                debug!(target: "peerlink.auth", error = %e, "HTTP request failed");
                AuthError::Http(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let body: LoginResponse = response.json().await.map_err(|e| {
                warn!(target: "peerlink.auth", error = %e, "Failed to parse login response");
                AuthError::InvalidResponse(e.to_string())
            })?;
            if body.token.is_empty() {
                warn!(target: "peerlink.auth", "Login response carried an empty token");
                return Err(AuthError::InvalidResponse("empty token".into()));
            }
            debug!(target: "peerlink.auth", "Token acquired");
            Ok(AuthToken::new(body.token))
        } else if status.is_client_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(target: "peerlink.auth", status = %status, "Credentials rejected");
            trace!(target: "peerlink.auth", body = %body, "Rejection body");
            Err(AuthError::Rejected(format!("Status {status}")))
        } else {
            warn!(target: "peerlink.auth", status = %status, "Unexpected response from auth server");
            Err(AuthError::Http(format!("Unexpected status: {status}")))
        }
    }
}
