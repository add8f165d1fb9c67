//! Token persistence.
//!
//! The token is the only state that survives a restart. It lives under
//! [`TOKEN_KEY`] in a small JSON key/value file so other settings can share the
//! file without clobbering it.

use super::{AuthToken, TokenStore};
use crate::error::TokenStoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// Well-known key the token is stored under.
pub const TOKEN_KEY: &str = "authToken";

/// JSON-file backed store.
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_map(&self) -> Result<Map<String, Value>, TokenStoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(TokenStoreError::Io(e.to_string())),
        };
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(TokenStoreError::Corrupt("expected a JSON object".into())),
            Err(e) => Err(TokenStoreError::Corrupt(e.to_string())),
        }
    }

    async fn write_map(&self, map: Map<String, Value>) -> Result<(), TokenStoreError> {
        let body = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|e| TokenStoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TokenStoreError::Io(e.to_string()))?;
        }

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| TokenStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| TokenStoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, token: &AuthToken) -> Result<(), TokenStoreError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(TOKEN_KEY.to_string(), Value::String(token.expose().to_string()));
        self.write_map(map).await?;
        debug!(target: "peerlink.auth", path = %self.path.display(), "Token saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<AuthToken>, TokenStoreError> {
        let _guard = self.lock.lock().await;
        let map = self.read_map().await?;
        match map.get(TOKEN_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(AuthToken::new(s.clone()))),
            Some(_) => Err(TokenStoreError::Corrupt(format!("{TOKEN_KEY} is not a string"))),
        }
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(TOKEN_KEY).is_none() {
            return Ok(());
        }
        self.write_map(map).await?;
        debug!(target: "peerlink.auth", path = %self.path.display(), "Token cleared");
        Ok(())
    }
}

/// In-memory store, for tests and for clients that must not touch disk.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<AuthToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: AuthToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, token: &AuthToken) -> Result<(), TokenStoreError> {
        *self.token.lock().await = Some(token.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<AuthToken>, TokenStoreError> {
        Ok(self.token.lock().await.clone())
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        *self.token.lock().await = None;
        Ok(())
    }
}
