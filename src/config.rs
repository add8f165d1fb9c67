//! Client configuration.
//!
//! Loaded from environment variables with defaults that point at a local
//! development server. Credentials are redacted in Debug output.

use crate::auth::Credentials;
use crate::media::MediaConstraints;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Logging is on by default in debug builds only; PEERLINK_LOG overrides it.
#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const DEFAULT_AUTH_URL: &str = "http://localhost:5000";
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:5000/signaling";
pub const DEFAULT_TOKEN_PATH: &str = "peerlink-token.json";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait this long for a `Disconnected` peer to recover before failing it.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Logging switch and filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Everything the client needs to reach the auth and signaling servers.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the auth server; the login call goes to `{auth_url}/login`.
    pub auth_url: String,

    /// WebSocket endpoint of the signaling server.
    pub signaling_url: String,

    /// File backing the token store.
    pub token_path: PathBuf,

    pub http_timeout: Duration,
    pub connect_timeout: Duration,

    /// Upper bound on ICE gathering before the offer is sent.
    pub gather_timeout: Duration,

    pub grace_period: Duration,

    pub ice_servers: Vec<ServerConfig>,

    pub media: MediaConstraints,

    pub log: LogConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ice: Vec<&str> = self.ice_servers.iter().map(|s| s.url.as_str()).collect();
        f.debug_struct("ClientConfig")
            .field("auth_url", &self.auth_url)
            .field("signaling_url", &self.signaling_url)
            .field("token_path", &self.token_path)
            .field("http_timeout", &self.http_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("gather_timeout", &self.gather_timeout)
            .field("grace_period", &self.grace_period)
            .field("ice_servers", &ice)
            .field("media", &self.media)
            .field("log", &self.log)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            ice_servers: default_ice_servers(),
            media: MediaConstraints::default(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let auth_url = non_empty(vars, "PEERLINK_AUTH_URL")?
            .unwrap_or(defaults.auth_url)
            .trim_end_matches('/')
            .to_string();

        let signaling_url =
            non_empty(vars, "PEERLINK_SIGNALING_URL")?.unwrap_or(defaults.signaling_url);
        if !signaling_url.starts_with("ws://") && !signaling_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(format!(
                "PEERLINK_SIGNALING_URL must be a ws:// or wss:// URL, got {signaling_url}"
            )));
        }

        let token_path = non_empty(vars, "PEERLINK_TOKEN_PATH")?
            .map(PathBuf::from)
            .unwrap_or(defaults.token_path);

        let ice_servers = match vars.get("PEERLINK_ICE_SERVERS") {
            Some(list) => parse_ice_servers(list)?,
            None => defaults.ice_servers,
        };

        let media = MediaConstraints {
            audio: parse_bool(vars, "PEERLINK_AUDIO")?.unwrap_or(defaults.media.audio),
            video: parse_bool(vars, "PEERLINK_VIDEO")?.unwrap_or(defaults.media.video),
        };
        if !media.audio && !media.video {
            return Err(ConfigError::InvalidValue(
                "at least one of PEERLINK_AUDIO or PEERLINK_VIDEO must be enabled".into(),
            ));
        }

        Ok(Self {
            auth_url,
            signaling_url,
            token_path,
            http_timeout: parse_secs(vars, "PEERLINK_HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
            connect_timeout: parse_secs(
                vars,
                "PEERLINK_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
            gather_timeout: parse_secs(
                vars,
                "PEERLINK_GATHER_TIMEOUT_SECS",
                defaults.gather_timeout,
            )?,
            grace_period: parse_secs(vars, "PEERLINK_GRACE_PERIOD_SECS", defaults.grace_period)?,
            ice_servers,
            media,
            log: parse_log(vars.get("PEERLINK_LOG").map(String::as_str)),
        })
    }

    /// Full URL of the login call.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/login", self.auth_url)
    }
}

/// Credentials for a non-interactive login, if both halves are set.
///
/// A username without a password is an error; neither set means the caller
/// should resume from the stored token instead.
pub fn credentials_from_vars(
    vars: &HashMap<String, String>,
) -> Result<Option<Credentials>, ConfigError> {
    match (vars.get("PEERLINK_USERNAME"), vars.get("PEERLINK_PASSWORD")) {
        (None, None) => Ok(None),
        (Some(user), Some(password)) => Ok(Some(Credentials::new(user.clone(), password.clone()))),
        (Some(_), None) => Err(ConfigError::MissingEnvVar("PEERLINK_PASSWORD".into())),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar("PEERLINK_USERNAME".into())),
    }
}

fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_STUN_SERVERS
        .iter()
        .enumerate()
        .map(|(i, url)| ServerConfig {
            id: format!("default-stun-{i}"),
            r#type: "stun".into(),
            url: (*url).to_string(),
            username: None,
            credential: None,
        })
        .collect()
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Result<Option<String>, ConfigError> {
    match vars.get(key) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => {
            Err(ConfigError::InvalidValue(format!("{key} must not be empty")))
        }
        Some(v) => Ok(Some(v.trim().to_string())),
    }
}

fn parse_secs(
    vars: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(v) => {
            let secs: u64 = v
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("{key}={v}: {e}")))?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str) -> Result<Option<bool>, ConfigError> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue(format!("{key}={v} is not a boolean"))),
        },
    }
}

/// `PEERLINK_LOG` is either an on/off switch or a filter directive that also
/// turns logging on.
fn parse_log(value: Option<&str>) -> LogConfig {
    let mut log = LogConfig::default();
    let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return log;
    };
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => log.enabled = true,
        "0" | "false" | "no" | "off" => log.enabled = false,
        _ => {
            log.enabled = true;
            log.filter = v.to_string();
        }
    }
    log
}

/// Parse a comma-separated ICE server list.
///
/// Entries look like `stun:host:port`, `turn:user:credential@host:port`, or a
/// bare `host:port` (treated as STUN).
pub fn parse_ice_servers(list: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let mut servers = Vec::new();
    for (i, raw) in list.split(',').map(str::trim).enumerate() {
        if raw.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "PEERLINK_ICE_SERVERS entry {i} is empty"
            )));
        }

        let (kind, rest) = if let Some(rest) = raw.strip_prefix("turn:") {
            ("turn", rest)
        } else if let Some(rest) = raw.strip_prefix("stun:") {
            ("stun", rest)
        } else {
            ("stun", raw)
        };

        let (username, credential, host) = match rest.rsplit_once('@') {
            Some((auth, host)) => {
                let (user, cred) = auth.split_once(':').ok_or_else(|| {
                    ConfigError::InvalidValue(format!(
                        "ICE server {i}: credentials must be user:credential"
                    ))
                })?;
                (Some(user.to_string()), Some(cred.to_string()), host)
            }
            None => (None, None, rest),
        };

        if host.is_empty() {
            return Err(ConfigError::InvalidValue(format!("ICE server {i} has no host")));
        }
        if kind == "turn" && username.is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "ICE server {i}: TURN servers require username and credential"
            )));
        }

        let mut server = ServerConfig {
            id: format!("ice-{i}"),
            r#type: kind.to_string(),
            url: host.to_string(),
            username,
            credential,
        };
        server.url = add_ice_url_scheme(&server);
        servers.push(server);
    }
    Ok(servers)
}
