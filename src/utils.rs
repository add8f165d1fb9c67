use crate::peer::types::ServerConfig;
use rand::Rng;

/// Short random hex id for streams, tracks and peer sessions.
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefix an ICE server URL with `stun:`/`turn:` when it has no scheme.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" { "turn:" } else { "stun:" };
        format!("{}{}", scheme, config.url)
    }
}
