use peerlink::auth::{FileTokenStore, HttpAuthClient};
use peerlink::config::{credentials_from_vars, ClientConfig};
use peerlink::logger::init_logging;
use peerlink::media::LocalTrackSource;
use peerlink::peer::RtcPeerConnector;
use peerlink::signaling::WsSignalingChannel;
use peerlink::{SessionCoordinator, SessionDeps, SessionNotice, SessionSettings};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(target: "peerlink.session", error = %e, "Fatal error");
        eprintln!("peerlink: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env()?;
    init_logging(&config.log);
    info!(target: "peerlink.session", config = ?config, "Starting peerlink");

    let deps = SessionDeps {
        auth: Arc::new(HttpAuthClient::new(config.login_url(), config.http_timeout)?),
        tokens: Arc::new(FileTokenStore::new(config.token_path.clone())),
        media: Arc::new(LocalTrackSource::new()),
        signaling: Arc::new(WsSignalingChannel::new(config.connect_timeout)),
        peers: Arc::new(RtcPeerConnector::new(
            config.ice_servers.clone(),
            config.gather_timeout,
            config.grace_period,
        )),
    };
    let (handle, task) = SessionCoordinator::spawn(deps, SessionSettings::from_config(&config));

    let mut notices = handle.subscribe();
    let vars: HashMap<String, String> = std::env::vars().collect();
    match credentials_from_vars(&vars)? {
        Some(credentials) => handle.login(credentials).await?,
        None => handle.resume().await?,
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: "peerlink.session", "Interrupted, shutting down");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(SessionNotice::StateChanged(status)) => println!("state: {}", status.state),
                Ok(SessionNotice::Failure { title, message, .. }) => println!("{title}: {message}"),
                Ok(SessionNotice::Warning(message)) => println!("warning: {message}"),
                Err(RecvError::Lagged(skipped)) => println!("warning: {skipped} notices skipped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let report = handle.shutdown().await?;
    info!(target: "peerlink.session", report = ?report, "Session closed");
    let _ = task.await;
    Ok(())
}
