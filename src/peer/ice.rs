use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// Peer connection configuration for the given ICE servers.
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn to_rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Candidate counts found in an SDP blob.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateMix {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

/// Count the gathered candidates embedded in a non-trickle offer.
pub fn analyze_candidates(sdp: &str) -> CandidateMix {
    let mut mix = CandidateMix::default();
    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            mix.host += 1;
        } else if line.contains("typ srflx") {
            mix.srflx += 1;
        } else if line.contains("typ relay") {
            mix.relay += 1;
        }
    }

    debug!(
        target: "peerlink.peer",
        host = mix.host,
        srflx = mix.srflx,
        relay = mix.relay,
        "Candidate analysis"
    );
    if mix.host + mix.srflx + mix.relay == 0 {
        warn!(target: "peerlink.peer", "Offer carries no ICE candidates");
    } else if mix.relay == 0 {
        warn!(target: "peerlink.peer", "No TURN relay candidates; connection through NAT may fail");
    }
    mix
}
