//! `webrtc`-backed peer connection.

use super::ice::{analyze_candidates, rtc_config};
use super::types::{PeerEvent, ServerConfig};
use super::{PeerConnector, PeerTransport};
use crate::error::PeerError;
use crate::media::MediaStream;
use crate::signaling::SignalPayload;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

type TaskSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Opens initiating peer connections with trickle ICE disabled.
pub struct RtcPeerConnector {
    ice_servers: Vec<ServerConfig>,
    gather_timeout: Duration,
    grace_period: Duration,
}

impl RtcPeerConnector {
    pub fn new(ice_servers: Vec<ServerConfig>, gather_timeout: Duration, grace_period: Duration) -> Self {
        Self {
            ice_servers,
            gather_timeout,
            grace_period,
        }
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn open(
        &self,
        stream: &MediaStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerTransport>, PeerError> {
        let init = |e: webrtc::Error| PeerError::Init(e.to_string());

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(init)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine).map_err(init)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&self.ice_servers))
                .await
                .map_err(init)?,
        );

        for track in stream.tracks() {
            let sender = match pc.add_track(track.rtc_track()).await {
                Ok(sender) => sender,
                Err(e) => {
                    let _ = pc.close().await;
                    return Err(init(e));
                }
            };
            // RTCP has to be drained for the interceptors (NACK, reports) to run.
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        let grace_task: TaskSlot = Arc::new(Mutex::new(None));
        watch_connection_state(&pc, events.clone(), grace_task.clone(), self.grace_period);

        let offer_task = tokio::spawn(generate_offer(
            Arc::downgrade(&pc),
            events,
            self.gather_timeout,
        ));

        info!(
            target: "peerlink.peer",
            tracks = stream.tracks().len(),
            ice_servers = self.ice_servers.len(),
            "Peer connection opened"
        );

        Ok(Box::new(RtcTransport {
            pc,
            grace_task,
            offer_task: Mutex::new(Some(offer_task)),
        }))
    }
}

/// Create the offer and emit it once gathering is complete.
async fn generate_offer(
    pc: Weak<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
    gather_timeout: Duration,
) {
    let Some(pc) = pc.upgrade() else {
        return;
    };

    let result: Result<RTCSessionDescription, String> = async {
        let offer = pc.create_offer(None).await.map_err(|e| e.to_string())?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| e.to_string())?;

        if timeout(gather_timeout, gather_complete.recv()).await.is_err() {
            warn!(
                target: "peerlink.peer",
                timeout_secs = gather_timeout.as_secs(),
                "ICE gathering did not complete in time; sending what we have"
            );
        }

        pc.local_description()
            .await
            .ok_or_else(|| "no local description after gathering".to_string())
    }
    .await;

    let event = match result.and_then(|desc| {
        analyze_candidates(&desc.sdp);
        serde_json::to_value(&desc).map_err(|e| e.to_string())
    }) {
        Ok(value) => {
            debug!(target: "peerlink.peer", "Local offer generated");
            PeerEvent::Signal(SignalPayload::new(value))
        }
        Err(e) => {
            warn!(target: "peerlink.peer", error = %e, "Offer generation failed");
            PeerEvent::Error(format!("offer generation failed: {e}"))
        }
    };
    let _ = events.send(event);
}

/// Map connection state changes to peer events.
///
/// `Disconnected` is given `grace` to recover before it is reported as an
/// error; `Failed` is reported immediately.
fn watch_connection_state(
    pc: &Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
    grace_task: TaskSlot,
    grace: Duration,
) {
    let pc_weak = Arc::downgrade(pc);

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        debug!(target: "peerlink.peer", state = ?st, "Peer connection state changed");

        match st {
            RTCPeerConnectionState::Connected => {
                cancel_task(&grace_task);
                let _ = events.send(PeerEvent::Connected);
            }

            RTCPeerConnectionState::Disconnected => {
                let Ok(mut slot) = grace_task.lock() else {
                    return Box::pin(async {});
                };
                if slot.is_some() {
                    debug!(target: "peerlink.peer", "Grace period already running");
                    return Box::pin(async {});
                }

                warn!(
                    target: "peerlink.peer",
                    grace_secs = grace.as_secs(),
                    "Peer disconnected; waiting for recovery"
                );
                let pc = pc_weak.clone();
                let events = events.clone();
                let slot_for_task = grace_task.clone();
                *slot = Some(tokio::spawn(async move {
                    sleep(grace).await;
                    let state_now = pc
                        .upgrade()
                        .map(|pc| pc.connection_state())
                        .unwrap_or(RTCPeerConnectionState::Closed);
                    if let Ok(mut slot) = slot_for_task.lock() {
                        slot.take();
                    }
                    if state_now == RTCPeerConnectionState::Connected {
                        info!(target: "peerlink.peer", "Connection recovered during grace period");
                    } else {
                        let _ = events.send(PeerEvent::Error(format!(
                            "connection lost (state {state_now} after grace period)"
                        )));
                    }
                }));
            }

            RTCPeerConnectionState::Failed => {
                cancel_task(&grace_task);
                let _ = events.send(PeerEvent::Error("ICE connection failed".into()));
            }

            RTCPeerConnectionState::Closed => {
                cancel_task(&grace_task);
                let _ = events.send(PeerEvent::Closed);
            }

            _ => {}
        }
        Box::pin(async {})
    }));
}

fn cancel_task(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Ok(mut slot) = slot.lock() {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    grace_task: TaskSlot,
    offer_task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn apply_answer(&self, answer: SignalPayload) -> Result<(), PeerError> {
        let desc: RTCSessionDescription = serde_json::from_value(answer.into_value())
            .map_err(|e| PeerError::Signal(format!("answer is not a session description: {e}")))?;
        if desc.sdp_type != RTCSdpType::Answer {
            return Err(PeerError::Signal(format!(
                "expected an answer, got {}",
                desc.sdp_type
            )));
        }
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::Signal(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        cancel_task(&self.offer_task);
        cancel_task(&self.grace_task);
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::Runtime(format!("close failed: {e}")))
    }
}
