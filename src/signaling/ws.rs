//! WebSocket signaling client.

use super::{SignalingChannel, SignalingConnection, SignalingEvent, SignalingLink, SignalingMessage};
use crate::auth::AuthToken;
use crate::error::SignalingError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long `disconnect` waits for the close frame to flush.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects to the signaling server with the token as a bearer header.
pub struct WsSignalingChannel {
    connect_timeout: Duration,
}

impl WsSignalingChannel {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn connect(
        &self,
        endpoint: &str,
        token: &AuthToken,
    ) -> Result<SignalingLink, SignalingError> {
        info!(target: "peerlink.signaling", endpoint = %endpoint, "Connecting to signaling server");

        let mut request = endpoint
            .into_client_request()
            .map_err(|e| SignalingError::ConnectFailed(format!("invalid endpoint: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| SignalingError::ConnectFailed("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                SignalingError::ConnectFailed(format!(
                    "timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(classify_connect_error)?;

        info!(target: "peerlink.signaling", "Connected to signaling server");

        let (write, read) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let sender = tokio::spawn(sender_task(write, out_rx));
        let receiver = tokio::spawn(receiver_task(read, event_tx));

        Ok(SignalingLink {
            connection: Box::new(WsConnection {
                tx: out_tx,
                tasks: Mutex::new(Some((sender, receiver))),
                closed: AtomicBool::new(false),
            }),
            events: event_rx,
        })
    }
}

fn classify_connect_error(e: tungstenite::Error) -> SignalingError {
    match e {
        tungstenite::Error::Http(response)
            if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
        {
            warn!(target: "peerlink.signaling", status = %response.status(), "Server rejected token");
            SignalingError::Rejected(format!("Status {}", response.status()))
        }
        other => {
            warn!(target: "peerlink.signaling", error = %other, "Signaling connect failed");
            SignalingError::ConnectFailed(other.to_string())
        }
    }
}

async fn sender_task(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = write.send(msg).await {
            warn!(target: "peerlink.signaling", error = %e, "Failed to send frame");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = write.close().await;
    debug!(target: "peerlink.signaling", "Sender task terminated");
}

async fn receiver_task(mut read: SplitStream<WsStream>, events: mpsc::UnboundedSender<SignalingEvent>) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match SignalingMessage::decode(&text) {
                Ok(msg) => {
                    debug!(target: "peerlink.signaling", event = msg.tag(), "Received frame");
                    if events.send(SignalingEvent::Message(msg)).is_err() {
                        break "listener dropped".to_string();
                    }
                }
                Err(e) => {
                    warn!(target: "peerlink.signaling", error = %e, "Ignoring unrecognized frame");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        }
    };
    info!(target: "peerlink.signaling", reason = %reason, "Signaling socket closed");
    let _ = events.send(SignalingEvent::Closed(reason));
}

struct WsConnection {
    tx: mpsc::UnboundedSender<Message>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    closed: AtomicBool,
}

#[async_trait]
impl SignalingConnection for WsConnection {
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SignalingError::Closed("connection already disconnected".into()));
        }
        let text = message.encode()?;
        debug!(target: "peerlink.signaling", event = message.tag(), "Sending frame");
        self.tx
            .send(Message::Text(text))
            .map_err(|_| SignalingError::Closed("sender task has stopped".into()))
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.tx.send(Message::Close(None));

        let Some((sender, receiver)) = self.tasks.lock().await.take() else {
            return Ok(());
        };
        receiver.abort();
        if join_or_abort(sender, CLOSE_FLUSH_TIMEOUT).await {
            debug!(target: "peerlink.signaling", "Signaling disconnected");
            Ok(())
        } else {
            warn!(target: "peerlink.signaling", "Close frame not flushed in time; dropping socket");
            Err(SignalingError::Closed("close frame was not flushed in time".into()))
        }
    }
}

/// Wait up to `limit` for `task` to finish, aborting it otherwise.
///
/// Returns `true` if the task finished on its own.
async fn join_or_abort(task: JoinHandle<()>, limit: Duration) -> bool {
    let abort = task.abort_handle();
    match tokio::time::timeout(limit, task).await {
        Ok(_) => true,
        Err(_) => {
            abort.abort();
            false
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            if let Some((sender, receiver)) = tasks.take() {
                sender.abort();
                receiver.abort();
            }
        }
    }
}
