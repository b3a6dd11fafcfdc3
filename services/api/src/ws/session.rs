//! Manages one relay session: a client websocket paired with an upstream one.

use super::upstream::{CLIENT_REQUEST_ID, UpstreamStream};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage, error::ProtocolError};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use voicerag_core::{
    ClientBoundTransform, Outbound, RelayError, ServerBoundTransform, SessionPolicy, ToolRegistry,
};

type UpstreamSink = SplitSink<UpstreamStream, WsMessage>;
type ClientSink = SplitSink<WebSocket, Message>;

/// Why a relay session stopped.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("Upstream socket error: {0}")]
    Upstream(#[from] tungstenite::Error),
    #[error("Client socket error: {0}")]
    Client(#[from] axum::Error),
}

impl SessionError {
    /// Whether the session ended because a peer went away rather than
    /// because something was wrong.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Relay(_) => false,
            Self::Upstream(e) => match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
                tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
                tungstenite::Error::Io(io) => matches!(
                    io.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                        | ErrorKind::UnexpectedEof
                ),
                _ => false,
            },
            // Any failure on the client leg means the client is gone.
            Self::Client(_) => true,
        }
    }
}

/// Axum handler to upgrade an HTTP connection to a relay WebSocket.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let client_request_id = headers.get(CLIENT_REQUEST_ID).cloned();
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_request_id))
}

#[instrument(name = "relay_session", skip_all, fields(session_id = %Uuid::new_v4()))]
async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    client_request_id: Option<HeaderValue>,
) {
    info!("Client connected. Opening upstream connection...");
    let upstream = match state.upstream.connect(client_request_id.as_ref()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = ?e, "Upstream connection failed, closing client");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: Utf8Bytes::from_static("upstream unavailable"),
                })))
                .await;
            return;
        }
    };

    let session = RelaySession::new(Arc::clone(&state.registry), Arc::clone(&state.policy));
    match session.run(socket, upstream).await {
        Ok(()) => info!("Relay session finished."),
        Err(e) if e.is_disconnect() => debug!(reason = %e, "Relay session ended by disconnect."),
        Err(e) => error!(error = %e, "Relay session terminated with error."),
    }
}

/// The two transforms of one conversation, ready to be driven over a pair of
/// sockets.
pub struct RelaySession {
    server_bound: ServerBoundTransform,
    client_bound: ClientBoundTransform,
}

impl RelaySession {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<SessionPolicy>) -> Self {
        Self {
            server_bound: ServerBoundTransform::new(Arc::clone(&registry), Arc::clone(&policy)),
            client_bound: ClientBoundTransform::new(registry, policy),
        }
    }

    /// Pumps frames in both directions until either side closes or fails,
    /// then closes both connections.
    pub async fn run(self, client: WebSocket, upstream: UpstreamStream) -> Result<(), SessionError> {
        let (mut client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();
        let upstream_tx = Mutex::new(upstream_tx);

        let result = tokio::select! {
            r = client_to_upstream(&self.server_bound, client_rx, &upstream_tx) => r,
            r = upstream_to_client(self.client_bound, upstream_rx, &mut client_tx, &upstream_tx) => r,
        };

        let _ = upstream_tx.lock().await.close().await;
        let _ = client_tx.close().await;
        result
    }
}

async fn client_to_upstream(
    transform: &ServerBoundTransform,
    mut client_rx: SplitStream<WebSocket>,
    upstream_tx: &Mutex<UpstreamSink>,
) -> Result<(), SessionError> {
    while let Some(message) = client_rx.next().await {
        match message? {
            Message::Text(text) => {
                if let Some(frame) = transform.process(text.as_str())? {
                    upstream_tx
                        .lock()
                        .await
                        .send(WsMessage::Text(frame.into()))
                        .await?;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(data) => {
                warn!(bytes = data.len(), "Unexpected binary frame from client, dropping it.");
            }
        }
    }

    info!("Client closed the connection. Closing upstream socket.");
    upstream_tx.lock().await.close().await?;
    Ok(())
}

async fn upstream_to_client(
    mut transform: ClientBoundTransform,
    mut upstream_rx: SplitStream<UpstreamStream>,
    client_tx: &mut ClientSink,
    upstream_tx: &Mutex<UpstreamSink>,
) -> Result<(), SessionError> {
    while let Some(message) = upstream_rx.next().await {
        match message? {
            WsMessage::Text(text) => {
                for outbound in transform.process(text.as_str()).await? {
                    match outbound {
                        Outbound::Client(frame) => {
                            client_tx.send(Message::Text(frame.into())).await?;
                        }
                        Outbound::Upstream(frame) => {
                            upstream_tx
                                .lock()
                                .await
                                .send(WsMessage::Text(frame.into()))
                                .await?;
                        }
                    }
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            other => {
                warn!(bytes = other.len(), "Unexpected non-text frame from upstream, dropping it.");
            }
        }
    }

    info!("Upstream closed the connection. Closing client socket.");
    client_tx.close().await?;
    Ok(())
}
