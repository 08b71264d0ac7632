use crate::types::{ClientMessage, ServerMessage, Setup, SetupMessage};
use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub mod config;
mod consts;

use config::Config;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type ClientTx = tokio::sync::mpsc::Sender<ClientMessage>;
pub type ServerRx = tokio::sync::mpsc::Receiver<ServerEvent>;
type ServerTx = tokio::sync::mpsc::Sender<ServerEvent>;

/// What the reader task hands to the application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Message(ServerMessage),
    /// The socket is gone. `abnormal` is false only for a clean close handshake.
    Closed {
        reason: Option<String>,
        abnormal: bool,
    },
}

/// The endpoint refused the upgrade because of the credential.
#[derive(Debug, thiserror::Error)]
#[error("live endpoint rejected the credential (HTTP {status})")]
pub struct AuthRejected {
    pub status: u16,
}

/// `setupComplete` did not arrive in time.
#[derive(Debug, thiserror::Error)]
#[error("setupComplete not received within {after:?}")]
pub struct HandshakeTimeout {
    pub after: std::time::Duration,
}

/// An established live session: a sender for client messages and a receiver
/// for server events, each pumped by its own task.
pub struct LiveClient {
    c_tx: ClientTx,
    s_rx: ServerRx,
}

impl LiveClient {
    /// Splits the client into its outbound sender and inbound receiver.
    /// Dropping every sender closes the socket gracefully.
    pub fn into_parts(self) -> (ClientTx, ServerRx) {
        (self.c_tx, self.s_rx)
    }
}

/// Opens the socket, sends the setup message and waits for `setupComplete`.
pub async fn connect(config: &Config, setup: Setup) -> Result<LiveClient> {
    let mut ws_stream = match tokio_tungstenite::connect_async(config.endpoint()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(tungstenite::Error::Http(response))
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            return Err(AuthRejected {
                status: response.status().as_u16(),
            }
            .into());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to connect to live WebSocket")),
    };

    let setup_json = serde_json::to_string(&ClientMessage::Setup(SetupMessage { setup }))?;
    tracing::debug!("sending setup: {}", setup_json);
    ws_stream
        .send(Message::Text(setup_json))
        .await
        .context("Failed to send setup message")?;

    tokio::time::timeout(config.handshake_timeout(), wait_for_setup(&mut ws_stream))
        .await
        .map_err(|_| HandshakeTimeout {
            after: config.handshake_timeout(),
        })??;
    tracing::info!("Live session setup complete.");

    let (mut write, mut read) = ws_stream.split();
    let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientMessage>(config.capacity());
    let (s_tx, s_rx) = tokio::sync::mpsc::channel::<ServerEvent>(config.capacity());

    tokio::spawn(async move {
        while let Some(message) = c_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::error!("failed to send message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("failed to serialize message: {}", e);
                }
            }
        }
        // Every sender is gone: close the socket politely.
        if let Err(e) = write.send(Message::Close(None)).await {
            tracing::debug!("close frame not sent: {}", e);
        }
    });

    tokio::spawn(read_loop(read, s_tx));

    Ok(LiveClient { c_tx, s_rx })
}

async fn wait_for_setup(ws_stream: &mut WsStream) -> Result<()> {
    while let Some(message) = ws_stream.next().await {
        match message.context("WebSocket error before setupComplete")? {
            Message::Text(text) => {
                if parse_frame(text.as_bytes()).is_some_and(|m| m.setup_complete.is_some()) {
                    return Ok(());
                }
            }
            Message::Binary(bin) => {
                if parse_frame(&bin).is_some_and(|m| m.setup_complete.is_some()) {
                    return Ok(());
                }
            }
            Message::Close(frame) => bail!("Connection closed before setupComplete: {:?}", frame),
            _ => {}
        }
    }
    bail!("Stream ended before setupComplete")
}

/// Parses a JSON server frame. The server may deliver JSON in binary frames.
fn parse_frame(bytes: &[u8]) -> Option<ServerMessage> {
    if bytes.first() != Some(&b'{') {
        return None;
    }
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::error!(
                "failed to deserialize server frame: {}, text=> {:?}",
                e,
                String::from_utf8_lossy(bytes)
            );
            None
        }
    }
}

async fn read_loop(mut read: futures_util::stream::SplitStream<WsStream>, s_tx: ServerTx) {
    let closed = loop {
        let message = match read.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::error!("failed to read message: {}", e);
                break ServerEvent::Closed {
                    reason: Some(e.to_string()),
                    abnormal: true,
                };
            }
            None => {
                break ServerEvent::Closed {
                    reason: Some("stream ended".to_string()),
                    abnormal: true,
                };
            }
        };

        let parsed = match message {
            Message::Text(text) => parse_frame(text.as_bytes()),
            Message::Binary(bin) => {
                let parsed = parse_frame(&bin);
                if parsed.is_none() {
                    tracing::warn!("unexpected binary message of {} bytes", bin.len());
                }
                parsed
            }
            Message::Close(frame) => {
                tracing::info!("connection closed: {:?}", frame);
                let abnormal = frame
                    .as_ref()
                    .is_some_and(|f| !matches!(f.code, CloseCode::Normal | CloseCode::Away));
                break ServerEvent::Closed {
                    reason: frame.map(|f| f.reason.to_string()),
                    abnormal,
                };
            }
            _ => None,
        };

        if let Some(message) = parsed {
            if let Some(go_away) = &message.go_away {
                tracing::warn!("server is going away, time left: {:?}", go_away.time_left);
            }
            if s_tx.send(ServerEvent::Message(message)).await.is_err() {
                tracing::debug!("server event receiver dropped, stopping reader");
                return;
            }
        }
    };

    if let Err(e) = s_tx.send(closed).await {
        tracing::debug!("failed to send close event: {}", e);
    }
}
