//! Connects the link to the live endpoint through `live-realtime`.
//!
//! Two tasks per connection translate between the link's [`Outbound`] /
//! [`Inbound`] messages and the wire protocol.

use async_trait::async_trait;
use live_realtime::types::{
    ClientContentMessage, ClientMessage, RealtimeInputMessage, ServerMessage, Setup,
    ToolResponseMessage,
};
use live_realtime::{
    AuthRejected, ClientTx, ConfigBuilder, HandshakeTimeout, ServerEvent, ServerRx,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use voicelink_core::config::SessionConfig;
use voicelink_core::transport::{Channel, Connector};
use voicelink_core::{Result, VoiceError};
use voicelink_native_utils::audio::{decode_base64, encode_base64};
use voicelink_types::{
    Inbound, Outbound, Source, ToolCallRequest, ToolCallResponse, ToolOutcome, TranscriptEvent,
};

pub struct LiveConnector {
    base_url: Option<String>,
}

impl LiveConnector {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }

    /// Client settings for one connection. Anything the session does not
    /// override keeps the client's defaults.
    fn live_config(
        &self,
        config: &SessionConfig,
        credential: &SecretString,
    ) -> live_realtime::Config {
        let mut builder = ConfigBuilder::new()
            .with_api_key(SecretString::from(credential.expose_secret().to_string()));
        if let Some(model) = config.model() {
            builder = builder.with_model(model);
        }
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        builder.build()
    }

    fn setup(live: &live_realtime::Config, config: &SessionConfig) -> Setup {
        let declarations = config
            .tools()
            .iter()
            .filter_map(|d| match serde_json::to_value(d) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("skipping tool {}: {}", d.name(), e);
                    None
                }
            })
            .collect();
        Setup::new(live.model(), config.voice().name())
            .with_instructions(config.instructions())
            .with_function_declarations(declarations)
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn open(&self, config: &SessionConfig, credential: &SecretString) -> Result<Channel> {
        let live = self.live_config(config, credential);
        let client = live_realtime::connect(&live, Self::setup(&live, config))
            .await
            .map_err(classify)?;
        let (client_tx, server_rx) = client.into_parts();

        let (outbound_tx, outbound_rx) = mpsc::channel(live.capacity());
        let (inbound_tx, inbound_rx) = mpsc::channel(live.capacity());
        tokio::spawn(forward_outbound(outbound_rx, client_tx));
        tokio::spawn(forward_inbound(server_rx, inbound_tx));

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn classify(e: anyhow::Error) -> VoiceError {
    if let Some(rejected) = e.downcast_ref::<AuthRejected>() {
        return VoiceError::Unauthorized(rejected.to_string());
    }
    if let Some(timeout) = e.downcast_ref::<HandshakeTimeout>() {
        return VoiceError::Handshake(timeout.to_string());
    }
    VoiceError::Transport(format!("{e:#}"))
}

async fn forward_outbound(mut rx: mpsc::Receiver<Outbound>, client_tx: ClientTx) {
    while let Some(message) = rx.recv().await {
        let Some(message) = to_client_message(message) else {
            tracing::debug!("link asked to close the live channel");
            break;
        };
        if client_tx.send(message).await.is_err() {
            tracing::debug!("live writer gone, dropping outbound messages");
            break;
        }
    }
    // Dropping `client_tx` sends the close frame.
}

async fn forward_inbound(mut server_rx: ServerRx, tx: mpsc::Sender<Inbound>) {
    while let Some(event) = server_rx.recv().await {
        let messages = match event {
            ServerEvent::Message(message) => translate(message),
            ServerEvent::Closed { reason, abnormal } => vec![Inbound::Closed { reason, abnormal }],
        };
        for message in messages {
            if tx.send(message).await.is_err() {
                tracing::debug!("inbound receiver dropped, stopping live reader");
                return;
            }
        }
    }
}

/// Converts a link message into its wire form. `Close` has none.
fn to_client_message(message: Outbound) -> Option<ClientMessage> {
    let message = match message {
        Outbound::Audio { data, mime_type } => ClientMessage::RealtimeInput(
            RealtimeInputMessage::audio(&mime_type, encode_base64(&data)),
        ),
        Outbound::Context { text } => {
            ClientMessage::ClientContent(ClientContentMessage::user_text(&text))
        }
        Outbound::ToolResponse(response) => ClientMessage::ToolResponse(tool_response(&response)),
        Outbound::Close => return None,
    };
    Some(message)
}

fn tool_response(response: &ToolCallResponse) -> ToolResponseMessage {
    let body = match response.outcome() {
        ToolOutcome::Result(result) => serde_json::json!({ "result": result }),
        ToolOutcome::Error(error) => serde_json::json!({ "error": error }),
    };
    ToolResponseMessage::single(response.id(), response.name(), body)
}

/// Splits one server frame into link messages, in the order the link should
/// observe them: barge-in first, then speech, transcripts, tool calls and the
/// end of the turn.
fn translate(message: ServerMessage) -> Vec<Inbound> {
    let mut out = Vec::new();

    if let Some(content) = message.server_content {
        if content.interrupted == Some(true) {
            out.push(Inbound::Interrupted);
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    if !blob.mime_type.starts_with("audio/") {
                        tracing::debug!("ignoring inline data of type {}", blob.mime_type);
                        continue;
                    }
                    let data = decode_base64(&blob.data);
                    if !data.is_empty() {
                        out.push(Inbound::Audio { data });
                    }
                } else if let Some(text) = part.text {
                    tracing::trace!("model text part: {}", text);
                }
            }
        }

        for (source, transcription) in [
            (Source::User, content.input_transcription),
            (Source::Model, content.output_transcription),
        ] {
            let Some(transcription) = transcription else {
                continue;
            };
            let event = if transcription.finished == Some(true) {
                TranscriptEvent::final_text(source, transcription.text)
            } else {
                TranscriptEvent::interim(source, transcription.text)
            };
            out.push(Inbound::Transcript(event));
        }

        if content.turn_complete == Some(true) {
            out.push(Inbound::TurnComplete);
        }
    }

    if let Some(tool_call) = message.tool_call {
        for call in tool_call.function_calls {
            out.push(Inbound::ToolCall(ToolCallRequest::new(
                &call.id,
                &call.name,
                call.args,
            )));
        }
    }

    out
}
