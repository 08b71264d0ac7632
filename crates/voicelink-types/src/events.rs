use crate::state::SessionState;
use crate::tools::{ToolCallRequest, ToolCallResponse};
use crate::transcript::TranscriptEvent;

/// Messages sent from the link to the remote agent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// A microphone frame, already encoded as PCM16.
    Audio { data: Vec<u8>, mime_type: String },
    /// Free-form text context injected into the conversation.
    Context { text: String },
    ToolResponse(ToolCallResponse),
    /// Ask the channel to close gracefully.
    Close,
}

/// Messages received from the remote agent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// PCM16 speech at 24 kHz.
    Audio { data: Vec<u8> },
    Transcript(TranscriptEvent),
    ToolCall(ToolCallRequest),
    /// The user barged in; queued speech is stale.
    Interrupted,
    TurnComplete,
    Closed {
        reason: Option<String>,
        abnormal: bool,
    },
}

/// Everything a consumer of the session can observe.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged {
        state: SessionState,
        detail: Option<String>,
    },
    Transcript(TranscriptEvent),
    ToolCallStarted {
        id: String,
        name: String,
    },
    ToolCallFinished {
        id: String,
        name: String,
        ok: bool,
    },
    Interrupted,
    TurnComplete,
}

impl SessionEvent {
    pub fn status(state: SessionState) -> Self {
        SessionEvent::StatusChanged {
            state,
            detail: None,
        }
    }
}
