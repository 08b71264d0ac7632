pub mod audio;
pub mod events;
pub mod state;
pub mod tools;
pub mod transcript;

pub use audio::{AmbientMode, MicProfile, Voice};
pub use events::{Inbound, Outbound, SessionEvent};
pub use state::SessionState;
pub use tools::{FunctionDeclaration, ToolCallRequest, ToolCallResponse, ToolOutcome};
pub use transcript::{Source, TranscriptEvent};
