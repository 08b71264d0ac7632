use std::time::Duration;

use voicelink_types::{FunctionDeclaration, MicProfile, Voice};

use crate::resilience::RetryPolicy;

/// RMS below which a capture frame is treated as silence.
pub const GATE_THRESHOLD: f32 = 0.002;
/// Headroom added when the playback cursor has to be re-anchored to the clock.
pub const PLAYBACK_LEAD_SECS: f64 = 0.050;
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);
pub const AMBIENT_GAIN: f32 = 0.05;
pub const EVENT_CAPACITY: usize = 256;

/// Everything fixed for one connection attempt.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    persona: String,
    model: Option<String>,
    voice: Voice,
    instructions: String,
    tools: Vec<FunctionDeclaration>,
}

impl SessionConfig {
    pub fn builder(persona: &str) -> SessionConfigBuilder {
        SessionConfigBuilder::new(persona)
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// Model override. `None` leaves the choice to the connector.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn voice(&self) -> Voice {
        self.voice
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tools(&self) -> &[FunctionDeclaration] {
        &self.tools
    }

    /// The context message sent as soon as the link goes live.
    pub fn readiness_message(&self) -> String {
        format!(
            "You are connected as the {} persona with the {} voice. The user's microphone is live; greet them briefly.",
            self.persona, self.voice
        )
    }
}

pub struct SessionConfigBuilder {
    persona: String,
    model: Option<String>,
    voice: Option<String>,
    instructions: String,
    tools: Vec<FunctionDeclaration>,
}

impl SessionConfigBuilder {
    fn new(persona: &str) -> Self {
        Self {
            persona: persona.to_string(),
            model: None,
            voice: None,
            instructions: String::new(),
            tools: Vec::new(),
        }
    }

    /// Blank names are ignored.
    pub fn with_model(mut self, model: &str) -> Self {
        let model = model.trim();
        self.model = (!model.is_empty()).then(|| model.to_string());
        self
    }

    /// Requested voice name. Names outside the allow-list fall back to the
    /// persona's default voice when the config is built.
    pub fn with_voice(mut self, voice: &str) -> Self {
        self.voice = Some(voice.to_string());
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    pub fn with_tool(mut self, declaration: FunctionDeclaration) -> Self {
        self.tools.push(declaration);
        self
    }

    pub fn with_tools(mut self, declarations: Vec<FunctionDeclaration>) -> Self {
        self.tools.extend(declarations);
        self
    }

    pub fn build(self) -> SessionConfig {
        let voice = match self.voice.as_deref() {
            Some(name) => name.parse::<Voice>().unwrap_or_else(|e| {
                let fallback = Voice::for_persona(&self.persona);
                tracing::warn!("{e}, using {fallback} for persona {}", self.persona);
                fallback
            }),
            None => Voice::for_persona(&self.persona),
        };
        SessionConfig {
            persona: self.persona,
            model: self.model,
            voice,
            instructions: self.instructions,
            tools: self.tools,
        }
    }
}

/// Tunables of the link itself, shared by every connection of a session.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub retry: RetryPolicy,
    pub gate_threshold: f32,
    pub watchdog_interval: Duration,
    /// Upper bound on concurrently running tool calls. `None` is unbounded.
    pub max_tool_calls: Option<usize>,
    /// Re-enter the retry loop when an active link drops abnormally.
    pub reconnect_on_drop: bool,
    pub mic_profile: MicProfile,
    pub event_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            gate_threshold: GATE_THRESHOLD,
            watchdog_interval: WATCHDOG_INTERVAL,
            max_tool_calls: None,
            reconnect_on_drop: false,
            mic_profile: MicProfile::default(),
            event_capacity: EVENT_CAPACITY,
        }
    }
}
