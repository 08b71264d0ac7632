use std::fmt;

/// Connection lifecycle of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Reconnecting,
    Error,
}

impl SessionState {
    /// True while a connection is established or being established.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Active | SessionState::Reconnecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "IDLE",
            SessionState::Connecting => "CONNECTING",
            SessionState::Active => "ACTIVE",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Error => "ERROR",
        };
        f.write_str(s)
    }
}
