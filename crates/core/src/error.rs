/// Failures surfaced by the voice link.
///
/// [`VoiceError::is_fatal`] separates errors that end a connection attempt
/// immediately from those the retry loop may recover from.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VoiceError {
    #[error("microphone access denied")]
    PermissionDenied,
    #[error("missing or invalid credential: {0}")]
    Credential(String),
    #[error("authorization rejected: {0}")]
    Unauthorized(String),
    #[error("unsupported audio backend: {0}")]
    Unsupported(String),
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("remote closed the connection: {0}")]
    RemoteClosed(String),
    #[error("audio error: {0}")]
    Audio(String),
    #[error("session is not active")]
    NotActive,
}

impl VoiceError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied
                | VoiceError::Credential(_)
                | VoiceError::Unauthorized(_)
                | VoiceError::Unsupported(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(VoiceError::PermissionDenied.is_fatal());
        assert!(VoiceError::Credential("unset".into()).is_fatal());
        assert!(!VoiceError::Transport("reset".into()).is_fatal());
        assert!(!VoiceError::RemoteClosed("1006".into()).is_fatal());
    }

    #[test]
    fn permission_message_is_distinct() {
        assert_eq!(VoiceError::PermissionDenied.to_string(), "microphone access denied");
    }
}
