use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Sample rate of microphone frames sent to the remote agent.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized speech received from the remote agent.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Number of samples in one captured frame.
pub const FRAME_SAMPLES: usize = 4096;
/// Descriptor attached to every outbound microphone frame.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";
/// Descriptor of inbound speech audio.
pub const PLAYBACK_MIME_TYPE: &str = "audio/pcm;rate=24000";

/// Voice identities the remote agent can synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

/// Returned when a voice name is not on the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVoice(pub String);

impl fmt::Display for UnknownVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown voice: {}", self.0)
    }
}

impl std::error::Error for UnknownVoice {}

impl Voice {
    pub const ALL: [Voice; 8] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Aoede,
        Voice::Leda,
        Voice::Orus,
        Voice::Zephyr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Zephyr => "Zephyr",
        }
    }

    /// Default voice for a persona, used when the requested voice is not allowed.
    pub fn for_persona(persona: &str) -> Voice {
        match persona.to_ascii_lowercase().as_str() {
            "assistant" => Voice::Kore,
            "tutor" => Voice::Puck,
            "companion" => Voice::Aoede,
            _ => Voice::Zephyr,
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Voice {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVoice(s.to_string()))
    }
}

impl Serialize for Voice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Voice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Voice::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct VoiceHolder {
        #[serde(skip_serializing_if = "Option::is_none")]
        voice: Option<Voice>,
    }

    #[test]
    fn test_serialize() {
        let holder = VoiceHolder {
            voice: Some(Voice::Aoede),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"voice":"Aoede"}"#);

        let holder = VoiceHolder { voice: None };
        assert_eq!(serde_json::to_string(&holder).unwrap(), "{}");
    }

    #[test]
    fn test_deserialize() {
        let holder: VoiceHolder = serde_json::from_str(r#"{"voice":"kore"}"#).unwrap();
        assert_eq!(holder.voice, Some(Voice::Kore));

        assert!(serde_json::from_str::<VoiceHolder>(r#"{"voice":"alloy"}"#).is_err());
    }

    #[test]
    fn test_persona_fallback() {
        assert_eq!(Voice::for_persona("Tutor"), Voice::Puck);
        assert_eq!(Voice::for_persona("someone-else"), Voice::Zephyr);
    }
}
