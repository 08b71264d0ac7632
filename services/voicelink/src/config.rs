//! Application Configuration Module
//!
//! Loads settings from the environment (and a `.env` file when present) into
//! a single struct handed to the rest of the service.

use std::env;
use std::str::FromStr;

use secrecy::SecretString;
use tracing::Level;
use voicelink_types::{AmbientMode, MicProfile};

// --- Application Constants ---

/// Frames per cpal callback on the microphone stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// Frames per cpal callback on the speaker stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Capacity of the microphone ring buffer, in milliseconds of audio.
pub const INPUT_LATENCY_MS: usize = 500;

pub const DEFAULT_PERSONA: &str = "assistant";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly voice assistant. Keep answers short and conversational. Use the available tools when the user asks for the time or wants something repeated back.";

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub persona: String,
    pub voice: Option<String>,
    pub mic_profile: MicProfile,
    pub ambient: AmbientMode,
    pub max_retries: u32,
    pub reconnect_on_drop: bool,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Secret key for the live endpoint. Required.
    // *   `LIVE_MODEL`: (Optional) Model identifier.
    // *   `LIVE_BASE_URL`: (Optional) WebSocket endpoint override.
    // *   `PERSONA`: (Optional) Defaults to "assistant".
    // *   `VOICE`: (Optional) Prebuilt voice name; unknown names fall back to the persona's voice.
    // *   `MIC_PROFILE`: (Optional) "standard", "isolation" or "hifi".
    // *   `AMBIENT`: (Optional) "off", "drone" or "rain".
    // *   `MAX_RETRIES`: (Optional) Connection retries before giving up. Defaults to 3.
    // *   `RECONNECT_ON_DROP`: (Optional) "true" to reconnect after an abnormal close.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url: lookup("LIVE_BASE_URL"),
            model: lookup("LIVE_MODEL"),
            persona: lookup("PERSONA").unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            voice: lookup("VOICE"),
            mic_profile: parse_var(&lookup, "MIC_PROFILE")?.unwrap_or_default(),
            ambient: parse_var(&lookup, "AMBIENT")?.unwrap_or_default(),
            max_retries: parse_var(&lookup, "MAX_RETRIES")?.unwrap_or(3),
            reconnect_on_drop: parse_var(&lookup, "RECONNECT_ON_DROP")?.unwrap_or(false),
            log_level,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "secret")])).unwrap();
        assert_eq!(config.api_key.expose_secret(), "secret");
        assert_eq!(config.persona, "assistant");
        assert_eq!(config.mic_profile, MicProfile::Standard);
        assert_eq!(config.ambient, AmbientMode::Off);
        assert_eq!(config.max_retries, 3);
        assert!(!config.reconnect_on_drop);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn missing_key_is_reported() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "GEMINI_API_KEY"));
    }

    #[test]
    fn parses_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("MIC_PROFILE", "isolation"),
            ("AMBIENT", "rain"),
            ("MAX_RETRIES", "5"),
            ("RECONNECT_ON_DROP", "true"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.mic_profile, MicProfile::Isolation);
        assert_eq!(config.ambient, AmbientMode::Rain);
        assert_eq!(config.max_retries, 5);
        assert!(config.reconnect_on_drop);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("MAX_RETRIES", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "secret"),
            ("RUST_LOG", "loud"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }
}
