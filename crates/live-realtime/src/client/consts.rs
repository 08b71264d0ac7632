pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

pub const BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-live-001";

pub const HANDSHAKE_TIMEOUT_SECS: u64 = 15;
pub const CHANNEL_CAPACITY: usize = 256;
