use super::consts;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

pub struct Config {
    base_url: String,
    api_key: SecretString,
    model: String,
    handshake_timeout: Duration,
    capacity: usize,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.config.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: consts::BASE_URL.to_string(),
            api_key: std::env::var(consts::API_KEY_VAR)
                .unwrap_or_default()
                .into(),
            model: consts::DEFAULT_MODEL.to_string(),
            handshake_timeout: Duration::from_secs(consts::HANDSHAKE_TIMEOUT_SECS),
            capacity: consts::CHANNEL_CAPACITY,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Endpoint URL with the key attached as a query parameter.
    pub(crate) fn endpoint(&self) -> String {
        format!("{}?key={}", self.base_url, self.api_key.expose_secret())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
