use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, VoiceError};

/// Supplies the credential for each connection attempt.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<SecretString>;
}

/// Reads the credential from an environment variable on every attempt.
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credential(&self) -> Result<SecretString> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
            _ => Err(VoiceError::Credential(format!("{} is not set", self.var))),
        }
    }
}

/// A credential fixed at construction, e.g. already loaded from config.
pub struct StaticCredentials {
    secret: SecretString,
}

impl StaticCredentials {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<SecretString> {
        if self.secret.expose_secret().trim().is_empty() {
            return Err(VoiceError::Credential("credential is empty".to_string()));
        }
        Ok(SecretString::from(self.secret.expose_secret().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_variable_is_a_fatal_credential_error() {
        let provider = EnvCredentials::new("VOICELINK_TEST_UNSET_CREDENTIAL");
        let err = provider.credential().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("VOICELINK_TEST_UNSET_CREDENTIAL"));
    }

    #[tokio::test]
    async fn static_credential_is_returned() {
        let provider = StaticCredentials::new(SecretString::from("abc".to_string()));
        assert_eq!(provider.credential().await.unwrap().expose_secret(), "abc");

        let empty = StaticCredentials::new(SecretString::from(String::new()));
        assert!(matches!(empty.credential().await, Err(VoiceError::Credential(_))));
    }
}
