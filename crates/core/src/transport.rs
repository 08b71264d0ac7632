//! The remote agent as seen by the link: a pair of message channels.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::SecretString;
use tokio::sync::mpsc;
use voicelink_types::{Inbound, Outbound};

use crate::config::SessionConfig;
use crate::error::Result;

/// An open bidirectional channel. Dropping `outbound` closes the connection;
/// the peer reports its own end with [`Inbound::Closed`].
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<Inbound>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a channel and completes the handshake for `config`.
    async fn open(&self, config: &SessionConfig, credential: &SecretString) -> Result<Channel>;
}
