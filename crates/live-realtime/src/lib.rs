mod client;
pub mod types;

pub use client::config::{Config, ConfigBuilder};
pub use client::{AuthRejected, ClientTx, HandshakeTimeout, LiveClient, ServerEvent, ServerRx, connect};
