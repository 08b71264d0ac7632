//! Real-time duplex voice link.
//!
//! [`session::VoiceSession`] owns the connection lifecycle and wires the
//! capture pipeline, playback scheduler, tool bridge and watchdog together.
//! Everything observable leaves the session as a [`SessionEvent`] on a
//! broadcast channel.

pub mod ambient;
pub mod analyser;
pub mod audio;
pub mod bus_pool;
pub mod capture;
pub mod config;
pub mod credentials;
pub mod error;
pub mod mixer;
pub mod playback;
pub mod resilience;
pub mod session;
pub mod stats;
pub mod tools;
pub mod transcript;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{Result, VoiceError};
pub use session::{SessionDeps, VoiceSession};
pub use voicelink_types as types;
pub use voicelink_types::{SessionEvent, SessionState};
