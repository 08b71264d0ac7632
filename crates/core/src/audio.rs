//! Seams between the link and the platform's audio stack.
//!
//! A backend supplies a microphone ([`CaptureDevice`]) and clocked output
//! contexts ([`AudioBus`]). The core never talks to hardware directly.

use std::sync::Arc;

use tokio::sync::mpsc;
use voicelink_types::MicProfile;

use crate::error::{Result, VoiceError};

pub type SourceId = u64;

/// Mono f32 samples at the capture rate, pushed by a live microphone stream.
pub type SampleSink = mpsc::Sender<Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Running,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusRole {
    Input,
    Output,
}

/// A procedural signal rendered continuously until stopped.
pub trait Generator: Send {
    fn fill(&mut self, out: &mut [f32], sample_rate: u32);
}

/// An audio context with its own monotonic clock, in seconds.
pub trait AudioBus: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn now(&self) -> f64;

    fn state(&self) -> BusState;

    fn resume(&self) -> Result<()>;

    fn close(&self);

    /// Plays `samples` (at the bus rate) starting at clock time `start_at`.
    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<SourceId>;

    fn start_generator(&self, generator: Box<dyn Generator>, gain: f32) -> Result<SourceId>;

    fn stop(&self, id: SourceId);

    /// True until the source has finished playing or was stopped.
    fn is_active(&self, id: SourceId) -> bool;

    fn active_sources(&self) -> usize;
}

pub trait BusFactory: Send + Sync {
    fn create(&self, role: BusRole) -> Result<Arc<dyn AudioBus>>;
}

/// A live microphone stream. Dropping or stopping it releases the device.
pub trait CaptureStream: Send {
    fn stop(&mut self);
}

pub trait CaptureDevice: Send + Sync {
    /// Acquires the microphone under `profile`. Samples are mono at the
    /// capture rate. Fails with [`VoiceError::PermissionDenied`] when the
    /// platform refuses access.
    fn open(&self, profile: MicProfile, sink: SampleSink) -> Result<Box<dyn CaptureStream>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub realtime_processing: bool,
    pub capture: bool,
    pub playback: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            realtime_processing: true,
            capture: true,
            playback: true,
        }
    }

    pub fn ensure_supported(&self) -> Result<()> {
        if !self.realtime_processing {
            return Err(VoiceError::Unsupported(
                "no real-time frame processing available".to_string(),
            ));
        }
        if !self.capture {
            return Err(VoiceError::Unsupported("no capture device".to_string()));
        }
        if !self.playback {
            return Err(VoiceError::Unsupported("no playback device".to_string()));
        }
        Ok(())
    }
}

pub trait AudioBackend: Send + Sync {
    /// Called once when a session is created.
    fn probe(&self) -> Capabilities;

    fn capture_device(&self) -> Arc<dyn CaptureDevice>;

    fn bus_factory(&self) -> Arc<dyn BusFactory>;
}
