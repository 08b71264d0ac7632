//! Microphone capture: fixed-size framing, an RMS voice gate and PCM16
//! encoding, run on a dedicated thread.

use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use voicelink_native_utils::audio::{encode_pcm16, rms};
use voicelink_types::audio::{CAPTURE_MIME_TYPE, FRAME_SAMPLES};
use voicelink_types::{MicProfile, Outbound};

use crate::audio::{BusState, CaptureDevice, CaptureStream, SampleSink};
use crate::bus_pool::BusLease;
use crate::error::{Result, VoiceError};
use crate::stats::LinkStats;

const SAMPLE_QUEUE: usize = 64;

/// Regroups arbitrarily sized sample chunks into fixed-size frames.
pub struct FrameAssembler {
    frame_len: usize,
    block: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            block: Vec::with_capacity(frame_len),
        }
    }

    pub fn push(&mut self, mut samples: &[f32], mut on_frame: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.frame_len - self.block.len()).min(samples.len());
            self.block.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.block.len() == self.frame_len {
                on_frame(&self.block);
                self.block.clear();
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.block.len()
    }
}

/// Drops frames whose RMS energy is below the threshold.
#[derive(Debug, Clone, Copy)]
pub struct VoiceGate {
    threshold: f32,
}

impl VoiceGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// PCM16 bytes for a frame that passes the gate.
    pub fn process(&self, frame: &[f32]) -> Option<Vec<u8>> {
        if rms(frame) < self.threshold {
            return None;
        }
        Some(encode_pcm16(frame))
    }
}

/// Fire-and-forget sender for encoded frames.
#[derive(Clone)]
pub struct FrameTransmitter {
    tx: mpsc::Sender<Outbound>,
    stats: Arc<LinkStats>,
}

impl FrameTransmitter {
    pub fn new(tx: mpsc::Sender<Outbound>, stats: Arc<LinkStats>) -> Self {
        Self { tx, stats }
    }

    pub fn transmit(&self, data: Vec<u8>) {
        let message = Outbound::Audio {
            data,
            mime_type: CAPTURE_MIME_TYPE.to_string(),
        };
        match self.tx.try_send(message) {
            Ok(()) => self.stats.frame_sent(),
            Err(e) => {
                tracing::trace!("dropping capture frame: {}", e);
                self.stats.frame_dropped();
            }
        }
    }
}

/// An acquired microphone plus the thread that frames and gates its samples.
///
/// The worker exits once every [`SampleSink`] clone has been dropped, which
/// happens when the stream is stopped and the pipeline itself lets go of its
/// sink.
pub struct CapturePipeline {
    device: Arc<dyn CaptureDevice>,
    profile: MicProfile,
    stream: Option<Box<dyn CaptureStream>>,
    sink: Option<SampleSink>,
}

impl CapturePipeline {
    pub fn start(
        device: Arc<dyn CaptureDevice>,
        profile: MicProfile,
        input_bus: BusLease,
        transmitter: FrameTransmitter,
        gate: VoiceGate,
        stats: Arc<LinkStats>,
    ) -> Result<Self> {
        let (sink, samples) = mpsc::channel::<Vec<f32>>(SAMPLE_QUEUE);

        thread::Builder::new()
            .name("voicelink-capture".to_string())
            .spawn(move || frame_loop(samples, input_bus, gate, transmitter, stats))
            .map_err(|e| VoiceError::Audio(format!("failed to spawn capture thread: {e}")))?;

        let stream = device.open(profile, sink.clone())?;
        tracing::info!("microphone acquired with {:?} profile", profile);

        Ok(Self {
            device,
            profile,
            stream: Some(stream),
            sink: Some(sink),
        })
    }

    pub fn profile(&self) -> MicProfile {
        self.profile
    }

    /// Re-acquires the microphone under a new profile. The old stream is
    /// fully stopped before the new one is opened.
    pub fn set_profile(&mut self, profile: MicProfile) -> Result<()> {
        let sink = self.sink.clone().ok_or(VoiceError::NotActive)?;
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.stream = Some(self.device.open(profile, sink)?);
        self.profile = profile;
        tracing::info!("microphone re-acquired with {:?} profile", profile);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("microphone released");
        }
        self.sink = None;
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn frame_loop(
    mut samples: mpsc::Receiver<Vec<f32>>,
    input_bus: BusLease,
    gate: VoiceGate,
    transmitter: FrameTransmitter,
    stats: Arc<LinkStats>,
) {
    let mut assembler = FrameAssembler::new(FRAME_SAMPLES);
    while let Some(chunk) = samples.blocking_recv() {
        match input_bus.state() {
            BusState::Running => {}
            BusState::Suspended => continue,
            BusState::Closed => break,
        }
        assembler.push(&chunk, |frame| match gate.process(frame) {
            Some(pcm) => transmitter.transmit(pcm),
            None => stats.frame_gated(),
        });
    }
    tracing::debug!("capture thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BusRole;
    use crate::config::GATE_THRESHOLD;
    use crate::testing::{FakeMic, TestBuses};
    use std::time::Duration;

    #[test]
    fn assembler_emits_whole_frames_only() {
        let mut assembler = FrameAssembler::new(4);
        let mut frames = Vec::new();
        assembler.push(&[1.0, 2.0, 3.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn gate_drops_silence_and_passes_speech() {
        let gate = VoiceGate::new(GATE_THRESHOLD);
        assert!(gate.process(&[0.0; FRAME_SAMPLES]).is_none());

        let pcm = gate.process(&[0.5; FRAME_SAMPLES]).unwrap();
        assert_eq!(pcm.len(), 8192);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 16383);
    }

    #[test]
    fn gate_threshold_is_inclusive() {
        let gate = VoiceGate::new(0.25);
        assert!(gate.process(&[0.25; 16]).is_some());
        assert!(gate.process(&[0.2; 16]).is_none());
    }

    #[tokio::test]
    async fn transmits_voiced_frames_and_gates_silence() {
        let mic = Arc::new(FakeMic::default());
        let buses = TestBuses::default();
        let input = buses.pool().acquire(BusRole::Input).unwrap();
        let stats = Arc::new(LinkStats::default());
        let (tx, mut rx) = mpsc::channel(16);

        let mut pipeline = CapturePipeline::start(
            mic.clone(),
            MicProfile::Standard,
            input,
            FrameTransmitter::new(tx, stats.clone()),
            VoiceGate::new(GATE_THRESHOLD),
            stats.clone(),
        )
        .unwrap();

        mic.push(vec![0.0; FRAME_SAMPLES]).await;
        mic.push(vec![0.5; FRAME_SAMPLES / 2]).await;
        mic.push(vec![0.5; FRAME_SAMPLES / 2]).await;

        let sent = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match sent {
            Outbound::Audio { data, mime_type } => {
                assert_eq!(data.len(), FRAME_SAMPLES * 2);
                assert_eq!(mime_type, "audio/pcm;rate=16000");
            }
            other => panic!("unexpected message {other:?}"),
        }

        pipeline.stop();
        assert_eq!(mic.live_streams(), 0);
        assert_eq!(stats.snapshot().frames_gated, 1);
    }

    #[test]
    fn profile_change_stops_old_stream_first() {
        let mic = Arc::new(FakeMic::default());
        let buses = TestBuses::default();
        let input = buses.pool().acquire(BusRole::Input).unwrap();
        let stats = Arc::new(LinkStats::default());
        let (tx, _rx) = mpsc::channel(16);

        let mut pipeline = CapturePipeline::start(
            mic.clone(),
            MicProfile::Standard,
            input,
            FrameTransmitter::new(tx, stats.clone()),
            VoiceGate::new(GATE_THRESHOLD),
            stats,
        )
        .unwrap();

        pipeline.set_profile(MicProfile::HighFidelity).unwrap();
        assert_eq!(mic.live_streams(), 1);
        assert_eq!(mic.max_concurrent(), 1);
        assert_eq!(mic.profiles(), vec![MicProfile::Standard, MicProfile::HighFidelity]);
        assert_eq!(pipeline.profile(), MicProfile::HighFidelity);

        drop(pipeline);
        assert_eq!(mic.live_streams(), 0);
    }

    #[test]
    fn denied_microphone_surfaces_permission_error() {
        let mic = Arc::new(FakeMic::denied());
        let buses = TestBuses::default();
        let input = buses.pool().acquire(BusRole::Input).unwrap();
        let stats = Arc::new(LinkStats::default());
        let (tx, _rx) = mpsc::channel(16);

        let result = CapturePipeline::start(
            mic,
            MicProfile::Standard,
            input,
            FrameTransmitter::new(tx, stats.clone()),
            VoiceGate::new(GATE_THRESHOLD),
            stats,
        );
        assert_eq!(result.err(), Some(VoiceError::PermissionDenied));
    }
}
