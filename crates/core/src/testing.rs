//! In-memory stand-ins for the platform and the remote agent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::time::Instant;
use voicelink_types::{Inbound, MicProfile, Outbound};

use crate::audio::{
    AudioBackend, AudioBus, BusFactory, BusRole, Capabilities, CaptureDevice, CaptureStream,
    SampleSink,
};
use crate::bus_pool::BusPool;
use crate::config::SessionConfig;
use crate::error::{Result, VoiceError};
use crate::mixer::SoftwareBus;
use crate::transport::{Channel, Connector};

#[derive(Default)]
struct MicState {
    next_id: u64,
    open: Vec<(u64, SampleSink)>,
    max_concurrent: usize,
    profiles: Vec<MicProfile>,
}

#[derive(Default)]
pub(crate) struct FakeMic {
    state: Arc<Mutex<MicState>>,
    denied: bool,
}

impl FakeMic {
    pub(crate) fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    pub(crate) async fn push(&self, samples: Vec<f32>) {
        let sink = self.state.lock().unwrap().open.last().map(|(_, s)| s.clone());
        if let Some(sink) = sink {
            let _ = sink.send(samples).await;
        }
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.state.lock().unwrap().max_concurrent
    }

    pub(crate) fn profiles(&self) -> Vec<MicProfile> {
        self.state.lock().unwrap().profiles.clone()
    }
}

struct FakeStream {
    id: u64,
    state: Arc<Mutex<MicState>>,
}

impl CaptureStream for FakeStream {
    fn stop(&mut self) {
        self.state.lock().unwrap().open.retain(|(id, _)| *id != self.id);
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CaptureDevice for FakeMic {
    fn open(&self, profile: MicProfile, sink: SampleSink) -> Result<Box<dyn CaptureStream>> {
        if self.denied {
            return Err(VoiceError::PermissionDenied);
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.open.push((id, sink));
        state.max_concurrent = state.max_concurrent.max(state.open.len());
        state.profiles.push(profile);
        Ok(Box::new(FakeStream {
            id,
            state: self.state.clone(),
        }))
    }
}

struct FixedFactory {
    input: Arc<SoftwareBus>,
    output: Arc<SoftwareBus>,
    failing: bool,
}

impl BusFactory for FixedFactory {
    fn create(&self, role: BusRole) -> Result<Arc<dyn AudioBus>> {
        if self.failing {
            return Err(VoiceError::Audio("no audio device".to_string()));
        }
        Ok(match role {
            BusRole::Input => self.input.clone(),
            BusRole::Output => self.output.clone(),
        })
    }
}

/// Software buses the test can drive, behind a real [`BusPool`].
pub(crate) struct TestBuses {
    input: Arc<SoftwareBus>,
    output: Arc<SoftwareBus>,
    factory: Arc<FixedFactory>,
    pool: Arc<BusPool>,
}

impl Default for TestBuses {
    fn default() -> Self {
        Self::build(24_000, false)
    }
}

impl TestBuses {
    pub(crate) fn with_output_rate(rate: u32) -> Self {
        Self::build(rate, false)
    }

    pub(crate) fn failing() -> Self {
        Self::build(24_000, true)
    }

    fn build(output_rate: u32, failing: bool) -> Self {
        let input = Arc::new(SoftwareBus::new(16_000));
        let output = Arc::new(SoftwareBus::new(output_rate));
        let factory = Arc::new(FixedFactory {
            input: input.clone(),
            output: output.clone(),
            failing,
        });
        let pool = Arc::new(BusPool::new(factory.clone()));
        Self {
            input,
            output,
            factory,
            pool,
        }
    }

    pub(crate) fn pool(&self) -> Arc<BusPool> {
        self.pool.clone()
    }

    pub(crate) fn input(&self) -> &SoftwareBus {
        &self.input
    }

    pub(crate) fn output(&self) -> &SoftwareBus {
        &self.output
    }

    /// Renders `secs` of output, moving the playback clock forward.
    pub(crate) fn advance_output(&self, secs: f64) {
        let frames = (secs * self.output.sample_rate() as f64).round() as usize;
        let mut block = vec![0.0; frames];
        self.output.render(&mut block);
    }
}

pub(crate) struct FakeBackend {
    pub(crate) mic: Arc<FakeMic>,
    pub(crate) buses: TestBuses,
    pub(crate) capabilities: Capabilities,
}

impl FakeBackend {
    pub(crate) fn new(mic: FakeMic) -> Self {
        Self {
            mic: Arc::new(mic),
            buses: TestBuses::default(),
            capabilities: Capabilities::full(),
        }
    }
}

impl AudioBackend for FakeBackend {
    fn probe(&self) -> Capabilities {
        self.capabilities
    }

    fn capture_device(&self) -> Arc<dyn CaptureDevice> {
        self.mic.clone()
    }

    fn bus_factory(&self) -> Arc<dyn BusFactory> {
        self.buses.factory.clone()
    }
}

/// The remote end of a [`Channel`] handed out by [`ScriptedConnector`].
pub(crate) struct RemotePeer {
    pub(crate) from_link: mpsc::Receiver<Outbound>,
    pub(crate) to_link: mpsc::Sender<Inbound>,
}

impl RemotePeer {
    pub(crate) async fn next_outbound(&mut self) -> Option<Outbound> {
        tokio::time::timeout(std::time::Duration::from_secs(30), self.from_link.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Result<()>>,
    attempts: Vec<Instant>,
    peers: VecDeque<RemotePeer>,
}

/// Answers each `open` with the next scripted outcome; succeeds once the
/// script runs out.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    script: Mutex<Script>,
}

impl ScriptedConnector {
    pub(crate) fn with_outcomes(outcomes: Vec<Result<()>>) -> Self {
        Self {
            script: Mutex::new(Script {
                outcomes: outcomes.into(),
                ..Script::default()
            }),
        }
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.script.lock().unwrap().attempts.clone()
    }

    pub(crate) fn take_peer(&self) -> RemotePeer {
        self.script
            .lock()
            .unwrap()
            .peers
            .pop_front()
            .expect("no channel was opened")
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, _config: &SessionConfig, _credential: &SecretString) -> Result<Channel> {
        let mut script = self.script.lock().unwrap();
        script.attempts.push(Instant::now());
        script.outcomes.pop_front().unwrap_or(Ok(()))?;

        let (outbound, from_link) = mpsc::channel(64);
        let (to_link, inbound) = mpsc::channel(64);
        script.peers.push_back(RemotePeer { from_link, to_link });
        Ok(Channel { outbound, inbound })
    }
}

/// A handshake that never completes.
#[derive(Default)]
pub(crate) struct StalledConnector {
    opens: AtomicUsize,
}

impl StalledConnector {
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StalledConnector {
    async fn open(&self, _config: &SessionConfig, _credential: &SecretString) -> Result<Channel> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}
