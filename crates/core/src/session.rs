//! The voice session state machine.
//!
//! `Idle -> Connecting -> Active`, with `Reconnecting` between failed
//! attempts and `Error` reported before settling back in `Idle`. Every
//! transition goes through one lock and is tagged with the generation of the
//! attempt that requested it, so a disconnect invalidates whatever an
//! in-flight attempt would do next.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voicelink_types::{Inbound, MicProfile, Outbound, SessionEvent, SessionState, Source};

use crate::ambient::AmbientMixer;
use crate::analyser::SpectrumAnalyser;
use crate::audio::{AudioBackend, BusRole, BusState, CaptureDevice};
use crate::bus_pool::{BusLease, BusPool};
use crate::capture::{CapturePipeline, FrameTransmitter, VoiceGate};
use crate::config::{LinkOptions, SessionConfig};
use crate::credentials::CredentialProvider;
use crate::error::{Result, VoiceError};
use crate::playback::PlaybackScheduler;
use crate::resilience::{RetryDecision, spawn_watchdog};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::tools::{ToolBridge, ToolHandler};
use crate::transcript::TranscriptAggregator;
use crate::transport::{Channel, Connector};

const ANALYSER_FFT_SIZE: usize = 256;
const ANALYSER_SMOOTHING: f32 = 0.8;

/// Collaborators a session is built from.
pub struct SessionDeps {
    pub backend: Arc<dyn AudioBackend>,
    pub connector: Arc<dyn Connector>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub tools: Arc<dyn ToolHandler>,
}

struct Status {
    state: SessionState,
    generation: u64,
    /// Cancels the attempt of the current generation, if one is running.
    attempt: Option<CancellationToken>,
}

struct Shared {
    options: LinkOptions,
    capture_device: Arc<dyn CaptureDevice>,
    pool: Arc<BusPool>,
    ambient: AmbientMixer,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    tools: Arc<dyn ToolHandler>,
    status: Mutex<Status>,
    link: tokio::sync::Mutex<Option<ActiveLink>>,
    mic_profile: Mutex<MicProfile>,
    events: broadcast::Sender<SessionEvent>,
    stats: Arc<LinkStats>,
    analyser: Arc<Mutex<SpectrumAnalyser>>,
}

impl Shared {
    /// Applies a transition requested by `generation`; stale requests are
    /// ignored. Returns whether the transition happened.
    fn transition(
        &self,
        generation: u64,
        state: SessionState,
        detail: Option<String>,
        notify: bool,
    ) -> bool {
        let Ok(mut status) = self.status.lock() else {
            return false;
        };
        if status.generation != generation {
            tracing::debug!("ignoring {} from a stale attempt", state);
            return false;
        }
        if status.state != state {
            tracing::info!("session {} -> {}", status.state, state);
        }
        status.state = state;
        if notify {
            let _ = self
                .events
                .send(SessionEvent::StatusChanged { state, detail });
        }
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.status
            .lock()
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    /// Registers the attempt of `generation`. Returns false when that
    /// generation is already stale.
    fn arm_attempt(&self, generation: u64, token: CancellationToken) -> bool {
        let Ok(mut status) = self.status.lock() else {
            return false;
        };
        if status.generation != generation {
            return false;
        }
        status.attempt = Some(token);
        true
    }
}

/// Issued by the first half of a disconnect: the generation it owns and the
/// attempt it must cancel.
struct Teardown {
    generation: u64,
    attempt: Option<CancellationToken>,
}

/// Resources acquired by a successful attempt, not yet live.
struct PendingLink {
    config: SessionConfig,
    channel: Channel,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    buses: Vec<BusLease>,
}

struct ActiveLink {
    generation: u64,
    config: SessionConfig,
    outbound: mpsc::Sender<Outbound>,
    capture: CapturePipeline,
    playback: Arc<Mutex<PlaybackScheduler>>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl ActiveLink {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        self.pump.abort();
        self.watchdog.abort();
        let _ = (&mut self.pump).await;
        let _ = (&mut self.watchdog).await;

        self.capture.stop();
        let stopped = self
            .playback
            .lock()
            .map(|mut p| p.stop_all())
            .unwrap_or_default();
        if let Err(e) = self.outbound.try_send(Outbound::Close) {
            tracing::debug!("close not sent: {}", e);
        }
        tracing::info!(stopped, "voice link torn down");
    }
}

/// Handle to a voice session. Clones share the same session.
#[derive(Clone)]
pub struct VoiceSession {
    shared: Arc<Shared>,
}

impl VoiceSession {
    /// Probes the backend once; a backend without real-time processing is
    /// rejected here, before any connection is attempted.
    pub fn new(deps: SessionDeps, options: LinkOptions) -> Result<Self> {
        let capabilities = deps.backend.probe();
        tracing::debug!("audio backend capabilities: {:?}", capabilities);
        capabilities.ensure_supported()?;

        let pool = Arc::new(BusPool::new(deps.backend.bus_factory()));
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let mic_profile = options.mic_profile;

        Ok(Self {
            shared: Arc::new(Shared {
                capture_device: deps.backend.capture_device(),
                ambient: AmbientMixer::new(pool.clone()),
                pool,
                connector: deps.connector,
                credentials: deps.credentials,
                tools: deps.tools,
                status: Mutex::new(Status {
                    state: SessionState::Idle,
                    generation: 0,
                    attempt: None,
                }),
                link: tokio::sync::Mutex::new(None),
                mic_profile: Mutex::new(mic_profile),
                events,
                stats: Arc::new(LinkStats::default()),
                analyser: Arc::new(Mutex::new(SpectrumAnalyser::new(
                    ANALYSER_FFT_SIZE,
                    ANALYSER_SMOOTHING,
                ))),
                options,
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        self.shared
            .status
            .lock()
            .map(|s| s.state)
            .unwrap_or(SessionState::Error)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn analyser(&self) -> Arc<Mutex<SpectrumAnalyser>> {
        self.shared.analyser.clone()
    }

    pub fn ambient(&self) -> &AmbientMixer {
        &self.shared.ambient
    }

    pub fn bus_pool(&self) -> Arc<BusPool> {
        self.shared.pool.clone()
    }

    pub fn mic_profile(&self) -> MicProfile {
        self.shared
            .mic_profile
            .lock()
            .map(|p| *p)
            .unwrap_or_default()
    }

    /// Connects with `config`, retrying transient failures.
    ///
    /// Does nothing while a connection exists or is being established.
    /// Returns the error that ended the attempt when it gives up; a
    /// disconnect during the attempt is not an error.
    pub async fn connect(&self, config: SessionConfig) -> Result<()> {
        let (generation, token) = {
            let Ok(mut status) = self.shared.status.lock() else {
                return Err(VoiceError::Audio("session lock poisoned".to_string()));
            };
            if status.state.is_busy() {
                tracing::debug!("connect ignored while {}", status.state);
                return Ok(());
            }
            status.generation += 1;
            status.state = SessionState::Connecting;
            tracing::info!("session {} -> {}", SessionState::Idle, SessionState::Connecting);
            let _ = self
                .shared
                .events
                .send(SessionEvent::status(SessionState::Connecting));
            let token = CancellationToken::new();
            status.attempt = Some(token.clone());
            (status.generation, token)
        };

        self.run_attempts(config, generation, token).await
    }

    /// Tears everything down and returns to `Idle`. Safe in any state and
    /// idempotent. `silent` suppresses the `Idle` status event.
    pub async fn disconnect(&self, silent: bool) {
        if let Some(teardown) = self.begin_teardown() {
            self.finish_teardown(teardown, silent).await;
        }
    }

    /// Bumps the generation and takes the attempt token under the same lock.
    fn begin_teardown(&self) -> Option<Teardown> {
        let mut status = self.shared.status.lock().ok()?;
        status.generation += 1;
        Some(Teardown {
            generation: status.generation,
            attempt: status.attempt.take(),
        })
    }

    async fn finish_teardown(&self, teardown: Teardown, silent: bool) {
        if let Some(token) = teardown.attempt {
            token.cancel();
        }

        let link = {
            let mut slot = self.shared.link.lock().await;
            match slot.as_ref() {
                Some(link) if link.generation < teardown.generation => slot.take(),
                _ => None,
            }
        };
        if let Some(link) = link {
            link.shutdown().await;
        }

        self.shared
            .transition(teardown.generation, SessionState::Idle, None, !silent);
    }

    /// Silent teardown followed by a fresh connect, e.g. to change voice.
    pub async fn reconnect_with(&self, config: SessionConfig) -> Result<()> {
        self.disconnect(true).await;
        self.connect(config).await
    }

    /// Switches the microphone profile, re-acquiring the device if a link is live.
    pub async fn set_mic_profile(&self, profile: MicProfile) -> Result<()> {
        if let Ok(mut current) = self.shared.mic_profile.lock() {
            *current = profile;
        }
        let mut slot = self.shared.link.lock().await;
        if let Some(link) = slot.as_mut() {
            link.capture.set_profile(profile)?;
        }
        Ok(())
    }

    /// Injects text context into the live conversation.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let outbound = {
            let slot = self.shared.link.lock().await;
            slot.as_ref()
                .map(|link| link.outbound.clone())
                .ok_or(VoiceError::NotActive)?
        };
        outbound
            .send(Outbound::Context {
                text: text.to_string(),
            })
            .await
            .map_err(|_| VoiceError::RemoteClosed("outbound channel closed".to_string()))
    }

    /// Disconnects, stops the ambient layer and closes the pooled buses.
    pub async fn shutdown(&self) {
        self.disconnect(true).await;
        self.shared.ambient.set_mode(voicelink_types::AmbientMode::Off);
        self.shared.pool.shutdown();
    }

    async fn run_attempts(
        &self,
        config: SessionConfig,
        generation: u64,
        token: CancellationToken,
    ) -> Result<()> {
        let shared = &self.shared;
        let mut retries = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                outcome = self.establish(&config) => outcome,
            };
            let error = match outcome {
                Ok(pending) => {
                    self.install(pending, generation).await;
                    return Ok(());
                }
                Err(e) => e,
            };
            if !shared.is_current(generation) {
                return Ok(());
            }

            match shared.options.retry.decide(&error, retries) {
                RetryDecision::GiveUp => {
                    if error.is_fatal() {
                        tracing::error!("connection failed: {}", error);
                    } else {
                        tracing::error!("connection failed after {} retries: {}", retries, error);
                    }
                    shared.transition(generation, SessionState::Error, Some(error.to_string()), true);
                    shared.transition(generation, SessionState::Idle, None, false);
                    return Err(error);
                }
                RetryDecision::Retry { attempt, delay } => {
                    retries = attempt;
                    shared.stats.retry();
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "connection attempt failed: {}",
                        error
                    );
                    if !shared.transition(
                        generation,
                        SessionState::Reconnecting,
                        Some(error.to_string()),
                        true,
                    ) {
                        return Ok(());
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if !shared.transition(generation, SessionState::Connecting, None, true) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One connection attempt. Anything acquired is released on failure by drop.
    async fn establish(&self, config: &SessionConfig) -> Result<PendingLink> {
        let shared = &self.shared;
        let credential = shared.credentials.credential().await?;

        let input = shared.pool.acquire(BusRole::Input)?;
        let output = shared.pool.acquire(BusRole::Output)?;
        for bus in [&input, &output] {
            if bus.state() == BusState::Suspended {
                if let Err(e) = bus.resume() {
                    tracing::warn!("could not resume {:?} bus: {}", bus.role(), e);
                }
            }
        }

        let channel = shared.connector.open(config, &credential).await?;

        let playback = PlaybackScheduler::new(output.clone(), shared.stats.clone())?
            .with_analyser(shared.analyser.clone());
        let capture = CapturePipeline::start(
            shared.capture_device.clone(),
            self.mic_profile(),
            input.clone(),
            FrameTransmitter::new(channel.outbound.clone(), shared.stats.clone()),
            VoiceGate::new(shared.options.gate_threshold),
            shared.stats.clone(),
        )?;

        Ok(PendingLink {
            config: config.clone(),
            channel,
            capture,
            playback,
            buses: vec![input, output],
        })
    }

    /// Makes a successful attempt live, unless it was cancelled meanwhile.
    async fn install(&self, pending: PendingLink, generation: u64) {
        let shared = &self.shared;
        let mut slot = shared.link.lock().await;
        if !shared.transition(generation, SessionState::Active, None, true) {
            tracing::debug!("dropping link of a cancelled attempt");
            return;
        }

        let PendingLink {
            config,
            channel: Channel { outbound, inbound },
            capture,
            playback,
            buses,
        } = pending;

        if let Err(e) = outbound.try_send(Outbound::Context {
            text: config.readiness_message(),
        }) {
            tracing::warn!("initial context not sent: {}", e);
        }

        let cancel = CancellationToken::new();
        let watchdog = spawn_watchdog(buses, shared.options.watchdog_interval, cancel.clone());
        let playback = Arc::new(Mutex::new(playback));
        let pump = InboundPump {
            session: Arc::downgrade(shared),
            generation,
            inbound,
            outbound: outbound.clone(),
            playback: playback.clone(),
            bridge: ToolBridge::new(
                shared.tools.clone(),
                shared.options.max_tool_calls,
                shared.events.clone(),
                shared.stats.clone(),
            ),
            transcripts: TranscriptAggregator::default(),
            events: shared.events.clone(),
            stats: shared.stats.clone(),
            cancel: cancel.clone(),
        };
        let pump = tokio::spawn(pump.run());

        *slot = Some(ActiveLink {
            generation,
            config,
            outbound,
            capture,
            playback,
            cancel,
            pump,
            watchdog,
        });
        tracing::info!("voice link active");
    }

    async fn on_remote_close(&self, generation: u64, reason: Option<String>, abnormal: bool) {
        let shared = &self.shared;
        let link = {
            let mut slot = shared.link.lock().await;
            match slot.as_ref() {
                Some(link) if link.generation == generation => slot.take(),
                _ => None,
            }
        };
        let Some(link) = link else {
            return;
        };
        let config = link.config.clone();
        link.shutdown().await;

        let detail = reason
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "connection closed".to_string());

        if !abnormal {
            tracing::info!("remote closed the link: {}", detail);
            shared.transition(generation, SessionState::Idle, Some(detail), true);
            return;
        }

        if !shared.options.reconnect_on_drop {
            tracing::warn!("link dropped: {}", detail);
            shared.transition(generation, SessionState::Error, Some(detail), true);
            shared.transition(generation, SessionState::Idle, None, false);
            return;
        }

        let token = CancellationToken::new();
        if !shared.arm_attempt(generation, token.clone()) {
            return;
        }
        if !shared.transition(generation, SessionState::Reconnecting, Some(detail), true) {
            return;
        }
        let delay = shared.options.retry.delay_for(1);
        tracing::warn!(delay_ms = delay.as_millis() as u64, "link dropped, reconnecting");
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if !shared.transition(generation, SessionState::Connecting, None, true) {
            return;
        }
        if let Err(e) = self.run_attempts(config, generation, token).await {
            tracing::debug!("reconnect gave up: {}", e);
        }
    }
}

/// Boxed so the close handler, which may reconnect and spawn a new pump,
/// does not make the pump's future type recursive.
fn close_task(
    session: VoiceSession,
    generation: u64,
    reason: Option<String>,
    abnormal: bool,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        session.on_remote_close(generation, reason, abnormal).await;
    })
}

/// Routes inbound messages for one live link.
struct InboundPump {
    session: Weak<Shared>,
    generation: u64,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
    playback: Arc<Mutex<PlaybackScheduler>>,
    bridge: ToolBridge,
    transcripts: TranscriptAggregator,
    events: broadcast::Sender<SessionEvent>,
    stats: Arc<LinkStats>,
    cancel: CancellationToken,
}

impl InboundPump {
    async fn run(mut self) {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return,
                message = self.inbound.recv() => message,
            };
            match message {
                Some(Inbound::Audio { data }) => self.play(&data),
                Some(Inbound::Transcript(fragment)) => {
                    if let Some(event) = self.transcripts.accept(fragment) {
                        self.emit(SessionEvent::Transcript(event));
                    }
                }
                Some(Inbound::ToolCall(request)) => {
                    self.bridge.dispatch(request, self.outbound.clone());
                }
                Some(Inbound::Interrupted) => self.interrupt(),
                Some(Inbound::TurnComplete) => {
                    for event in self.transcripts.finish_turn() {
                        self.emit(SessionEvent::Transcript(event));
                    }
                    self.emit(SessionEvent::TurnComplete);
                }
                Some(Inbound::Closed { reason, abnormal }) => {
                    self.closed(reason, abnormal);
                    return;
                }
                None => {
                    self.closed(Some("channel dropped".to_string()), true);
                    return;
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn play(&self, data: &[u8]) {
        let Ok(mut playback) = self.playback.lock() else {
            return;
        };
        if let Err(e) = playback.enqueue(data) {
            tracing::warn!("dropping inbound audio: {}", e);
        }
    }

    fn interrupt(&mut self) {
        let stopped = self
            .playback
            .lock()
            .map(|mut p| p.interrupt())
            .unwrap_or_default();
        self.stats.interrupted();
        tracing::debug!(stopped, "playback interrupted");
        if let Some(event) = self.transcripts.flush(Source::Model) {
            self.emit(SessionEvent::Transcript(event));
        }
        self.emit(SessionEvent::Interrupted);
    }

    fn closed(&self, reason: Option<String>, abnormal: bool) {
        let Some(shared) = self.session.upgrade() else {
            return;
        };
        tokio::spawn(close_task(
            VoiceSession { shared },
            self.generation,
            reason,
            abnormal,
        ));
    }
}
