//! cpal implementation of the audio seams.
//!
//! cpal streams are not `Send`, so each one lives on its own thread for as
//! long as it plays. The microphone thread moves samples from a lock-free
//! ring filled by the device callback, resamples them to 16 kHz and feeds
//! the capture pipeline. The speaker thread's callback renders a
//! [`SoftwareBus`], which makes the device clock the playback clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use voicelink_core::audio::{
    AudioBackend, AudioBus, BusFactory, BusRole, BusState, Capabilities, CaptureDevice,
    CaptureStream, Generator, SampleSink, SourceId,
};
use voicelink_core::mixer::SoftwareBus;
use voicelink_core::{Result, VoiceError};
use voicelink_native_utils::audio::{StreamResampler, mix_to_mono, shared_buffer};
use voicelink_native_utils::device::{get_or_default_input, get_or_default_output};
use voicelink_types::MicProfile;
use voicelink_types::audio::CAPTURE_SAMPLE_RATE;

use crate::config::{INPUT_CHUNK_SIZE, INPUT_LATENCY_MS, OUTPUT_CHUNK_SIZE};

const IDLE_POLL: Duration = Duration::from_millis(5);

pub struct CpalBackend {
    capture: Arc<CpalCapture>,
    buses: Arc<CpalBusFactory>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            capture: Arc::new(CpalCapture {
                device_name: input_device,
            }),
            buses: Arc::new(CpalBusFactory {
                device_name: output_device,
            }),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn probe(&self) -> Capabilities {
        Capabilities {
            realtime_processing: !cpal::available_hosts().is_empty(),
            capture: get_or_default_input(self.capture.device_name.as_deref()).is_ok(),
            playback: get_or_default_output(self.buses.device_name.as_deref()).is_ok(),
        }
    }

    fn capture_device(&self) -> Arc<dyn CaptureDevice> {
        self.capture.clone()
    }

    fn bus_factory(&self) -> Arc<dyn BusFactory> {
        self.buses.clone()
    }
}

fn audio_error(e: impl std::fmt::Display) -> VoiceError {
    VoiceError::Audio(e.to_string())
}

fn map_build_error(e: cpal::BuildStreamError) -> VoiceError {
    match e {
        // Hosts that gate microphone access report the device as unavailable.
        cpal::BuildStreamError::DeviceNotAvailable => VoiceError::PermissionDenied,
        other => audio_error(other),
    }
}

// --- Microphone ---

pub struct CpalCapture {
    device_name: Option<String>,
}

struct CpalCaptureStream {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("microphone thread panicked");
            }
        }
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CaptureDevice for CpalCapture {
    fn open(&self, profile: MicProfile, sink: SampleSink) -> Result<Box<dyn CaptureStream>> {
        let (ready_tx, ready_rx) = sync_channel::<Result<()>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let device_name = self.device_name.clone();

        let thread = thread::Builder::new()
            .name("voicelink-mic".to_string())
            .spawn(move || {
                if let Err(e) = run_microphone(device_name.as_deref(), profile, sink, &flag, &ready_tx)
                {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(audio_error)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCaptureStream {
                running,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::Audio("microphone thread exited".to_string())),
        }
    }
}

fn run_microphone(
    device_name: Option<&str>,
    profile: MicProfile,
    sink: SampleSink,
    running: &AtomicBool,
    ready: &SyncSender<Result<()>>,
) -> Result<()> {
    let device = get_or_default_input(device_name).map_err(|e| audio_error(format!("{e:#}")))?;
    tracing::info!("Using input device: {:?}", device.name().unwrap_or_default());

    let supported = device.default_input_config().map_err(audio_error)?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;
    tracing::info!("Input stream config: {:?}", &config);

    let ring = shared_buffer(rate as usize * INPUT_LATENCY_MS / 1000);
    let (mut producer, mut consumer) = ring.split();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = mix_to_mono(data, channels);
                let pushed = producer.push_slice(&mono);
                if pushed < mono.len() {
                    tracing::trace!("microphone ring full, dropped {} samples", mono.len() - pushed);
                }
            },
            move |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .map_err(map_build_error)?;
    stream.play().map_err(audio_error)?;

    // cpal exposes no DSP constraints; the profile is recorded for diagnostics.
    tracing::debug!(
        noise_suppression = profile.noise_suppression(),
        echo_cancellation = profile.echo_cancellation(),
        auto_gain = profile.auto_gain(),
        "microphone profile {:?}",
        profile
    );

    let mut resampler = if rate == CAPTURE_SAMPLE_RATE {
        None
    } else {
        Some(StreamResampler::new(rate, CAPTURE_SAMPLE_RATE, INPUT_CHUNK_SIZE).map_err(audio_error)?)
    };

    let _ = ready.send(Ok(()));

    let mut block = vec![0.0_f32; INPUT_CHUNK_SIZE];
    while running.load(Ordering::Acquire) {
        let n = consumer.pop_slice(&mut block);
        if n == 0 {
            thread::sleep(IDLE_POLL);
            continue;
        }
        let samples = match &mut resampler {
            Some(resampler) => resampler.push(&block[..n]),
            None => block[..n].to_vec(),
        };
        if samples.is_empty() {
            continue;
        }
        if sink.blocking_send(samples).is_err() {
            tracing::debug!("capture pipeline gone, closing microphone");
            break;
        }
    }

    drop(stream);
    Ok(())
}

// --- Speakers ---

pub struct CpalBusFactory {
    device_name: Option<String>,
}

impl BusFactory for CpalBusFactory {
    fn create(&self, role: BusRole) -> Result<Arc<dyn AudioBus>> {
        match role {
            // The input context only gates frame processing; it has no device.
            BusRole::Input => Ok(Arc::new(SoftwareBus::new(CAPTURE_SAMPLE_RATE))),
            BusRole::Output => Ok(Arc::new(SpeakerBus::open(self.device_name.clone())?)),
        }
    }
}

/// A [`SoftwareBus`] rendered by an output device.
pub struct SpeakerBus {
    mixer: Arc<SoftwareBus>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SpeakerBus {
    pub fn open(device_name: Option<String>) -> Result<Self> {
        let (ready_tx, ready_rx) = sync_channel::<Result<Arc<SoftwareBus>>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = thread::Builder::new()
            .name("voicelink-speaker".to_string())
            .spawn(move || {
                if let Err(e) = run_speaker(device_name.as_deref(), &flag, &ready_tx) {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(audio_error)?;

        match ready_rx.recv() {
            Ok(Ok(mixer)) => Ok(Self {
                mixer,
                running,
                thread: Mutex::new(Some(thread)),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::Audio("speaker thread exited".to_string())),
        }
    }

    fn stop_device(&self) {
        self.running.store(false, Ordering::Release);
        let thread = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(thread) = thread {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::error!("speaker thread panicked");
            }
        }
    }
}

impl Drop for SpeakerBus {
    fn drop(&mut self) {
        self.stop_device();
    }
}

fn run_speaker(
    device_name: Option<&str>,
    running: &AtomicBool,
    ready: &SyncSender<Result<Arc<SoftwareBus>>>,
) -> Result<()> {
    let device = get_or_default_output(device_name).map_err(|e| audio_error(format!("{e:#}")))?;
    tracing::info!("Using output device: {:?}", device.name().unwrap_or_default());

    let supported = device.default_output_config().map_err(audio_error)?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let channels = (config.channels as usize).max(1);
    tracing::info!("Output stream config: {:?}", &config);

    let mixer = Arc::new(SoftwareBus::new(config.sample_rate.0));
    let render_mixer = mixer.clone();
    let error_mixer = mixer.clone();
    let mut mono = Vec::with_capacity(OUTPUT_CHUNK_SIZE);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                render_mixer.render(&mut mono);
                for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(*sample);
                }
            },
            move |err| {
                tracing::error!("An error occurred on output stream: {}", err);
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    error_mixer.suspend();
                }
            },
            None,
        )
        .map_err(audio_error)?;
    stream.play().map_err(audio_error)?;

    let _ = ready.send(Ok(mixer));

    while running.load(Ordering::Acquire) {
        thread::park_timeout(Duration::from_millis(200));
    }
    drop(stream);
    tracing::debug!("speaker stream closed");
    Ok(())
}

impl AudioBus for SpeakerBus {
    fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    fn now(&self) -> f64 {
        self.mixer.now()
    }

    fn state(&self) -> BusState {
        self.mixer.state()
    }

    fn resume(&self) -> Result<()> {
        self.mixer.resume()
    }

    fn close(&self) {
        self.mixer.close();
        self.stop_device();
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<SourceId> {
        self.mixer.schedule(samples, start_at)
    }

    fn start_generator(&self, generator: Box<dyn Generator>, gain: f32) -> Result<SourceId> {
        self.mixer.start_generator(generator, gain)
    }

    fn stop(&self, id: SourceId) {
        self.mixer.stop(id);
    }

    fn is_active(&self, id: SourceId) -> bool {
        self.mixer.is_active(id)
    }

    fn active_sources(&self) -> usize {
        self.mixer.active_sources()
    }
}

/// Prints every input and output device, as shown by `--list-devices`.
pub fn describe_devices() -> anyhow::Result<String> {
    let inputs = voicelink_native_utils::device::get_available_inputs()?;
    let outputs = voicelink_native_utils::device::get_available_outputs()?;
    let host = cpal::default_host();
    Ok(format!(
        "Host: {:?}\nInputs:\n{}\nOutputs:\n{}",
        host.id(),
        inputs,
        outputs
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_device_is_a_permission_failure() {
        assert_eq!(
            map_build_error(cpal::BuildStreamError::DeviceNotAvailable),
            VoiceError::PermissionDenied
        );
        assert!(matches!(
            map_build_error(cpal::BuildStreamError::StreamConfigNotSupported),
            VoiceError::Audio(_)
        ));
    }

    #[test]
    fn input_context_needs_no_device() {
        let factory = CpalBusFactory { device_name: None };
        let bus = factory.create(BusRole::Input).unwrap();
        assert_eq!(bus.sample_rate(), CAPTURE_SAMPLE_RATE);
        assert_eq!(bus.state(), BusState::Running);
    }
}
