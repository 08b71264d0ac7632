//! Procedural background soundscapes mixed quietly under the conversation.

use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use voicelink_types::AmbientMode;

use crate::audio::{BusRole, Generator, SourceId};
use crate::bus_pool::{BusLease, BusPool};
use crate::config::AMBIENT_GAIN;

/// One-pole low-pass filter.
#[derive(Debug, Clone, Copy, Default)]
struct OnePole {
    y: f32,
}

impl OnePole {
    fn process(&mut self, x: f32, cutoff: f32, sample_rate: u32) -> f32 {
        let a = 1.0 - (-TAU * cutoff / sample_rate as f32).exp();
        self.y += a * (x - self.y);
        self.y
    }
}

/// Two detuned sawtooth oscillators through a low-pass whose cutoff drifts
/// with a slow LFO.
pub struct DroneGenerator {
    phases: [f32; 2],
    freqs: [f32; 2],
    lfo_phase: f32,
    lfo_rate: f32,
    filter: OnePole,
}

impl DroneGenerator {
    pub fn new() -> Self {
        Self {
            phases: [0.0, 0.5],
            freqs: [55.0, 55.4],
            lfo_phase: 0.0,
            lfo_rate: 0.1,
            filter: OnePole::default(),
        }
    }
}

impl Default for DroneGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for DroneGenerator {
    fn fill(&mut self, out: &mut [f32], sample_rate: u32) {
        let sr = sample_rate as f32;
        for sample in out.iter_mut() {
            let mut saw = 0.0;
            for (phase, freq) in self.phases.iter_mut().zip(self.freqs) {
                saw += 2.0 * *phase - 1.0;
                *phase = (*phase + freq / sr).fract();
            }
            let cutoff = 400.0 + 200.0 * (TAU * self.lfo_phase).sin();
            self.lfo_phase = (self.lfo_phase + self.lfo_rate / sr).fract();
            *sample = self.filter.process(saw * 0.5, cutoff, sample_rate);
        }
    }
}

/// Band-limited white noise.
pub struct RainGenerator {
    rng: SmallRng,
    low: OnePole,
    high: OnePole,
}

impl RainGenerator {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            rng,
            low: OnePole::default(),
            high: OnePole::default(),
        }
    }
}

impl Default for RainGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RainGenerator {
    fn fill(&mut self, out: &mut [f32], sample_rate: u32) {
        for sample in out.iter_mut() {
            let noise: f32 = self.rng.gen_range(-1.0..1.0);
            let below_high = self.high.process(noise, 4000.0, sample_rate);
            let below_low = self.low.process(noise, 300.0, sample_rate);
            *sample = ((below_high - below_low) * 0.5).clamp(-1.0, 1.0);
        }
    }
}

struct Playing {
    bus: BusLease,
    id: SourceId,
}

/// Plays at most one ambient generator on the output bus.
///
/// Independent of the voice session: connecting or disconnecting never
/// touches the ambient layer.
pub struct AmbientMixer {
    pool: Arc<BusPool>,
    mode: Mutex<AmbientMode>,
    playing: Mutex<Option<Playing>>,
}

impl AmbientMixer {
    pub fn new(pool: Arc<BusPool>) -> Self {
        Self {
            pool,
            mode: Mutex::new(AmbientMode::Off),
            playing: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> AmbientMode {
        self.mode.lock().map(|m| *m).unwrap_or_default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
            .lock()
            .map(|p| p.as_ref().is_some_and(|p| p.bus.is_active(p.id)))
            .unwrap_or(false)
    }

    /// Switches the soundscape. Failures to start are logged, never returned.
    pub fn set_mode(&self, mode: AmbientMode) {
        let Ok(mut playing) = self.playing.lock() else {
            return;
        };
        if let Some(current) = playing.take() {
            current.bus.stop(current.id);
        }
        if let Ok(mut m) = self.mode.lock() {
            *m = mode;
        }

        let generator: Box<dyn Generator> = match mode {
            AmbientMode::Off => return,
            AmbientMode::Drone => Box::new(DroneGenerator::new()),
            AmbientMode::Rain => Box::new(RainGenerator::new()),
        };

        let started = self.pool.acquire(BusRole::Output).and_then(|bus| {
            let id = bus.start_generator(generator, AMBIENT_GAIN)?;
            Ok(Playing { bus, id })
        });
        match started {
            Ok(p) => {
                tracing::info!("ambient {:?} started", mode);
                *playing = Some(p);
            }
            Err(e) => tracing::warn!("ambient {:?} failed to start: {}", mode, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBus;
    use crate::testing::TestBuses;

    fn render(generator: &mut dyn Generator, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        generator.fill(&mut out, 24_000);
        out
    }

    #[test]
    fn drone_is_bounded_and_audible() {
        let out = render(&mut DroneGenerator::new(), 24_000);
        assert!(out.iter().all(|s| s.abs() <= 1.0));
        assert!(voicelink_native_utils::audio::rms(&out) > 0.01);
    }

    #[test]
    fn rain_is_bounded_and_audible() {
        let out = render(&mut RainGenerator::with_seed(7), 24_000);
        assert!(out.iter().all(|s| s.abs() <= 1.0));
        assert!(voicelink_native_utils::audio::rms(&out) > 0.01);
    }

    #[test]
    fn switching_keeps_a_single_generator() {
        let buses = TestBuses::default();
        let mixer = AmbientMixer::new(buses.pool());

        mixer.set_mode(AmbientMode::Drone);
        mixer.set_mode(AmbientMode::Rain);
        assert_eq!(mixer.mode(), AmbientMode::Rain);
        assert!(mixer.is_playing());
        assert_eq!(buses.output().active_sources(), 1);

        mixer.set_mode(AmbientMode::Off);
        assert!(!mixer.is_playing());
        assert_eq!(buses.output().active_sources(), 0);
    }

    #[test]
    fn mixed_at_low_gain() {
        let buses = TestBuses::default();
        let mixer = AmbientMixer::new(buses.pool());
        mixer.set_mode(AmbientMode::Rain);

        let mut out = vec![0.0; 4800];
        buses.output().render(&mut out);
        assert!(out.iter().all(|s| s.abs() <= AMBIENT_GAIN));
        assert!(out.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn start_failure_is_swallowed() {
        let buses = TestBuses::failing();
        let mixer = AmbientMixer::new(buses.pool());
        mixer.set_mode(AmbientMode::Drone);
        assert!(!mixer.is_playing());
        assert_eq!(mixer.mode(), AmbientMode::Drone);
    }
}
