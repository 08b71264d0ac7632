//! Gap-free scheduling of inbound speech on the output bus clock.

use std::sync::{Arc, Mutex};

use voicelink_native_utils::audio::{StreamResampler, decode_pcm16};
use voicelink_types::audio::PLAYBACK_SAMPLE_RATE;

use crate::analyser::SpectrumAnalyser;
use crate::audio::SourceId;
use crate::bus_pool::BusLease;
use crate::config::PLAYBACK_LEAD_SECS;
use crate::error::{Result, VoiceError};
use crate::stats::LinkStats;

const RESAMPLER_CHUNK: usize = 480;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: SourceId,
    /// Bus clock time the buffer starts at, in seconds.
    pub start: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    bus: BusLease,
    resampler: Option<StreamResampler>,
    analyser: Option<Arc<Mutex<SpectrumAnalyser>>>,
    /// Frame on the bus clock where the next buffer starts.
    next_start: Option<u64>,
    live: Vec<ScheduledBuffer>,
    stats: Arc<LinkStats>,
}

impl PlaybackScheduler {
    pub fn new(bus: BusLease, stats: Arc<LinkStats>) -> Result<Self> {
        let rate = bus.sample_rate();
        let resampler = if rate == PLAYBACK_SAMPLE_RATE {
            None
        } else {
            tracing::debug!("resampling playback from {} to {} Hz", PLAYBACK_SAMPLE_RATE, rate);
            Some(
                StreamResampler::new(PLAYBACK_SAMPLE_RATE, rate, RESAMPLER_CHUNK)
                    .map_err(|e| VoiceError::Audio(e.to_string()))?,
            )
        };
        Ok(Self {
            bus,
            resampler,
            analyser: None,
            next_start: None,
            live: Vec::new(),
            stats,
        })
    }

    pub fn with_analyser(mut self, analyser: Arc<Mutex<SpectrumAnalyser>>) -> Self {
        self.analyser = Some(analyser);
        self
    }

    /// Decodes a PCM16 packet and schedules it right after the previous one.
    ///
    /// Returns `None` when the packet produced no samples yet (empty, or
    /// still buffered inside the resampler).
    pub fn enqueue(&mut self, pcm: &[u8]) -> Result<Option<ScheduledBuffer>> {
        self.reap();

        let mut samples = decode_pcm16(pcm);
        if let Some(analyser) = &self.analyser {
            if let Ok(mut analyser) = analyser.lock() {
                analyser.push(&samples);
            }
        }
        if let Some(resampler) = &mut self.resampler {
            samples = resampler.push(&samples);
        }
        if samples.is_empty() {
            return Ok(None);
        }

        let rate = self.bus.sample_rate() as f64;
        let now = self.now_frame();
        let start = match self.next_start {
            Some(cursor) if cursor >= now => cursor,
            _ => now + (PLAYBACK_LEAD_SECS * rate).round() as u64,
        };
        let len = samples.len() as u64;

        let id = self.bus.schedule(samples, start as f64 / rate)?;
        self.next_start = Some(start + len);

        let buffer = ScheduledBuffer {
            id,
            start: start as f64 / rate,
            duration: len as f64 / rate,
        };
        self.live.push(buffer);
        self.stats.buffer_scheduled();
        Ok(Some(buffer))
    }

    /// Barge-in: silences everything queued and re-anchors the cursor to now.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        self.next_start = Some(self.now_frame());
        stopped
    }

    /// Stops every live source. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.live.len();
        for buffer in self.live.drain(..) {
            self.bus.stop(buffer.id);
        }
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
        stopped
    }

    pub fn live_sources(&mut self) -> usize {
        self.reap();
        self.live.len()
    }

    /// Clock time the next buffer would start at, if a cursor is set.
    pub fn next_start(&self) -> Option<f64> {
        let rate = self.bus.sample_rate() as f64;
        self.next_start.map(|frame| frame as f64 / rate)
    }

    fn now_frame(&self) -> u64 {
        (self.bus.now() * self.bus.sample_rate() as f64).round() as u64
    }

    fn reap(&mut self) {
        let bus = &self.bus;
        self.live.retain(|buffer| bus.is_active(buffer.id));
    }
}
