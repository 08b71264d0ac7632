//! A clocked software mixer implementing [`AudioBus`].
//!
//! The clock is the number of frames rendered so far: whoever drives
//! [`SoftwareBus::render`] (a device callback, or a test) advances time.
//! A suspended bus renders silence and its clock stands still.

use std::sync::Mutex;

use crate::audio::{AudioBus, BusState, Generator, SourceId};
use crate::error::{Result, VoiceError};

enum SourceKind {
    Buffer { samples: Vec<f32>, start_frame: u64 },
    Generator { generator: Box<dyn Generator>, gain: f32 },
}

struct Source {
    id: SourceId,
    kind: SourceKind,
}

struct MixerState {
    frames_rendered: u64,
    state: BusState,
    next_id: SourceId,
    sources: Vec<Source>,
    scratch: Vec<f32>,
}

pub struct SoftwareBus {
    sample_rate: u32,
    inner: Mutex<MixerState>,
}

impl SoftwareBus {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            inner: Mutex::new(MixerState {
                frames_rendered: 0,
                state: BusState::Running,
                next_id: 1,
                sources: Vec::new(),
                scratch: Vec::new(),
            }),
        }
    }

    /// Fills `out` with the next block of mono output and advances the clock.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state != BusState::Running {
            return;
        }

        let base = inner.frames_rendered;
        let end = base + out.len() as u64;
        let MixerState {
            sources, scratch, ..
        } = &mut *inner;
        scratch.resize(out.len(), 0.0);

        for source in sources.iter_mut() {
            match &mut source.kind {
                SourceKind::Buffer {
                    samples,
                    start_frame,
                } => {
                    let from = (*start_frame).max(base);
                    let to = (*start_frame + samples.len() as u64).min(end);
                    for frame in from..to {
                        out[(frame - base) as usize] += samples[(frame - *start_frame) as usize];
                    }
                }
                SourceKind::Generator { generator, gain } => {
                    scratch.fill(0.0);
                    generator.fill(scratch, self.sample_rate);
                    for (o, s) in out.iter_mut().zip(scratch.iter()) {
                        *o += s * *gain;
                    }
                }
            }
        }

        for o in out.iter_mut() {
            *o = o.clamp(-1.0, 1.0);
        }

        inner.frames_rendered = end;
        inner.sources.retain(|s| match &s.kind {
            SourceKind::Buffer {
                samples,
                start_frame,
            } => start_frame + samples.len() as u64 > end,
            SourceKind::Generator { .. } => true,
        });
    }

    /// Stops the clock, as a platform does when it interrupts audio.
    pub fn suspend(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state == BusState::Running {
                inner.state = BusState::Suspended;
            }
        }
    }

    fn add(&self, kind: SourceKind) -> Result<SourceId> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| VoiceError::Audio("mixer lock poisoned".to_string()))?;
        if inner.state == BusState::Closed {
            return Err(VoiceError::Audio("bus is closed".to_string()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.sources.push(Source { id, kind });
        Ok(id)
    }
}

impl AudioBus for SoftwareBus {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.inner
            .lock()
            .map(|inner| inner.frames_rendered as f64 / self.sample_rate as f64)
            .unwrap_or_default()
    }

    fn state(&self) -> BusState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(BusState::Closed)
    }

    fn resume(&self) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| VoiceError::Audio("mixer lock poisoned".to_string()))?;
        match inner.state {
            BusState::Closed => Err(VoiceError::Audio("cannot resume a closed bus".to_string())),
            _ => {
                inner.state = BusState::Running;
                Ok(())
            }
        }
    }

    fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = BusState::Closed;
            inner.sources.clear();
        }
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<SourceId> {
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.add(SourceKind::Buffer {
            samples,
            start_frame,
        })
    }

    fn start_generator(&self, generator: Box<dyn Generator>, gain: f32) -> Result<SourceId> {
        self.add(SourceKind::Generator { generator, gain })
    }

    fn stop(&self, id: SourceId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sources.retain(|s| s.id != id);
        }
    }

    fn is_active(&self, id: SourceId) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.sources.iter().any(|s| s.id == id))
            .unwrap_or(false)
    }

    fn active_sources(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.sources.len())
            .unwrap_or(0)
    }
}
