//! Frequency-domain tap on decoded playback audio, for visualization only.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct SpectrumAnalyser {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    history: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl SpectrumAnalyser {
    /// `fft_size` must be even; 256 or 512 is plenty for a level meter.
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let bins = spectrum.len();
        Self {
            fft,
            window,
            history: vec![0.0; fft_size],
            input,
            spectrum,
            smoothed: vec![0.0; bins],
            smoothing: smoothing.clamp(0.0, 0.99),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Feeds decoded samples; only the most recent `fft_size` are kept.
    pub fn push(&mut self, samples: &[f32]) {
        let size = self.history.len();
        if samples.len() >= size {
            self.history.copy_from_slice(&samples[samples.len() - size..]);
        } else {
            self.history.rotate_left(samples.len());
            self.history[size - samples.len()..].copy_from_slice(samples);
        }
    }

    /// Smoothed magnitudes mapped onto 0..=255 between -100 dB and -30 dB.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        for ((dst, s), w) in self.input.iter_mut().zip(&self.history).zip(&self.window) {
            *dst = s * w;
        }
        if let Err(e) = self.fft.process(&mut self.input, &mut self.spectrum) {
            tracing::warn!("spectrum analysis failed: {}", e);
            return vec![0; self.bin_count()];
        }

        let scale = 1.0 / self.fft_size() as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        self.spectrum
            .iter()
            .zip(self.smoothed.iter_mut())
            .map(|(bin, smoothed)| {
                *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * bin.norm() * scale;
                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (((db - MIN_DECIBELS) / range) * 255.0).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_as_zero() {
        let mut analyser = SpectrumAnalyser::new(256, 0.0);
        analyser.push(&[0.0; 512]);
        assert!(analyser.byte_frequency_data().iter().all(|b| *b == 0));
        assert_eq!(analyser.bin_count(), 129);
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let mut analyser = SpectrumAnalyser::new(256, 0.0);
        let bin = 16;
        let tone: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / 256.0).sin() * 0.001)
            .collect();
        analyser.push(&tone);

        let data = analyser.byte_frequency_data();
        let peak = data
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
    }
}
