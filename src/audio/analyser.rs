//! Frequency-analysis tap producing byte-scaled magnitude bins.
//!
//! The audio thread pushes a mono mix into a [`SampleTap`]; once per frame the
//! sampling loop asks the [`AnalysisTap`] for a fresh snapshot. The byte
//! buffer it returns is reused between calls.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use crate::error::AudioError;
use crate::params::AnalyserConfig;

/// Largest analysis window a tap can serve (samples)
pub const MAX_WINDOW: usize = 32768;

/// Sliding window of the most recent mono samples (shared with the audio thread)
#[derive(Debug, Clone)]
pub struct SampleTap {
    samples: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl Default for SampleTap {
    fn default() -> Self {
        Self::new(MAX_WINDOW)
    }
}

impl SampleTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append interleaved frames, mixed down to mono; oldest samples fall off
    pub fn push_interleaved(&self, data: &[f32], channels: usize) {
        let channels = channels.max(1);
        let Ok(mut samples) = self.samples.lock() else {
            return;
        };
        for frame in data.chunks(channels) {
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(frame.iter().sum::<f32>() / frame.len() as f32);
        }
    }

    /// Copy the latest `out.len()` samples into `out`, zero-filling the front
    /// when fewer have been captured
    pub fn snapshot(&self, out: &mut [f32]) {
        let Ok(samples) = self.samples.lock() else {
            out.fill(0.0);
            return;
        };
        let available = samples.len().min(out.len());
        let pad = out.len() - available;
        out[..pad].fill(0.0);
        for (dst, src) in out[pad..]
            .iter_mut()
            .zip(samples.iter().skip(samples.len() - available))
        {
            *dst = *src;
        }
    }
}

/// FFT analysis over a [`SampleTap`], reporting one byte per frequency bin
pub struct AnalysisTap {
    config: AnalyserConfig,
    tap: SampleTap,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bins: Vec<u8>,
}

impl AnalysisTap {
    /// Create a tap reading from `tap` with the given analyser settings
    pub fn new(config: AnalyserConfig, tap: SampleTap) -> Result<Self, AudioError> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidAnalyser {
                details: e.to_string(),
            })?;

        let size = config.fft_size;
        let fft = FftPlanner::new().plan_fft_forward(size);
        let window = (0..size).map(|i| blackman_window(i, size)).collect();
        let bins = config.bin_count();

        Ok(Self {
            config,
            tap,
            fft,
            window,
            time_domain: vec![0.0; size],
            spectrum: vec![Complex::new(0.0, 0.0); size],
            smoothed: vec![0.0; bins],
            bins: vec![0; bins],
        })
    }

    /// Number of frequency bins per snapshot
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Analyse the latest window and return byte magnitudes (0..=255) per bin.
    ///
    /// The returned slice is overwritten by the next call.
    pub fn byte_frequency_data(&mut self) -> &[u8] {
        self.tap.snapshot(&mut self.time_domain);

        for ((out, sample), weight) in self
            .spectrum
            .iter_mut()
            .zip(&self.time_domain)
            .zip(&self.window)
        {
            *out = Complex::new(sample * weight, 0.0);
        }
        self.fft.process(&mut self.spectrum);

        let scale = 1.0 / self.config.fft_size as f32;
        let tau = self.config.smoothing_time_constant;
        let min_db = self.config.min_decibels;
        let range_db = self.config.max_decibels - min_db;

        for (k, (smoothed, byte)) in self
            .smoothed
            .iter_mut()
            .zip(self.bins.iter_mut())
            .enumerate()
        {
            let magnitude = self.spectrum[k].norm() * scale;
            let next = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if next.is_finite() { next } else { 0.0 };

            let db = 20.0 * smoothed.log10();
            let scaled = 255.0 * (db - min_db) / range_db;
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }

        &self.bins
    }
}

/// Blackman window function for FFT analysis
pub fn blackman_window(index: usize, size: usize) -> f32 {
    let phase = 2.0 * PI * index as f32 / size as f32;
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(bin: usize, size: usize, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * bin as f32 * n as f32 / size as f32).sin())
            .collect()
    }

    #[test]
    fn test_blackman_window() {
        let size = 1024;

        // Blackman window is 0 at the start and 1 at the center
        assert!(blackman_window(0, size).abs() < 1e-6);
        assert!((blackman_window(size / 2, size) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tap_keeps_latest_samples() {
        let tap = SampleTap::new(4);
        tap.push_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 1);

        let mut out = [0.0; 4];
        tap.snapshot(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_tap_mixes_to_mono_and_pads() {
        let tap = SampleTap::new(8);
        tap.push_interleaved(&[1.0, 0.0, 0.5, 0.5], 2);

        let mut out = [9.0; 4];
        tap.snapshot(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_silence_yields_zero_bins() {
        let mut analyser = AnalysisTap::new(AnalyserConfig::default(), SampleTap::default()).unwrap();
        assert_eq!(analyser.bin_count(), 1024);
        assert!(analyser.byte_frequency_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let config = AnalyserConfig {
            fft_size: 256,
            smoothing_time_constant: 0.0,
            ..Default::default()
        };
        let tap = SampleTap::new(256);
        tap.push_interleaved(&sine(16, 256, 1.0, 256), 1);

        let mut analyser = AnalysisTap::new(config, tap).unwrap();
        let bins = analyser.byte_frequency_data();

        assert_eq!(bins[16], 255);
        assert!(bins[100] < 200, "far bin should be attenuated, got {}", bins[100]);
    }

    #[test]
    fn test_smoothing_converges_upward() {
        let config = AnalyserConfig {
            fft_size: 256,
            ..Default::default()
        };
        let tap = SampleTap::new(256);
        tap.push_interleaved(&sine(16, 256, 0.001, 256), 1);

        let mut analyser = AnalysisTap::new(config, tap).unwrap();
        let first = analyser.byte_frequency_data()[16];
        for _ in 0..20 {
            analyser.byte_frequency_data();
        }
        let settled = analyser.byte_frequency_data()[16];

        assert!(first < settled, "{} should be below {}", first, settled);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalyserConfig {
            fft_size: 100,
            ..Default::default()
        };
        assert!(matches!(
            AnalysisTap::new(config, SampleTap::default()),
            Err(AudioError::InvalidAnalyser { .. })
        ));
    }
}
