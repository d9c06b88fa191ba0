//! Audio analysis and acquisition configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::error::ConfigError;

/// Frequency-analysis tap configuration (mirrors an AnalyserNode's knobs)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// FFT window size in samples (power of 2, 32..=32768)
    pub fft_size: usize,

    /// Exponential smoothing between successive snapshots (0 = none, <1)
    pub smoothing_time_constant: f32,

    /// Magnitude mapped to byte 0 (dBFS)
    pub min_decibels: f32,

    /// Magnitude mapped to byte 255 (dBFS)
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyserConfig {
    /// Number of frequency bins produced per snapshot
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Validate configuration (FFT size must be power of 2, etc.)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(ConfigError::InvalidValue {
                key: "audio.analyser.fft_size",
                details: format!("must be a power of 2 in 32..=32768, got {}", self.fft_size),
            });
        }
        if !(0.0..1.0).contains(&self.smoothing_time_constant) {
            return Err(ConfigError::InvalidValue {
                key: "audio.analyser.smoothing_time_constant",
                details: format!("must be in [0, 1), got {}", self.smoothing_time_constant),
            });
        }
        if self.min_decibels >= self.max_decibels {
            return Err(ConfigError::InvalidValue {
                key: "audio.analyser.min_decibels",
                details: format!(
                    "must be below max_decibels ({} >= {})",
                    self.min_decibels, self.max_decibels
                ),
            });
        }
        Ok(())
    }
}

/// Live-capture constraints (default: any audio input)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    /// Input device name; `None` picks the host default
    pub device: Option<String>,

    /// Preferred channel count; `None` keeps the device default
    pub channels: Option<u16>,
}

/// `[audio]` section of the driver configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Local path or `file://` URL; takes priority over live capture
    pub url: Option<String>,

    /// Live-capture constraints
    pub capture: CaptureConstraints,

    /// Give up waiting for initialization after this long (milliseconds)
    pub init_timeout_ms: Option<u64>,

    pub analyser: AnalyserConfig,
}

impl AudioConfig {
    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analyser.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_analyser_matches_web_defaults() {
        let config = AnalyserConfig::default();
        assert_eq!(config.bin_count(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two_fft() {
        let config = AnalyserConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                key: "audio.analyser.fft_size",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_inverted_decibel_range() {
        let config = AnalyserConfig {
            min_decibels: -20.0,
            max_decibels: -30.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_init_timeout_conversion() {
        let config = AudioConfig {
            init_timeout_ms: Some(1500),
            ..Default::default()
        };
        assert_eq!(config.init_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(AudioConfig::default().init_timeout(), None);
    }
}
