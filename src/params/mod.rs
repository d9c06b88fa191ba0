//! Parameter definitions with units and documented semantics.
//!
//! Every section has a `Default` so an empty (or missing) TOML file yields a
//! working driver: live capture, 2048-sample analysis, synthetic camera feed
//! and the bundled pass-through shaders.

mod audio;
mod render;

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// Re-export all types
pub use audio::{AnalyserConfig, AudioConfig, CaptureConstraints};
pub use render::{CameraConstraints, CompositorConfig, Facing};

/// Shader swap scheduled on the audio timeline
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShaderCue {
    /// Playback time (seconds)
    pub time: f64,

    /// WGSL vertex stage; `None` keeps the pass-through stage
    #[serde(default)]
    pub vertex_shader: Option<PathBuf>,

    /// WGSL fragment stage
    pub fragment_shader: PathBuf,
}

/// Top-level configuration for the driver binary
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub audio: AudioConfig,
    pub video: CompositorConfig,
    pub cue: Vec<ShaderCue>,
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DriverConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections; cues must be sorted by time
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.video.validate()?;
        if let Some(cue) = self.cue.iter().find(|cue| !cue.time.is_finite()) {
            return Err(ConfigError::InvalidValue {
                key: "cue.time",
                details: format!("cue time must be finite, got {}", cue.time),
            });
        }
        if let Some(pair) = self.cue.windows(2).find(|pair| pair[1].time < pair[0].time) {
            return Err(ConfigError::InvalidValue {
                key: "cue.time",
                details: format!(
                    "cues must be sorted ascending ({} listed after {})",
                    pair[1].time, pair[0].time
                ),
            });
        }
        Ok(())
    }
}
