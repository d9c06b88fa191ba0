//! Video capture and compositing configuration.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Camera orientation requested from a capture device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Front camera, facing the user
    User,

    /// Rear camera, facing away from the user
    #[default]
    Environment,
}

/// Resolution and orientation requested when opening a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Width (pixels)
    pub width: u32,

    /// Height (pixels)
    pub height: u32,

    pub facing: Facing,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            facing: Facing::Environment,
        }
    }
}

/// `[video]` section of the driver configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Requested capture width (pixels)
    pub width: u32,

    /// Requested capture height (pixels)
    pub height: u32,

    pub facing: Facing,

    /// Folder of still frames played back as the camera feed
    /// `None` = synthetic test pattern
    pub frames_dir: Option<PathBuf>,

    /// Playback rate for the camera feed (frames per second)
    pub frame_rate: f32,

    /// WGSL vertex stage override
    pub vertex_shader: Option<PathBuf>,

    /// WGSL fragment stage override
    pub fragment_shader: Option<PathBuf>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        let camera = CameraConstraints::default();
        Self {
            width: camera.width,
            height: camera.height,
            facing: camera.facing,
            frames_dir: None,
            frame_rate: 30.0,
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

impl CompositorConfig {
    pub fn camera_constraints(&self) -> CameraConstraints {
        CameraConstraints {
            width: self.width,
            height: self.height,
            facing: self.facing,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.width",
                details: format!("capture size must be non-zero, got {}x{}", self.width, self.height),
            });
        }
        if !(self.frame_rate > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "video.frame_rate",
                details: format!("must be > 0, got {}", self.frame_rate),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera_request() {
        let constraints = CompositorConfig::default().camera_constraints();
        assert_eq!((constraints.width, constraints.height), (1280, 720));
        assert_eq!(constraints.facing, Facing::Environment);
    }

    #[test]
    fn test_zero_frame_rate_rejected() {
        let config = CompositorConfig {
            frame_rate: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
