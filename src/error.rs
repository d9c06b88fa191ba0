//! Error types shared by the extractor, the compositor and the config layer.

use thiserror::Error;

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("shader error: {0}")]
    Shader(#[from] ShaderError),

    #[error("compositor error: {0}")]
    Compositor(#[from] CompositorError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Audio acquisition, decoding and device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio {direction} device available")]
    NoDevice { direction: &'static str },

    #[error("audio device '{name}' not found")]
    DeviceNotFound { name: String },

    #[error("audio device refused access: {reason}")]
    AccessDenied { reason: String },

    #[error("unsupported audio source '{url}'")]
    UnsupportedSource { url: String },

    #[error("failed to decode '{path}': {reason}")]
    DecodeFailed { path: String, reason: String },

    #[error("audio stream failed: {reason}")]
    Stream { reason: String },

    #[error("invalid analyser settings: {details}")]
    InvalidAnalyser { details: String },
}

/// Shader compile and link errors, carrying naga's diagnostic text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShaderError {
    #[error("{stage} shader failed to parse:\n{diagnostic}")]
    Parse { stage: &'static str, diagnostic: String },

    #[error("{stage} shader failed validation:\n{diagnostic}")]
    Validation { stage: &'static str, diagnostic: String },

    #[error("{stage} shader has no {stage} entry point")]
    MissingEntryPoint { stage: &'static str },

    #[error("program link failed: fragment input @location({location}) is not written by the vertex stage")]
    Link { location: u32 },

    #[error("GPU rejected program: {reason}")]
    Pipeline { reason: String },
}

/// Compositor setup and runtime errors
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("a {element} element or an element container is required")]
    MissingElement { element: &'static str },

    #[error("failed to create {element} element: {reason}")]
    ElementCreation { element: &'static str, reason: String },

    #[error("no camera device configured")]
    NoCamera,

    #[error("camera access failed: {reason}")]
    Camera { reason: String },

    #[error("GPU unavailable: {reason}")]
    Gpu { reason: String },

    #[error("video has no metadata yet")]
    VideoNotReady,

    #[error("compositor is {state}, expected {expected}")]
    InvalidState {
        state: &'static str,
        expected: &'static str,
    },
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse configuration file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration value {key}: {details}")]
    InvalidValue { key: &'static str, details: String },
}

/// Convenience alias for results carrying the crate error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_errors_convert_into_crate_error() {
        let err: Error = ShaderError::Link { location: 3 }.into();
        assert!(matches!(err, Error::Shader(ShaderError::Link { location: 3 })));
        assert!(err.to_string().contains("@location(3)"));
    }

    #[test]
    fn test_every_variant_keeps_its_source() {
        use std::error::Error as _;

        let errors: Vec<Error> = vec![
            AudioError::NoDevice { direction: "input" }.into(),
            ShaderError::Link { location: 0 }.into(),
            CompositorError::NoCamera.into(),
            ConfigError::InvalidValue {
                key: "cue.time",
                details: "nan".to_string(),
            }
            .into(),
        ];
        for err in &errors {
            match err {
                Error::Audio(_) | Error::Shader(_) | Error::Compositor(_) | Error::Config(_) => {
                    assert!(err.source().is_some(), "{} lost its source", err)
                }
            }
        }
    }

    #[test]
    fn test_missing_element_message() {
        let err = CompositorError::MissingElement { element: "video" };
        assert_eq!(
            err.to_string(),
            "a video element or an element container is required"
        );
    }
}
