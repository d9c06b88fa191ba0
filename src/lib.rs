//! Vibeshade library - audio-driven shader compositing over live video

pub mod audio;
pub mod compositor;
pub mod error;
pub mod extractor;
pub mod params;

pub use error::{Error, Result};

/// Whether a per-frame loop wants to be scheduled again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}
