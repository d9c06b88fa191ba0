//! Audio acquisition, decoding and frequency analysis.
//!
//! Sources play or capture on cpal's callback thread and feed a shared
//! [`SampleTap`]; the [`AnalysisTap`] turns the latest window into byte
//! magnitudes once per display frame.

mod analyser;
pub mod bootstrap;
mod decode;
mod session;
mod source;

pub use analyser::{blackman_window, AnalysisTap, SampleTap, MAX_WINDOW};
pub use bootstrap::SILENT_CLIP;
pub use decode::{decode_file, resolve_url, DecodedAudio};
pub use session::{AudioSession, MediaDescriptor, PlaybackState, TransportEvent};
pub use source::{CpalBackend, FilePlayer, LiveCapture, MediaBackend, MediaSource};
