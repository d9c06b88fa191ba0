//! Silent clip used to unlock audio output before real media is attached.

use std::io::Cursor;

use super::decode::{read_wav, DecodedAudio};
use crate::error::AudioError;

/// Minimal PCM WAV: mono, 44.1 kHz, 16-bit, empty data chunk
pub const SILENT_CLIP: [u8; 44] = [
    b'R', b'I', b'F', b'F', 36, 0, 0, 0, // RIFF chunk, 36 bytes follow
    b'W', b'A', b'V', b'E', //
    b'f', b'm', b't', b' ', 16, 0, 0, 0, // fmt chunk, 16 bytes
    1, 0, // PCM
    1, 0, // mono
    0x44, 0xAC, 0, 0, // 44100 Hz
    0x88, 0x58, 0x01, 0, // byte rate 88200
    2, 0, // block align
    16, 0, // bits per sample
    b'd', b'a', b't', b'a', 0, 0, 0, 0, // data chunk, no samples
];

/// Decode an unlock clip (normally [`SILENT_CLIP`])
pub fn decode_clip(bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
    read_wav(Cursor::new(bytes)).map_err(|e| AudioError::DecodeFailed {
        path: "<unlock clip>".to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_clip_is_empty_wav() {
        let clip = decode_clip(&SILENT_CLIP).unwrap();
        assert_eq!(clip.sample_rate, 44100);
        assert_eq!(clip.channels, 1);
        assert!(clip.samples.is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            decode_clip(b"not a wav file"),
            Err(AudioError::DecodeFailed { .. })
        ));
    }
}
