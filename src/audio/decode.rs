//! Media decoding: WAV through hound, everything else through symphonia.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// Fully decoded audio, interleaved f32 in [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate.max(1))
    }
}

/// Resolve a media URL to a local path.
///
/// Plain paths and `file://` URLs are accepted; any other scheme is remote
/// transport, which this crate does not provide.
pub fn resolve_url(url: &str) -> Result<PathBuf, AudioError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if url.contains("://") {
        return Err(AudioError::UnsupportedSource {
            url: url.to_string(),
        });
    }
    Ok(PathBuf::from(url))
}

/// Decode a whole file into memory
pub fn decode_file(path: &Path) -> Result<DecodedAudio, AudioError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let decoded = if extension == "wav" {
        decode_wav(path)?
    } else {
        decode_with_symphonia(path)?
    };

    tracing::debug!(
        path = %path.display(),
        sample_rate = decoded.sample_rate,
        channels = decoded.channels,
        duration_s = decoded.duration(),
        "decoded media"
    );
    Ok(decoded)
}

fn decode_failed(path: &Path, reason: impl ToString) -> AudioError {
    AudioError::DecodeFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn decode_wav(path: &Path) -> Result<DecodedAudio, AudioError> {
    let file = File::open(path).map_err(|e| decode_failed(path, e))?;
    read_wav(BufReader::new(file)).map_err(|e| decode_failed(path, e))
}

/// Read a whole WAV stream, scaling integer samples to [-1, 1]
pub(crate) fn read_wav<R: Read>(source: R) -> Result<DecodedAudio, hound::Error> {
    let reader = hound::WavReader::new(source)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| int_to_float(v, spec.bits_per_sample)))
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

fn decode_with_symphonia(path: &Path) -> Result<DecodedAudio, AudioError> {
    let file = File::open(path).map_err(|e| decode_failed(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_failed(path, e))?;
    let mut format = probed.format;

    // First track with a decodable codec
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_failed(path, "no audio track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| decode_failed(path, "unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_failed(path, e))?;

    let mut samples = Vec::new();
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            // End of stream
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(decode_failed(path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(path = %path.display(), error = e, "skipping undecodable packet");
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(decode_failed(path, e)),
        }
    }

    if channels == 0 {
        return Err(decode_failed(path, "unknown channel layout"));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Convert integer sample to float (-1.0 to 1.0)
pub(crate) fn int_to_float(sample: i32, bit_depth: u16) -> f32 {
    match bit_depth {
        8 => sample as f32 / 128.0,
        16 => sample as f32 / 32768.0,
        24 => sample as f32 / 8388608.0,
        32 => sample as f32 / 2147483648.0,
        _ => sample as f32 / 32768.0,
    }
}
