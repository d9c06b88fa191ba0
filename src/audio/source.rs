//! Media sources and the cpal backend that opens them.
//!
//! A [`MediaSource`] plays or captures audio on cpal's callback thread and
//! reports transport changes through a channel; the sampling loop drains
//! those events on its own thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use super::analyser::SampleTap;
use super::bootstrap::decode_clip;
use super::decode::{decode_file, resolve_url, DecodedAudio};
use super::session::TransportEvent;
use crate::error::AudioError;
use crate::params::CaptureConstraints;

/// An acquired audio stream
pub trait MediaSource {
    /// Playback (or capture) position in seconds
    fn current_time(&self) -> f64;

    /// Next pending transport event, if any
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Sample window fed by this source
    fn sample_tap(&self) -> SampleTap;

    fn play(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self) -> Result<(), AudioError>;
}

/// Acquires media for a signal extractor
pub trait MediaBackend {
    /// Play and immediately pause `clip` to unlock audio output
    fn unlock(&mut self, clip: &[u8]) -> Result<(), AudioError>;

    /// Open a file-backed source; it stays paused until `play()`
    fn open_url(&mut self, url: &str) -> Result<Box<dyn MediaSource>, AudioError>;

    /// Open a live-capture source; it starts running immediately
    fn open_capture(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaSource>, AudioError>;
}

fn stream_error(e: impl ToString) -> AudioError {
    AudioError::Stream {
        reason: e.to_string(),
    }
}

fn build_error(e: cpal::BuildStreamError) -> AudioError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::AccessDenied {
            reason: e.to_string(),
        },
        other => stream_error(other),
    }
}

/// Media backend on the host's default cpal devices
pub struct CpalBackend {
    host: cpal::Host,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn output_device(&self) -> Result<(cpal::Device, cpal::SupportedStreamConfig), AudioError> {
        let device = self
            .host
            .default_output_device()
            .ok_or(AudioError::NoDevice {
                direction: "output",
            })?;
        let config = device.default_output_config().map_err(stream_error)?;
        Ok((device, config))
    }

    fn input_device(&self, name: Option<&str>) -> Result<cpal::Device, AudioError> {
        match name {
            None => self.host.default_input_device().ok_or(AudioError::NoDevice {
                direction: "input",
            }),
            Some(name) => self
                .host
                .input_devices()
                .map_err(stream_error)?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound {
                    name: name.to_string(),
                }),
        }
    }
}

impl MediaBackend for CpalBackend {
    fn unlock(&mut self, clip: &[u8]) -> Result<(), AudioError> {
        let clip = decode_clip(clip)?;
        let (device, config) = self.output_device()?;
        let mut samples = clip.samples.into_iter();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        *out = samples.next().unwrap_or(0.0);
                    }
                },
                |err| tracing::error!(%err, "unlock stream error"),
                None,
            )
            .map_err(build_error)?;

        stream.play().map_err(stream_error)?;
        if let Err(err) = stream.pause() {
            tracing::debug!(%err, "unlock stream cannot pause; dropping it instead");
        }
        tracing::debug!("audio output unlocked");
        Ok(())
    }

    fn open_url(&mut self, url: &str) -> Result<Box<dyn MediaSource>, AudioError> {
        let path = resolve_url(url)?;
        let audio = decode_file(&path)?;
        let (device, config) = self.output_device()?;

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate = config.sample_rate().0,
            path = %path.display(),
            "opening media"
        );

        Ok(Box::new(FilePlayer::new(&device, config, audio)?))
    }

    fn open_capture(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaSource>, AudioError> {
        let device = self.input_device(constraints.device.as_deref())?;
        let supported = device.default_input_config().map_err(|e| AudioError::AccessDenied {
            reason: e.to_string(),
        })?;

        let mut config: cpal::StreamConfig = supported.into();
        if let Some(channels) = constraints.channels {
            config.channels = channels;
        }

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "opening capture"
        );

        Ok(Box::new(LiveCapture::new(&device, config)?))
    }
}

/// Position shared between the output callback and the sampling loop
#[derive(Default)]
struct PlayerShared {
    playing: AtomicBool,
    ended: AtomicBool,
    /// f64 bits of the playback position (seconds)
    position_s: AtomicU64,
}

/// Decoded file played through the default output device
pub struct FilePlayer {
    _stream: cpal::Stream,
    shared: Arc<PlayerShared>,
    tap: SampleTap,
    events: Receiver<TransportEvent>,
    events_tx: Sender<TransportEvent>,
}

impl FilePlayer {
    fn new(
        device: &cpal::Device,
        config: cpal::SupportedStreamConfig,
        audio: DecodedAudio,
    ) -> Result<Self, AudioError> {
        let (events_tx, events) = mpsc::channel();
        let shared = Arc::new(PlayerShared::default());
        let tap = SampleTap::default();

        let out_channels = usize::from(config.channels()).max(1);
        let src_channels = usize::from(audio.channels).max(1);
        let src_rate = f64::from(audio.sample_rate.max(1));
        // Source frames consumed per output frame (nearest-frame resampling)
        let step = src_rate / f64::from(config.sample_rate().0.max(1));
        let total_frames = audio.frames();

        let shared_cb = Arc::clone(&shared);
        let tap_cb = tap.clone();
        let ended_tx = events_tx.clone();
        let mut cursor = 0.0_f64;
        let mut mono = Vec::new();

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !shared_cb.playing.load(Ordering::Acquire) {
                        data.fill(0.0);
                        return;
                    }

                    mono.clear();
                    let mut finished = false;
                    for frame in data.chunks_mut(out_channels) {
                        let index = cursor as usize;
                        if index >= total_frames {
                            frame.fill(0.0);
                            finished = true;
                            continue;
                        }
                        let src = &audio.samples[index * src_channels..(index + 1) * src_channels];
                        for (c, out) in frame.iter_mut().enumerate() {
                            *out = src[c.min(src_channels - 1)];
                        }
                        mono.push(src.iter().sum::<f32>() / src_channels as f32);
                        cursor += step;
                    }

                    tap_cb.push_interleaved(&mono, 1);
                    let seconds = (cursor.min(total_frames as f64)) / src_rate;
                    shared_cb.position_s.store(seconds.to_bits(), Ordering::Release);

                    if finished && !shared_cb.ended.swap(true, Ordering::AcqRel) {
                        shared_cb.playing.store(false, Ordering::Release);
                        let _ = ended_tx.send(TransportEvent::Ended);
                    }
                },
                |err| tracing::error!(%err, "audio stream error"),
                None,
            )
            .map_err(build_error)?;

        // The stream renders silence until play()
        stream.play().map_err(stream_error)?;

        Ok(Self {
            _stream: stream,
            shared,
            tap,
            events,
            events_tx,
        })
    }
}

impl MediaSource for FilePlayer {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.shared.position_s.load(Ordering::Acquire))
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn sample_tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn play(&mut self) -> Result<(), AudioError> {
        if self.shared.ended.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.shared.playing.swap(true, Ordering::AcqRel) {
            let _ = self.events_tx.send(TransportEvent::Playing);
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        if self.shared.playing.swap(false, Ordering::AcqRel) {
            let _ = self.events_tx.send(TransportEvent::Paused);
        }
        Ok(())
    }
}

/// Live input device feeding the sample tap
pub struct LiveCapture {
    stream: cpal::Stream,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    running: bool,
    tap: SampleTap,
    events: Receiver<TransportEvent>,
    events_tx: Sender<TransportEvent>,
}

impl LiveCapture {
    fn new(device: &cpal::Device, config: cpal::StreamConfig) -> Result<Self, AudioError> {
        let (events_tx, events) = mpsc::channel();
        let tap = SampleTap::default();
        let frames = Arc::new(AtomicU64::new(0));
        let channels = usize::from(config.channels).max(1);

        let tap_cb = tap.clone();
        let frames_cb = Arc::clone(&frames);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    tap_cb.push_interleaved(data, channels);
                    frames_cb.fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
                },
                |err| tracing::error!(%err, "capture stream error"),
                None,
            )
            .map_err(build_error)?;

        let mut capture = Self {
            stream,
            frames,
            sample_rate: config.sample_rate.0.max(1),
            running: false,
            tap,
            events,
            events_tx,
        };
        capture.play()?;
        Ok(capture)
    }
}

impl MediaSource for LiveCapture {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / f64::from(self.sample_rate)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn sample_tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn play(&mut self) -> Result<(), AudioError> {
        if self.running {
            return Ok(());
        }
        self.stream.play().map_err(stream_error)?;
        self.running = true;
        let _ = self.events_tx.send(TransportEvent::Playing);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        if !self.running {
            return Ok(());
        }
        self.stream.pause().map_err(stream_error)?;
        self.running = false;
        let _ = self.events_tx.send(TransportEvent::Paused);
        Ok(())
    }
}
