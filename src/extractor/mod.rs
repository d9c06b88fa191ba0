//! Signal extractor: turns an audio source into one level per display frame.
//!
//! The extractor owns the media source, the analysis tap and a
//! [`Timeline`]. The host calls [`SignalExtractor::frame`] once per redraw;
//! each call drains transport events, fires at most one due timeline action
//! and reports the current level through the `on_update` hook.

mod hooks;
mod level;
pub mod timeline;

use std::time::{Duration, Instant};

use crate::audio::{
    AnalysisTap, AudioSession, CpalBackend, MediaBackend, MediaDescriptor, MediaSource,
    PlaybackState, TransportEvent, SILENT_CLIP,
};
use crate::error::AudioError;
use crate::params::{AnalyserConfig, AudioConfig, CaptureConstraints};
use crate::LoopControl;

pub use hooks::Hooks;
pub use level::level_from_bins;
pub use timeline::{Timeline, TimelineAction};

/// Source selection and analysis settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractorOptions {
    /// Live-capture constraints, used when no `url` is given
    pub constraints: CaptureConstraints,

    /// Local path or `file://` URL; takes priority over capture
    pub url: Option<String>,

    pub analyser: AnalyserConfig,

    /// Stop waiting for initialization after this long (`None` waits forever)
    pub init_timeout: Option<Duration>,
}

impl From<&AudioConfig> for ExtractorOptions {
    fn from(config: &AudioConfig) -> Self {
        Self {
            constraints: config.capture.clone(),
            url: config.url.clone(),
            analyser: config.analyser.clone(),
            init_timeout: config.init_timeout(),
        }
    }
}

/// Audio-level signal extractor with an embedded timeline
pub struct SignalExtractor {
    options: ExtractorOptions,
    hooks: Hooks,
    timeline: Timeline,
    backend: Box<dyn MediaBackend>,
    session: AudioSession,
    media: Option<Box<dyn MediaSource>>,
    analyser: Option<AnalysisTap>,
    level: f32,
    init_called: bool,
    loop_running: bool,
    waiting_since: Option<Instant>,
    last_error: Option<AudioError>,
}

impl SignalExtractor {
    /// Create an extractor on the host's default cpal devices
    pub fn new(options: ExtractorOptions, hooks: Hooks, timeline: Timeline) -> Self {
        Self::with_backend(options, hooks, timeline, Box::new(CpalBackend::new()))
    }

    pub fn with_backend(
        options: ExtractorOptions,
        hooks: Hooks,
        timeline: Timeline,
        backend: Box<dyn MediaBackend>,
    ) -> Self {
        let descriptor = match &options.url {
            Some(url) => MediaDescriptor::Url(url.clone()),
            None => MediaDescriptor::Capture(options.constraints.clone()),
        };

        Self {
            options,
            hooks,
            timeline,
            backend,
            session: AudioSession::new(descriptor),
            media: None,
            analyser: None,
            level: 0.0,
            init_called: false,
            loop_running: false,
            waiting_since: None,
            last_error: None,
        }
    }

    /// Unlock output, acquire the source, build the analysis tap and start
    /// the sampling loop.
    ///
    /// Failures are logged and kept in [`last_error`](Self::last_error); the
    /// loop runs regardless and keeps waiting until a source is attached.
    pub fn initialize(&mut self) {
        if self.init_called {
            tracing::warn!("signal extractor already initialized");
            return;
        }
        self.init_called = true;

        if let Err(error) = self.backend.unlock(&SILENT_CLIP) {
            tracing::warn!(%error, "audio unlock failed; continuing");
        }

        match self.acquire() {
            Ok(()) => tracing::info!(
                source = ?self.session.descriptor(),
                "signal extractor initialized"
            ),
            Err(error) => self.report(error),
        }

        self.loop_running = true;
        self.waiting_since = Some(Instant::now());
    }

    fn acquire(&mut self) -> Result<(), AudioError> {
        let media = match &self.options.url {
            Some(url) => self.backend.open_url(url)?,
            None => self.backend.open_capture(&self.options.constraints)?,
        };
        self.install(media)
    }

    fn install(&mut self, media: Box<dyn MediaSource>) -> Result<(), AudioError> {
        let analyser = AnalysisTap::new(self.options.analyser.clone(), media.sample_tap())?;
        self.analyser = Some(analyser);
        self.media = Some(media);
        self.session.mark_initialized();
        Ok(())
    }

    /// Attach an externally acquired source, unblocking a waiting loop
    pub fn attach_source(&mut self, media: Box<dyn MediaSource>) {
        if self.session.is_initialized() {
            tracing::warn!("replacing the attached media source");
        }
        match self.install(media) {
            Ok(()) => tracing::info!("media source attached"),
            Err(error) => self.report(error),
        }
    }

    fn report(&mut self, error: AudioError) {
        tracing::error!(%error, "signal extractor failure");
        self.last_error = Some(error);
    }

    /// Run one sampling step; the host calls this once per display frame
    /// and stops calling after [`LoopControl::Stop`].
    pub fn frame(&mut self) -> LoopControl {
        if !self.loop_running {
            return LoopControl::Stop;
        }

        self.pump_events();

        if self.session.is_ended() {
            self.loop_running = false;
            return LoopControl::Stop;
        }

        if !self.session.is_initialized() {
            return self.wait_for_init();
        }

        let now = match &self.media {
            Some(media) => media.current_time(),
            None => self.session.current_time(),
        };
        self.session.set_current_time(now);

        // Timeline runs before sampling in the same frame
        self.timeline.advance(now, self.session.is_playing());

        self.level = match self.analyser.as_mut() {
            Some(analyser) => level_from_bins(analyser.byte_frequency_data()),
            None => 0.0,
        };
        self.update(self.level);

        LoopControl::Continue
    }

    fn wait_for_init(&mut self) -> LoopControl {
        if let (Some(timeout), Some(since)) = (self.options.init_timeout, self.waiting_since) {
            if since.elapsed() >= timeout {
                tracing::warn!(?timeout, "gave up waiting for audio initialization");
                self.loop_running = false;
                return LoopControl::Stop;
            }
        }
        tracing::trace!("waiting for audio initialization");
        LoopControl::Continue
    }

    fn pump_events(&mut self) {
        while let Some(event) = self.media.as_mut().and_then(|m| m.poll_event()) {
            match event {
                TransportEvent::Playing => self.start(),
                TransportEvent::Paused => self.pause(),
                TransportEvent::Ended => self.end(),
            }
        }
    }

    /// Playback started or resumed; `on_start` runs only the first time
    pub fn start(&mut self) {
        match self.session.begin_playing() {
            None => tracing::trace!("ignoring start after end"),
            Some(true) => {
                tracing::info!("playback started");
                if let Some(hook) = self.hooks.on_start.as_mut() {
                    hook();
                }
            }
            Some(false) => tracing::debug!("playback resumed"),
        }
    }

    /// Playback paused
    pub fn pause(&mut self) {
        if !self.session.pause() {
            tracing::trace!(state = ?self.session.state(), "ignoring pause");
            return;
        }
        tracing::debug!("playback paused");
        if let Some(hook) = self.hooks.on_pause.as_mut() {
            hook();
        }
    }

    /// Playback reached the end; the loop stops on the next frame
    pub fn end(&mut self) {
        if !self.session.end() {
            tracing::trace!(state = ?self.session.state(), "ignoring end");
            return;
        }
        tracing::info!("playback ended");
        if let Some(hook) = self.hooks.on_end.as_mut() {
            hook();
        }
    }

    /// Deliver one level sample; dropped unless playing
    pub fn update(&mut self, level: f32) {
        if !self.session.is_playing() {
            return;
        }
        if let Some(hook) = self.hooks.on_update.as_mut() {
            hook(level);
        }
    }

    /// Ask the media source to play; state changes once it reports back
    pub fn play_media(&mut self) {
        let result = match self.media.as_mut() {
            Some(media) => media.play(),
            None => {
                tracing::debug!("play requested before a source is attached");
                return;
            }
        };
        if let Err(error) = result {
            self.report(error);
        }
    }

    /// Ask the media source to pause; state changes once it reports back
    pub fn pause_media(&mut self) {
        let result = match self.media.as_mut() {
            Some(media) => media.pause(),
            None => return,
        };
        if let Err(error) = result {
            self.report(error);
        }
    }

    /// Level computed by the latest frame (0..=1)
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_initialized()
    }

    /// Playback time seen by the latest frame (seconds)
    pub fn current_time(&self) -> f64 {
        self.session.current_time()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn last_error(&self) -> Option<&AudioError> {
        self.last_error.as_ref()
    }
}
