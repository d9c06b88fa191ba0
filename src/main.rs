//! Vibeshade - audio-reactive shader compositing over live video
//!
//! The signal extractor's level drives the compositor's `input` uniform,
//! and cues on the audio timeline swap fragment shaders mid-song.

mod cli;

use clap::Parser;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowId,
};

use vibeshade::audio::PlaybackState;
use vibeshade::compositor::{
    CompositorOptions, ImageSequenceDevice, ShaderCompositor, TestPatternDevice, VideoDevice,
    DEFAULT_VERTEX_SHADER,
};
use vibeshade::extractor::{ExtractorOptions, Hooks, SignalExtractor, Timeline, TimelineAction};
use vibeshade::params::DriverConfig;
use vibeshade::LoopControl;

/// Shader pair queued by a timeline cue (vertex, fragment)
type ShaderSwap = (String, String);

/// Main application state
struct App {
    config: DriverConfig,
    autoplay: bool,

    extractor: Option<SignalExtractor>,
    compositor: Option<ShaderCompositor>,

    // Written by extractor hooks, read once per redraw
    level: Rc<Cell<f32>>,
    swaps: Rc<RefCell<VecDeque<ShaderSwap>>>,
    audio_done: bool,
}

fn read_shader(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(source) => Some(source),
        Err(error) => {
            tracing::error!(path = %path.display(), %error, "failed to read shader");
            None
        }
    }
}

impl App {
    fn new(config: DriverConfig, autoplay: bool) -> Self {
        Self {
            config,
            autoplay,
            extractor: None,
            compositor: None,
            level: Rc::new(Cell::new(0.0)),
            swaps: Rc::new(RefCell::new(VecDeque::new())),
            audio_done: false,
        }
    }

    /// Timeline with one shader swap per configured cue
    fn build_timeline(&self) -> Timeline {
        self.config
            .cue
            .iter()
            .filter_map(|cue| {
                let vertex = match &cue.vertex_shader {
                    Some(path) => read_shader(path)?,
                    None => DEFAULT_VERTEX_SHADER.to_string(),
                };
                let fragment = read_shader(&cue.fragment_shader)?;
                let swaps = Rc::clone(&self.swaps);
                let label = cue.fragment_shader.display().to_string();
                Some(TimelineAction::new(cue.time, move || {
                    tracing::info!(shader = %label, "cue reached");
                    swaps.borrow_mut().push_back((vertex, fragment));
                }))
            })
            .collect()
    }

    fn build_extractor(&self) -> SignalExtractor {
        let level = Rc::clone(&self.level);
        let paused_level = Rc::clone(&self.level);
        let hooks = Hooks::new()
            .on_start(|| tracing::info!("music started"))
            .on_pause(move || paused_level.set(0.0))
            .on_end(|| tracing::info!("music finished"))
            .on_update(move |value| level.set(value));

        SignalExtractor::new(
            ExtractorOptions::from(&self.config.audio),
            hooks,
            self.build_timeline(),
        )
    }

    fn build_compositor(&self, event_loop: &ActiveEventLoop) -> ShaderCompositor {
        let video = &self.config.video;
        let constraints = video.camera_constraints();
        let camera: Box<dyn VideoDevice> = match &video.frames_dir {
            Some(dir) => Box::new(ImageSequenceDevice::new(dir, video.frame_rate)),
            None => Box::new(TestPatternDevice),
        };

        ShaderCompositor::new(CompositorOptions {
            container: Some(event_loop),
            canvas_label: Some("Vibeshade".to_string()),
            vertex_shader_source: video.vertex_shader.as_deref().and_then(read_shader),
            fragment_shader_source: video.fragment_shader.as_deref().and_then(read_shader),
            facing: constraints.facing,
            capture_size: (constraints.width, constraints.height),
            camera: Some(camera),
            ..Default::default()
        })
    }

    fn toggle_playback(&mut self) {
        let Some(extractor) = self.extractor.as_mut() else {
            return;
        };
        if extractor.state() == PlaybackState::Playing {
            extractor.pause_media();
        } else {
            extractor.play_media();
        }
    }

    /// One display frame: sample audio, apply queued swaps, draw
    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(extractor) = self.extractor.as_mut() {
            if !self.audio_done && extractor.frame() == LoopControl::Stop {
                tracing::info!("audio loop stopped");
                self.audio_done = true;
                self.level.set(0.0);
            }
        }

        let Some(compositor) = self.compositor.as_mut() else {
            return;
        };

        let swaps: Vec<ShaderSwap> = self.swaps.borrow_mut().drain(..).collect();
        for (vertex, fragment) in swaps {
            compositor.change_shader(&vertex, &fragment);
        }

        compositor.input = self.level.get();
        if compositor.frame() == LoopControl::Stop {
            tracing::info!("compositor stopped; exiting");
            event_loop.exit();
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(compositor) = self.compositor.as_mut() {
            compositor.stop();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(compositor) = &self.compositor {
            compositor.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.compositor.is_some() {
            return; // Already initialized
        }

        let mut compositor = self.build_compositor(event_loop);
        compositor.init_camera(None);

        let mut extractor = self.build_extractor();
        extractor.initialize();
        if self.autoplay {
            extractor.play_media();
        }

        tracing::info!("vibeshade is running (Space = play/pause, Esc = quit)");

        self.compositor = Some(compositor);
        self.extractor = Some(extractor);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(code),
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape => self.shutdown(event_loop),
                KeyCode::Space => self.toggle_playback(),
                _ => {}
            },
            WindowEvent::Resized(size) => {
                if let Some(compositor) = self.compositor.as_mut() {
                    compositor.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.frame(event_loop),
            _ => {}
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn main() {
    let args = cli::Args::parse();
    init_tracing(args.verbose);

    let config = match args.load_config() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "invalid configuration");
            std::process::exit(1);
        }
    };

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(error) => {
            tracing::error!(%error, "failed to create event loop");
            std::process::exit(1);
        }
    };

    let mut app = App::new(config, args.autoplay);
    if let Err(error) = event_loop.run_app(&mut app) {
        tracing::error!(%error, "event loop failed");
    }
}
