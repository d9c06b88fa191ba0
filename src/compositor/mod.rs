//! Shader compositor: draws a live video feed through a swappable WGSL
//! program onto a window.
//!
//! Lifecycle: `Idle` after construction, `AwaitingMetadata` once a camera
//! stream is attached, `Running` after [`ShaderCompositor::start`], and
//! `Stopped` after [`ShaderCompositor::stop`]. Setup failures leave the
//! compositor `Inert`; every later call is then a logged no-op.

mod gpu;
pub mod program;
pub mod quad;
pub mod video;

use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use crate::error::{CompositorError, Error};
use crate::params::{CameraConstraints, Facing};
use crate::LoopControl;

pub use gpu::GpuContext;
pub use program::{
    compile_program, CompiledProgram, ProgramHandles, ShaderProgram, DEFAULT_FRAGMENT_SHADER,
    DEFAULT_VERTEX_SHADER,
};
pub use video::{
    ImageSequenceDevice, ReadyState, TestPatternDevice, VideoDevice, VideoElement, VideoFrame,
    VideoSource,
};

/// Drawing target for the compositor
pub trait Canvas {
    /// Current size (pixels)
    fn size(&self) -> (u32, u32);

    fn set_size(&self, width: u32, height: u32);

    /// Presentable surface target, `None` when the canvas cannot present
    fn surface_target(&self) -> Option<wgpu::SurfaceTarget<'static>>;

    fn request_redraw(&self) {}
}

impl Canvas for Arc<Window> {
    fn size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn set_size(&self, width: u32, height: u32) {
        // The platform may apply the size later; Resized events follow
        let _ = self.request_inner_size(PhysicalSize::new(width, height));
    }

    fn surface_target(&self) -> Option<wgpu::SurfaceTarget<'static>> {
        Some(wgpu::SurfaceTarget::from(Arc::clone(self)))
    }

    fn request_redraw(&self) {
        Window::request_redraw(self);
    }
}

/// Creates the elements a compositor was not given
pub trait Container {
    fn create_canvas(&self, label: &str) -> Result<Box<dyn Canvas>, CompositorError>;

    fn create_video(&self, label: &str) -> Result<VideoElement, CompositorError> {
        Ok(VideoElement::new(label))
    }
}

impl Container for ActiveEventLoop {
    fn create_canvas(&self, label: &str) -> Result<Box<dyn Canvas>, CompositorError> {
        let window = self
            .create_window(Window::default_attributes().with_title(label))
            .map_err(|e| CompositorError::ElementCreation {
                element: "canvas",
                reason: e.to_string(),
            })?;
        Ok(Box::new(Arc::new(window)))
    }
}

/// Construction options; every field is optional
pub struct CompositorOptions<'a> {
    pub video: Option<VideoElement>,
    pub canvas: Option<Box<dyn Canvas>>,

    /// Creates `video` / `canvas` when they are not supplied
    pub container: Option<&'a dyn Container>,
    pub video_label: Option<String>,
    pub canvas_label: Option<String>,

    /// WGSL overrides for the bundled pass-through stages
    pub vertex_shader_source: Option<String>,
    pub fragment_shader_source: Option<String>,

    pub facing: Facing,

    /// Capture resolution requested from the camera (pixels)
    pub capture_size: (u32, u32),

    /// Opened by `init_camera(None)`
    pub camera: Option<Box<dyn VideoDevice>>,
}

impl Default for CompositorOptions<'_> {
    fn default() -> Self {
        let camera = CameraConstraints::default();
        Self {
            video: None,
            canvas: None,
            container: None,
            video_label: None,
            canvas_label: None,
            vertex_shader_source: None,
            fragment_shader_source: None,
            facing: Facing::default(),
            capture_size: (camera.width, camera.height),
            camera: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    /// Setup failed; nothing will be drawn
    Inert,
    /// Constructed, no stream attached
    Idle,
    /// Stream attached, waiting for its dimensions
    AwaitingMetadata,
    Running,
    Stopped,
}

impl CompositorState {
    fn name(self) -> &'static str {
        match self {
            Self::Inert => "inert",
            Self::Idle => "idle",
            Self::AwaitingMetadata => "awaiting metadata",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Draws the video feed through the active shader program
pub struct ShaderCompositor {
    /// Value pushed to `u_input_variable` on every draw
    pub input: f32,

    state: CompositorState,
    video: Option<VideoElement>,
    canvas: Option<Box<dyn Canvas>>,
    camera: Option<Box<dyn VideoDevice>>,
    constraints: CameraConstraints,
    vertex_source: String,
    fragment_source: String,
    handles: ProgramHandles,
    gpu: Option<GpuContext>,
    program: Option<ShaderProgram>,
    last_error: Option<Error>,
}

impl ShaderCompositor {
    pub fn new(options: CompositorOptions<'_>) -> Self {
        let CompositorOptions {
            video,
            canvas,
            container,
            video_label,
            canvas_label,
            vertex_shader_source,
            fragment_shader_source,
            facing,
            capture_size,
            camera,
        } = options;

        let mut compositor = Self {
            input: 0.0,
            state: CompositorState::Idle,
            video: None,
            canvas: None,
            camera,
            constraints: CameraConstraints {
                width: capture_size.0,
                height: capture_size.1,
                facing,
            },
            vertex_source: vertex_shader_source
                .unwrap_or_else(|| DEFAULT_VERTEX_SHADER.to_string()),
            fragment_source: fragment_shader_source
                .unwrap_or_else(|| DEFAULT_FRAGMENT_SHADER.to_string()),
            handles: ProgramHandles::default(),
            gpu: None,
            program: None,
            last_error: None,
        };

        let video = match (video, container) {
            (Some(video), _) => Ok(video),
            (None, Some(container)) => {
                container.create_video(video_label.as_deref().unwrap_or("video"))
            }
            (None, None) => Err(CompositorError::MissingElement { element: "video" }),
        };
        let canvas = match (canvas, container) {
            (Some(canvas), _) => Ok(canvas),
            (None, Some(container)) => {
                container.create_canvas(canvas_label.as_deref().unwrap_or("canvas"))
            }
            (None, None) => Err(CompositorError::MissingElement { element: "canvas" }),
        };

        match (video, canvas) {
            (Ok(video), Ok(canvas)) => {
                compositor.video = Some(video);
                compositor.canvas = Some(canvas);
                tracing::debug!("shader compositor constructed");
            }
            (Err(error), _) | (_, Err(error)) => {
                compositor.fail(error.into());
            }
        }
        compositor
    }

    fn report(&mut self, error: Error) {
        tracing::error!(%error, state = self.state.name(), "shader compositor failure");
        self.last_error = Some(error);
    }

    fn fail(&mut self, error: Error) {
        self.report(error);
        self.state = CompositorState::Inert;
        self.program = None;
        self.gpu = None;
    }

    /// Attach `stream`, or open one from the configured camera device.
    ///
    /// Drawing starts on the first frame after the stream reports metadata.
    pub fn init_camera(&mut self, stream: Option<Box<dyn VideoSource>>) {
        if let Err(error) = self.try_init_camera(stream) {
            self.report(error);
        }
    }

    fn try_init_camera(&mut self, stream: Option<Box<dyn VideoSource>>) -> crate::Result<()> {
        if !matches!(
            self.state,
            CompositorState::Idle | CompositorState::AwaitingMetadata
        ) {
            return Err(CompositorError::InvalidState {
                state: self.state.name(),
                expected: "idle",
            }
            .into());
        }

        let stream = match stream {
            Some(stream) => stream,
            None => self
                .camera
                .as_mut()
                .ok_or(CompositorError::NoCamera)?
                .open(&self.constraints)?,
        };

        let video = self
            .video
            .as_mut()
            .ok_or(CompositorError::MissingElement { element: "video" })?;
        video.attach(stream);
        tracing::info!(video = %video.label, "camera stream attached");
        self.state = CompositorState::AwaitingMetadata;
        Ok(())
    }

    /// Size the canvas to the video, bring up the GPU and the shader
    /// program, and start drawing. Failures leave the compositor inert.
    pub fn start(&mut self) {
        if self.state == CompositorState::Running {
            tracing::warn!("shader compositor already running");
            return;
        }
        if matches!(self.state, CompositorState::Inert | CompositorState::Stopped) {
            let error = CompositorError::InvalidState {
                state: self.state.name(),
                expected: "awaiting metadata",
            };
            self.report(error.into());
            return;
        }

        match self.try_start() {
            Ok(()) => {
                self.state = CompositorState::Running;
                tracing::info!(handles = ?self.handles, "shader compositor running");
            }
            Err(error) => self.fail(error),
        }
    }

    fn try_start(&mut self) -> crate::Result<()> {
        let (width, height) = self
            .video
            .as_ref()
            .and_then(|v| v.dimensions())
            .ok_or(CompositorError::VideoNotReady)?;
        let canvas = self
            .canvas
            .as_ref()
            .ok_or(CompositorError::MissingElement { element: "canvas" })?;
        canvas.set_size(width, height);

        let gpu = GpuContext::new(canvas.as_ref(), (width, height))?;
        self.install(gpu)
    }

    /// Compile the current sources and bind them on `gpu`
    fn install(&mut self, mut gpu: GpuContext) -> crate::Result<()> {
        let compiled = compile_program(&self.vertex_source, &self.fragment_source)?;
        let program = ShaderProgram::create(gpu.device(), gpu.format(), &compiled)?;
        let bind_group = gpu.bind_group_for(&program)?;
        gpu.set_bind_group(bind_group);

        self.handles = compiled.handles;
        self.gpu = Some(gpu);
        self.program = Some(program);
        Ok(())
    }

    /// Run one draw step; the host calls this once per display frame
    pub fn frame(&mut self) -> LoopControl {
        match self.state {
            CompositorState::Inert | CompositorState::Stopped => LoopControl::Stop,
            CompositorState::Idle => LoopControl::Continue,
            CompositorState::AwaitingMetadata => {
                let ready = self
                    .video
                    .as_ref()
                    .is_some_and(|v| v.ready_state() >= ReadyState::HaveMetadata);
                if !ready {
                    return LoopControl::Continue;
                }
                self.start();
                if self.state == CompositorState::Running {
                    self.draw();
                    LoopControl::Continue
                } else {
                    LoopControl::Stop
                }
            }
            CompositorState::Running => {
                self.draw();
                LoopControl::Continue
            }
        }
    }

    fn draw(&mut self) {
        let (Some(gpu), Some(program), Some(video)) =
            (self.gpu.as_mut(), self.program.as_ref(), self.video.as_mut())
        else {
            return;
        };

        let frame = video.current_frame();
        match gpu.draw(program, frame, self.input) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost; reconfiguring");
                gpu.reconfigure();
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::warn!("surface timed out; skipping frame");
            }
            Err(error) => {
                tracing::error!(%error, "surface error");
            }
        }
    }

    /// Compile and link a new program and swap it in.
    ///
    /// On failure the previous program (and its handles) stays active.
    pub fn change_shader(&mut self, vertex_source: &str, fragment_source: &str) {
        match self.try_change_shader(vertex_source, fragment_source) {
            Ok(()) => tracing::info!(handles = ?self.handles, "shader program swapped"),
            Err(error) => self.report(error),
        }
    }

    fn try_change_shader(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> crate::Result<()> {
        if matches!(self.state, CompositorState::Inert | CompositorState::Stopped) {
            return Err(CompositorError::InvalidState {
                state: self.state.name(),
                expected: "idle or running",
            }
            .into());
        }

        let compiled = compile_program(vertex_source, fragment_source)?;

        if let Some(gpu) = self.gpu.as_mut() {
            let program = ShaderProgram::create(gpu.device(), gpu.format(), &compiled)?;
            let bind_group = gpu.bind_group_for(&program)?;
            gpu.set_bind_group(bind_group);
            self.program = Some(program);
        }

        self.handles = compiled.handles;
        self.vertex_source = compiled.vertex_source;
        self.fragment_source = compiled.fragment_source;
        Ok(())
    }

    /// Follow a canvas resize
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.resize(width, height);
        }
    }

    pub fn request_redraw(&self) {
        if let Some(canvas) = &self.canvas {
            canvas.request_redraw();
        }
    }

    /// Release GPU resources; `frame()` returns `Stop` from now on
    pub fn stop(&mut self) {
        if self.state == CompositorState::Stopped {
            return;
        }
        self.program = None;
        self.gpu = None;
        self.state = CompositorState::Stopped;
        tracing::info!("shader compositor stopped");
    }

    /// Handles of the active program (or of the one queued before start)
    pub fn handles(&self) -> ProgramHandles {
        self.handles
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    pub fn video(&self) -> Option<&VideoElement> {
        self.video.as_ref()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderError;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Canvas without a window; GPU setup on it always fails
    #[derive(Clone, Default)]
    struct HeadlessCanvas {
        size: Rc<Cell<(u32, u32)>>,
    }

    impl Canvas for HeadlessCanvas {
        fn size(&self) -> (u32, u32) {
            self.size.get()
        }

        fn set_size(&self, width: u32, height: u32) {
            self.size.set((width, height));
        }

        fn surface_target(&self) -> Option<wgpu::SurfaceTarget<'static>> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingContainer {
        canvas: HeadlessCanvas,
        labels: RefCell<Vec<String>>,
    }

    impl Container for RecordingContainer {
        fn create_canvas(&self, label: &str) -> Result<Box<dyn Canvas>, CompositorError> {
            self.labels.borrow_mut().push(label.to_string());
            Ok(Box::new(self.canvas.clone()))
        }
    }

    const INVERT_FRAGMENT: &str = r#"
        @group(0) @binding(0) var u_video: texture_2d<f32>;
        @group(0) @binding(1) var u_video_sampler: sampler;
        @group(0) @binding(3) var<uniform> u_resolution: vec2<f32>;

        @fragment
        fn fs_main(@location(0) v_texCoord: vec2<f32>) -> @location(0) vec4<f32> {
            let c = textureSample(u_video, u_video_sampler, v_texCoord);
            return vec4<f32>(1.0 - c.rgb, u_resolution.x / u_resolution.x);
        }
    "#;

    fn headless(container: &RecordingContainer) -> ShaderCompositor {
        ShaderCompositor::new(CompositorOptions {
            container: Some(container),
            capture_size: (64, 32),
            ..Default::default()
        })
    }

    #[test]
    fn test_missing_elements_leave_inert() {
        let mut compositor = ShaderCompositor::new(CompositorOptions::default());

        assert_eq!(compositor.state(), CompositorState::Inert);
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Compositor(CompositorError::MissingElement { element: "video" }))
        ));
        assert_eq!(compositor.frame(), LoopControl::Stop);

        compositor.init_camera(None);
        assert_eq!(compositor.state(), CompositorState::Inert);
    }

    #[test]
    fn test_container_creates_labelled_elements() {
        let container = RecordingContainer::default();
        let compositor = ShaderCompositor::new(CompositorOptions {
            container: Some(&container),
            video_label: Some("feed".to_string()),
            canvas_label: Some("stage".to_string()),
            ..Default::default()
        });

        assert_eq!(compositor.state(), CompositorState::Idle);
        assert_eq!(*container.labels.borrow(), vec!["stage".to_string()]);
        assert_eq!(compositor.video().map(|v| v.label.as_str()), Some("feed"));
    }

    #[test]
    fn test_idle_frame_continues() {
        let container = RecordingContainer::default();
        let mut compositor = headless(&container);
        assert_eq!(compositor.frame(), LoopControl::Continue);
    }

    #[test]
    fn test_change_shader_while_idle() {
        let container = RecordingContainer::default();
        let mut compositor = headless(&container);

        compositor.change_shader(DEFAULT_VERTEX_SHADER, INVERT_FRAGMENT);
        let swapped = compositor.handles();
        assert_eq!(swapped.resolution, Some(3));
        assert_eq!(swapped.input, None);

        compositor.change_shader(DEFAULT_VERTEX_SHADER, "@fragment fn broken(");
        assert_eq!(compositor.handles(), swapped);
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Shader(ShaderError::Parse { .. }))
        ));
        assert_eq!(compositor.state(), CompositorState::Idle);
    }

    #[test]
    fn test_init_camera_without_device() {
        let container = RecordingContainer::default();
        let mut compositor = headless(&container);

        compositor.init_camera(None);
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Compositor(CompositorError::NoCamera))
        ));
        assert_eq!(compositor.state(), CompositorState::Idle);
    }

    #[test]
    fn test_start_without_surface_goes_inert() {
        let container = RecordingContainer::default();
        let mut compositor = ShaderCompositor::new(CompositorOptions {
            container: Some(&container),
            capture_size: (64, 32),
            camera: Some(Box::new(TestPatternDevice)),
            ..Default::default()
        });

        compositor.init_camera(None);
        assert_eq!(compositor.state(), CompositorState::AwaitingMetadata);

        // Metadata is available at once, so the first frame tries to start
        assert_eq!(compositor.frame(), LoopControl::Stop);
        assert_eq!(container.canvas.size(), (64, 32));
        assert_eq!(compositor.state(), CompositorState::Inert);
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Compositor(CompositorError::Gpu { .. }))
        ));

        compositor.change_shader(DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER);
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Compositor(CompositorError::InvalidState { .. }))
        ));
    }

    /// Stream of identical solid-colour frames
    struct SolidStream {
        size: (u32, u32),
        rgba: Vec<u8>,
    }

    impl SolidStream {
        fn new(width: u32, height: u32, pixel: [u8; 4]) -> Self {
            Self {
                size: (width, height),
                rgba: pixel.repeat((width * height) as usize),
            }
        }
    }

    impl VideoSource for SolidStream {
        fn ready_state(&self) -> ReadyState {
            ReadyState::HaveCurrentData
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            Some(self.size)
        }

        fn current_frame(&mut self) -> Option<VideoFrame<'_>> {
            Some(VideoFrame {
                width: self.size.0,
                height: self.size.1,
                rgba: &self.rgba,
            })
        }
    }

    /// Fragment stage that paints `u_input_variable` into the red channel
    const INPUT_FRAGMENT: &str = r#"
        @group(0) @binding(2) var<uniform> u_input_variable: f32;

        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(u_input_variable, 0.0, 1.0, 1.0);
        }
    "#;

    /// Running compositor drawing offscreen, or `None` without an adapter
    fn offscreen_compositor(
        container: &RecordingContainer,
        pixel: [u8; 4],
    ) -> Option<ShaderCompositor> {
        let gpu = match GpuContext::offscreen((8, 8)) {
            Ok(gpu) => gpu,
            Err(error) => {
                eprintln!("skipping GPU test: {}", error);
                return None;
            }
        };

        let mut compositor = headless(container);
        compositor.init_camera(Some(Box::new(SolidStream::new(8, 8, pixel))));
        compositor.install(gpu).unwrap();
        compositor.state = CompositorState::Running;
        Some(compositor)
    }

    fn centre_pixel(compositor: &ShaderCompositor) -> [u8; 4] {
        let gpu = compositor.gpu.as_ref().unwrap();
        let (width, height) = gpu.size();
        let pixels = gpu.read_pixels().unwrap();
        let i = ((height / 2 * width + width / 2) * 4) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    #[test]
    fn test_rejected_swap_keeps_running_program() {
        let container = RecordingContainer::default();
        let Some(mut compositor) = offscreen_compositor(&container, [255, 0, 0, 255]) else {
            return;
        };
        assert_eq!(compositor.frame(), LoopControl::Continue);
        assert_eq!(centre_pixel(&compositor), [255, 0, 0, 255]);
        let handles = compositor.handles();

        compositor.change_shader(DEFAULT_VERTEX_SHADER, "@fragment fn broken(");
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Shader(ShaderError::Parse { .. }))
        ));

        // Parses, but writes no colour output
        compositor.change_shader(
            DEFAULT_VERTEX_SHADER,
            "@fragment fn fs_main() -> vec4<f32> { return vec4<f32>(0.0); }",
        );
        assert!(matches!(
            compositor.last_error(),
            Some(Error::Shader(ShaderError::Validation { .. }))
        ));

        assert_eq!(compositor.state(), CompositorState::Running);
        assert_eq!(compositor.handles(), handles);
        assert_eq!(compositor.program.as_ref().map(|p| p.handles), Some(handles));

        assert_eq!(compositor.frame(), LoopControl::Continue);
        assert_eq!(centre_pixel(&compositor), [255, 0, 0, 255]);
    }

    #[test]
    fn test_swap_applies_on_next_draw() {
        let container = RecordingContainer::default();
        let Some(mut compositor) = offscreen_compositor(&container, [0, 0, 0, 255]) else {
            return;
        };
        assert_eq!(compositor.frame(), LoopControl::Continue);
        assert_eq!(centre_pixel(&compositor), [0, 0, 0, 255]);

        compositor.change_shader(DEFAULT_VERTEX_SHADER, INPUT_FRAGMENT);
        assert!(compositor.last_error().is_none());
        assert_eq!(compositor.handles().input, Some(2));
        assert_eq!(compositor.handles().video, None);

        compositor.input = 0.5;
        assert_eq!(compositor.frame(), LoopControl::Continue);
        assert_eq!(compositor.state(), CompositorState::Running);
        let [r, g, b, a] = centre_pixel(&compositor);
        assert!((i32::from(r) - 128).abs() <= 1, "red was {}", r);
        assert_eq!((g, b, a), (0, 255, 255));

        compositor.input = 1.0;
        compositor.frame();
        assert_eq!(centre_pixel(&compositor)[0], 255);
    }

    #[test]
    fn test_stop_is_terminal() {
        let container = RecordingContainer::default();
        let mut compositor = headless(&container);

        compositor.stop();
        assert_eq!(compositor.state(), CompositorState::Stopped);
        assert_eq!(compositor.frame(), LoopControl::Stop);

        compositor.start();
        assert_eq!(compositor.state(), CompositorState::Stopped);
    }
}
