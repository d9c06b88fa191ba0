//! Video sources feeding the compositor texture.
//!
//! A [`VideoDevice`] opens a [`VideoSource`] for a set of camera
//! constraints; the compositor attaches it to its [`VideoElement`] and pulls
//! one RGBA frame per draw.

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops::FilterType;

use crate::error::CompositorError;
use crate::params::CameraConstraints;

/// How much of the stream is available, mirroring a media element
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ReadyState {
    #[default]
    HaveNothing,

    /// Dimensions are known
    HaveMetadata,

    /// A frame can be drawn
    HaveCurrentData,
}

/// Borrowed RGBA8 frame, rows top to bottom
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

/// A stream of decoded frames
pub trait VideoSource {
    fn ready_state(&self) -> ReadyState;

    /// Native resolution once metadata is available
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Latest frame, or `None` while no frame is decodable
    fn current_frame(&mut self) -> Option<VideoFrame<'_>>;
}

/// Opens camera-like streams
pub trait VideoDevice {
    fn open(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoSource>, CompositorError>;
}

/// Video element: a label plus the attached stream, if any
#[derive(Default)]
pub struct VideoElement {
    pub label: String,
    stream: Option<Box<dyn VideoSource>>,
}

impl VideoElement {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stream: None,
        }
    }

    /// Attach a stream, replacing any previous one
    pub fn attach(&mut self, stream: Box<dyn VideoSource>) {
        self.stream = Some(stream);
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.stream
            .as_ref()
            .map_or(ReadyState::HaveNothing, |s| s.ready_state())
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().and_then(|s| s.dimensions())
    }

    pub fn current_frame(&mut self) -> Option<VideoFrame<'_>> {
        let stream = self.stream.as_mut()?;
        if stream.ready_state() < ReadyState::HaveCurrentData {
            return None;
        }
        stream.current_frame()
    }
}

impl std::fmt::Debug for VideoElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoElement")
            .field("label", &self.label)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// Plays a folder of still images as a looping camera feed
#[derive(Debug, Clone)]
pub struct ImageSequenceDevice {
    dir: PathBuf,
    frame_rate: f32,
}

impl ImageSequenceDevice {
    pub fn new(dir: impl Into<PathBuf>, frame_rate: f32) -> Self {
        Self {
            dir: dir.into(),
            frame_rate,
        }
    }
}

fn camera_error(reason: impl ToString) -> CompositorError {
    CompositorError::Camera {
        reason: reason.to_string(),
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
        .unwrap_or(false)
}

impl VideoDevice for ImageSequenceDevice {
    fn open(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoSource>, CompositorError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| camera_error(format!("{}: {}", self.dir.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(camera_error(format!(
                "no frames found in {}",
                self.dir.display()
            )));
        }

        let (width, height) = (constraints.width.max(1), constraints.height.max(1));
        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let image = image::open(path)
                .map_err(|e| camera_error(format!("{}: {}", path.display(), e)))?;
            let rgba = image.resize_exact(width, height, FilterType::Triangle).to_rgba8();
            frames.push(rgba.into_raw());
        }

        tracing::info!(
            dir = %self.dir.display(),
            frames = frames.len(),
            width,
            height,
            facing = ?constraints.facing,
            "opened image sequence"
        );

        Ok(Box::new(ImageSequence {
            frames,
            width,
            height,
            frame_rate: self.frame_rate.max(0.001),
            started: Instant::now(),
        }))
    }
}

struct ImageSequence {
    frames: Vec<Vec<u8>>,
    width: u32,
    height: u32,
    frame_rate: f32,
    started: Instant,
}

impl VideoSource for ImageSequence {
    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveCurrentData
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn current_frame(&mut self) -> Option<VideoFrame<'_>> {
        let elapsed = self.started.elapsed().as_secs_f32();
        let index = (elapsed * self.frame_rate) as usize % self.frames.len();
        Some(VideoFrame {
            width: self.width,
            height: self.height,
            rgba: &self.frames[index],
        })
    }
}

/// Synthetic camera: a slowly scrolling color gradient
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPatternDevice;

impl VideoDevice for TestPatternDevice {
    fn open(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoSource>, CompositorError> {
        let (width, height) = (constraints.width.max(1), constraints.height.max(1));
        tracing::info!(width, height, "opened test pattern");
        Ok(Box::new(TestPattern {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            started: Instant::now(),
        }))
    }
}

struct TestPattern {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    started: Instant,
}

impl TestPattern {
    fn render(&mut self, t: f32) {
        let (w, h) = (self.width as f32, self.height as f32);
        let shift = (t * 0.1).fract();
        for (i, px) in self.pixels.chunks_exact_mut(4).enumerate() {
            let x = (i % self.width as usize) as f32 / w;
            let y = (i / self.width as usize) as f32 / h;
            px[0] = (((x + shift).fract()) * 255.0) as u8;
            px[1] = (y * 255.0) as u8;
            px[2] = ((1.0 - (x + shift).fract()) * 255.0) as u8;
            px[3] = 255;
        }
    }
}

impl VideoSource for TestPattern {
    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveCurrentData
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn current_frame(&mut self) -> Option<VideoFrame<'_>> {
        let t = self.started.elapsed().as_secs_f32();
        self.render(t);
        Some(VideoFrame {
            width: self.width,
            height: self.height,
            rgba: &self.pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CameraConstraints {
        CameraConstraints {
            width: 8,
            height: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_element_has_nothing() {
        let mut element = VideoElement::new("video");
        assert_eq!(element.ready_state(), ReadyState::HaveNothing);
        assert!(element.dimensions().is_none());
        assert!(element.current_frame().is_none());
    }

    #[test]
    fn test_test_pattern_frames() {
        let mut element = VideoElement::new("video");
        element.attach(TestPatternDevice.open(&small()).unwrap());

        assert_eq!(element.dimensions(), Some((8, 4)));
        let frame = element.current_frame().unwrap();
        assert_eq!(frame.rgba.len(), 8 * 4 * 4);
        assert!(frame.rgba.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_image_sequence_resizes_frames() {
        let dir = tempfile::tempdir().unwrap();
        for (i, shade) in [0u8, 128, 255].iter().enumerate() {
            let image = image::RgbaImage::from_pixel(16, 16, image::Rgba([*shade, 0, 0, 255]));
            image.save(dir.path().join(format!("frame_{:03}.png", i))).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut device = ImageSequenceDevice::new(dir.path(), 30.0);
        let mut source = device.open(&small()).unwrap();

        assert_eq!(source.dimensions(), Some((8, 4)));
        let frame = source.current_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.rgba.len(), 8 * 4 * 4);
    }

    #[test]
    fn test_image_sequence_requires_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = ImageSequenceDevice::new(dir.path(), 30.0);
        assert!(matches!(
            device.open(&small()),
            Err(CompositorError::Camera { .. })
        ));
    }
}
