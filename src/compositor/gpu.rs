//! wgpu context for the compositor: render target, device, quad and video
//! texture.

use wgpu::util::DeviceExt;

use super::program::ShaderProgram;
use super::quad::{flip_rows_into, ScalarUniform, Vec2Uniform, QUAD_VERTICES};
use super::video::VideoFrame;
use super::Canvas;
use crate::error::{CompositorError, ShaderError};

fn gpu_error(reason: impl ToString) -> CompositorError {
    CompositorError::Gpu {
        reason: reason.to_string(),
    }
}

/// Video texture plus its view; recreated when the frame size changes
struct VideoTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl VideoTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Video Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

/// Where the compositor draws
enum RenderTarget {
    /// Window surface, presented after every draw
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    /// Texture kept on the GPU; read back with [`GpuContext::read_pixels`]
    Offscreen(wgpu::Texture),
}

fn offscreen_texture(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    size: (u32, u32),
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Target"),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn request_device(
    adapter: &wgpu::Adapter,
) -> Result<(wgpu::Device, wgpu::Queue), CompositorError> {
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Compositor Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
        },
        None,
    ))
    .map_err(gpu_error)?;

    device.on_uncaptured_error(Box::new(|error| {
        tracing::error!(%error, "uncaptured GPU error");
    }));
    Ok((device, queue))
}

/// GPU resources shared by every program the compositor runs
pub struct GpuContext {
    target: RenderTarget,
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    quad_buffer: wgpu::Buffer,
    input_buffer: wgpu::Buffer,
    resolution_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    video: VideoTexture,
    bind_group: Option<wgpu::BindGroup>,
    staging: Vec<u8>,
}

impl GpuContext {
    /// Create instance, surface, adapter and device for `canvas`
    pub fn new(canvas: &dyn Canvas, size: (u32, u32)) -> Result<Self, CompositorError> {
        let target = canvas
            .surface_target()
            .ok_or_else(|| gpu_error("canvas has no presentable surface"))?;
        let (width, height) = (size.0.max(1), size.1.max(1));

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(target).map_err(gpu_error)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| gpu_error("no suitable GPU adapter"))?;

        let (device, queue) = request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| gpu_error("surface reports no formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        tracing::info!(
            adapter = %adapter.get_info().name,
            ?format,
            width,
            height,
            "GPU context ready"
        );
        Ok(Self::with_target(
            device,
            queue,
            RenderTarget::Surface { surface, config },
            format,
            (width, height),
        ))
    }

    /// Create a context that renders into an RGBA8 texture instead of a
    /// window. Fails when no adapter is available.
    pub fn offscreen(size: (u32, u32)) -> Result<Self, CompositorError> {
        let (width, height) = (size.0.max(1), size.1.max(1));
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| gpu_error("no suitable GPU adapter"))?;

        let (device, queue) = request_device(&adapter)?;
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let texture = offscreen_texture(&device, format, (width, height));

        tracing::debug!(
            adapter = %adapter.get_info().name,
            width,
            height,
            "offscreen GPU context ready"
        );
        Ok(Self::with_target(
            device,
            queue,
            RenderTarget::Offscreen(texture),
            format,
            (width, height),
        ))
    }

    /// Quad, uniforms, sampler and an initial video texture for `target`
    fn with_target(
        device: wgpu::Device,
        queue: wgpu::Queue,
        target: RenderTarget,
        format: wgpu::TextureFormat,
        (width, height): (u32, u32),
    ) -> Self {
        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let input_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Input Uniform Buffer"),
            contents: bytemuck::cast_slice(&[ScalarUniform::default()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let resolution_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Resolution Uniform Buffer"),
            contents: bytemuck::cast_slice(&[Vec2Uniform::new(width as f32, height as f32)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Video Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let video = VideoTexture::new(&device, width, height);

        Self {
            target,
            device,
            queue,
            format,
            width,
            height,
            quad_buffer,
            input_buffer,
            resolution_buffer,
            sampler,
            video,
            bind_group: None,
            staging: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bind the shared resources to the slots `program` declares
    pub fn bind_group_for(&self, program: &ShaderProgram) -> Result<wgpu::BindGroup, ShaderError> {
        self.bind_group_with(program, &self.video.view)
    }

    fn bind_group_with(
        &self,
        program: &ShaderProgram,
        video: &wgpu::TextureView,
    ) -> Result<wgpu::BindGroup, ShaderError> {
        let handles = &program.handles;
        let mut entries = Vec::new();
        if let Some(binding) = handles.video {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(video),
            });
        }
        if let Some(binding) = handles.sampler {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        if let Some(binding) = handles.input {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: self.input_buffer.as_entire_binding(),
            });
        }
        if let Some(binding) = handles.resolution {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: self.resolution_buffer.as_entire_binding(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compositor Bind Group"),
            layout: &program.bind_group_layout,
            entries: &entries,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ShaderError::Pipeline {
                reason: error.to_string(),
            });
        }
        Ok(bind_group)
    }

    pub fn set_bind_group(&mut self, bind_group: wgpu::BindGroup) {
        self.bind_group = Some(bind_group);
    }

    /// Resize the render target to a new canvas size
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        match &mut self.target {
            RenderTarget::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            RenderTarget::Offscreen(texture) => {
                *texture = offscreen_texture(&self.device, self.format, (width, height));
            }
        }
    }

    /// Reconfigure after the surface was lost or went stale
    pub fn reconfigure(&mut self) {
        if let RenderTarget::Surface { surface, config } = &self.target {
            surface.configure(&self.device, config);
        }
    }

    /// Upload `frame` flipped; recreates the texture (and the bind group)
    /// when its size changed. Returns false for malformed frames and for
    /// frames whose new texture could not be bound; the old texture and
    /// bind group stay in place and the next frame retries.
    fn upload(&mut self, frame: VideoFrame<'_>, program: &ShaderProgram) -> bool {
        if frame.width == 0 || frame.height == 0 {
            return false;
        }
        if !flip_rows_into(frame.rgba, frame.width, frame.height, &mut self.staging) {
            tracing::warn!(
                width = frame.width,
                height = frame.height,
                bytes = frame.rgba.len(),
                "video frame shorter than its dimensions; skipping"
            );
            return false;
        }

        if (frame.width, frame.height) != (self.video.width, self.video.height) {
            tracing::debug!(
                width = frame.width,
                height = frame.height,
                "video size changed; recreating texture"
            );
            let video = VideoTexture::new(&self.device, frame.width, frame.height);
            match self.bind_group_with(program, &video.view) {
                Ok(bind_group) => {
                    self.video = video;
                    self.bind_group = Some(bind_group);
                }
                Err(error) => {
                    tracing::error!(%error, "failed to rebind video texture");
                    return false;
                }
            }
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.video.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &self.staging,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * frame.width),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        true
    }

    /// Clear, draw the quad when a frame is available, and present
    pub fn draw(
        &mut self,
        program: &ShaderProgram,
        frame: Option<VideoFrame<'_>>,
        input: f32,
    ) -> Result<(), wgpu::SurfaceError> {
        let (output, view) = match &self.target {
            RenderTarget::Surface { surface, .. } => {
                let output = surface.get_current_texture()?;
                let view = output
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                (Some(output), view)
            }
            RenderTarget::Offscreen(texture) => {
                (None, texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
        };

        let has_frame = match frame {
            Some(frame) => self.upload(frame, program),
            None => false,
        };

        if has_frame {
            self.queue.write_buffer(
                &self.input_buffer,
                0,
                bytemuck::cast_slice(&[ScalarUniform::new(input)]),
            );
            let resolution = Vec2Uniform::new(self.width as f32, self.height as f32);
            self.queue
                .write_buffer(&self.resolution_buffer, 0, bytemuck::cast_slice(&[resolution]));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Compositor Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Compositor Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let (true, Some(bind_group)) = (has_frame, self.bind_group.as_ref()) {
                render_pass.set_pipeline(&program.pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
                render_pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(output) = output {
            output.present();
        }
        tracing::trace!(has_frame, input, "compositor frame presented");
        Ok(())
    }

    /// Copy an offscreen target back as tightly packed RGBA8 rows
    pub fn read_pixels(&self) -> Result<Vec<u8>, CompositorError> {
        let RenderTarget::Offscreen(texture) = &self.target else {
            return Err(gpu_error("only offscreen targets can be read back"));
        };

        let row_bytes = 4 * self.width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = row_bytes.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: u64::from(padded_row_bytes) * u64::from(self.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(gpu_error)?.map_err(gpu_error)?;

        let mut pixels = Vec::with_capacity((row_bytes * self.height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row_bytes as usize) {
                pixels.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::program::{
        compile_program, DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER,
    };

    /// Offscreen context, or `None` on machines without an adapter
    fn offscreen(size: (u32, u32)) -> Option<GpuContext> {
        match GpuContext::offscreen(size) {
            Ok(gpu) => Some(gpu),
            Err(error) => {
                eprintln!("skipping GPU test: {}", error);
                None
            }
        }
    }

    fn bound_default_program(gpu: &mut GpuContext) -> ShaderProgram {
        let compiled = compile_program(DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER).unwrap();
        let program = ShaderProgram::create(gpu.device(), gpu.format(), &compiled).unwrap();
        let bind_group = gpu.bind_group_for(&program).unwrap();
        gpu.set_bind_group(bind_group);
        program
    }

    #[test]
    fn test_offscreen_draw_reads_back_frame() {
        let Some(mut gpu) = offscreen((4, 4)) else {
            return;
        };
        let program = bound_default_program(&mut gpu);

        let green = [0u8, 255, 0, 255].repeat(16);
        let frame = VideoFrame {
            width: 4,
            height: 4,
            rgba: &green,
        };
        gpu.draw(&program, Some(frame), 0.0).unwrap();

        let pixels = gpu.read_pixels().unwrap();
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_failed_rebind_keeps_previous_texture() {
        let Some(mut gpu) = offscreen((4, 4)) else {
            return;
        };
        let program = bound_default_program(&mut gpu);

        // Layout still expects the video texture, but nothing supplies it
        let compiled = compile_program(DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER).unwrap();
        let mut unbindable = ShaderProgram::create(gpu.device(), gpu.format(), &compiled).unwrap();
        unbindable.handles.video = None;

        let white = vec![255u8; 8 * 8 * 4];
        let frame = VideoFrame {
            width: 8,
            height: 8,
            rgba: &white,
        };

        assert!(!gpu.upload(frame, &unbindable));
        assert_eq!((gpu.video.width, gpu.video.height), (4, 4));
        assert!(gpu.bind_group.is_some());

        // Sizes still differ, so the next frame retries the rebind
        assert!(gpu.upload(frame, &program));
        assert_eq!((gpu.video.width, gpu.video.height), (8, 8));
        assert!(gpu.bind_group.is_some());
    }

    #[test]
    fn test_resize_offscreen_target() {
        let Some(mut gpu) = offscreen((4, 4)) else {
            return;
        };
        gpu.resize(16, 2);
        assert_eq!(gpu.size(), (16, 2));
        assert_eq!(gpu.read_pixels().unwrap().len(), 16 * 2 * 4);

        gpu.resize(0, 9);
        assert_eq!(gpu.size(), (16, 2));
    }
}
