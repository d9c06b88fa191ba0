//! Shader program compilation, linking and handle resolution.
//!
//! WGSL is parsed and validated with naga before anything touches the GPU,
//! so a broken shader never reaches the device. Handles are resolved by
//! name: vertex attributes by `@location`, resources by `@binding` in
//! group 0. A name the shader does not declare resolves to `None` and the
//! matching value is simply not bound.

use std::borrow::Cow;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, Module, ShaderStage, TypeInner};

use super::quad::QuadVertex;
use crate::error::ShaderError;

/// Bundled pass-through vertex stage
pub const DEFAULT_VERTEX_SHADER: &str = include_str!("shaders/passthrough.vert.wgsl");

/// Bundled pass-through fragment stage
pub const DEFAULT_FRAGMENT_SHADER: &str = include_str!("shaders/passthrough.frag.wgsl");

pub const POSITION_ATTRIBUTE: &str = "a_position";
pub const TEX_COORD_ATTRIBUTE: &str = "a_texCoord";
pub const VIDEO_TEXTURE: &str = "u_video";
pub const VIDEO_SAMPLER: &str = "u_video_sampler";
pub const INPUT_UNIFORM: &str = "u_input_variable";
pub const RESOLUTION_UNIFORM: &str = "u_resolution";

/// Resolved locations (attributes) and bindings (group 0 resources)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramHandles {
    pub position: Option<u32>,
    pub tex_coord: Option<u32>,
    pub video: Option<u32>,
    pub sampler: Option<u32>,
    pub input: Option<u32>,
    pub resolution: Option<u32>,
}

/// Validated shader pair, not yet on the GPU
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub vertex_source: String,
    pub fragment_source: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub handles: ProgramHandles,
}

fn parse(stage: &'static str, source: &str) -> Result<Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
        stage,
        diagnostic: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| ShaderError::Validation {
            stage,
            diagnostic: e.emit_to_string(source),
        })?;

    Ok(module)
}

fn entry_point<'m>(
    module: &'m Module,
    stage: ShaderStage,
    label: &'static str,
) -> Result<&'m naga::EntryPoint, ShaderError> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage)
        .ok_or(ShaderError::MissingEntryPoint { stage: label })
}

/// `(name, location)` for every located value, flattening struct members
fn located(
    module: &Module,
    name: Option<&String>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<(Option<String>, u32)>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push((name.cloned(), *location)),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    located(module, member.name.as_ref(), member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn inputs(module: &Module, ep: &naga::EntryPoint) -> Vec<(Option<String>, u32)> {
    let mut out = Vec::new();
    for arg in &ep.function.arguments {
        located(module, arg.name.as_ref(), arg.ty, arg.binding.as_ref(), &mut out);
    }
    out
}

fn outputs(module: &Module, ep: &naga::EntryPoint) -> Vec<(Option<String>, u32)> {
    let mut out = Vec::new();
    if let Some(result) = &ep.function.result {
        located(module, None, result.ty, result.binding.as_ref(), &mut out);
    }
    out
}

/// Binding index of a group 0 global named `name`
fn global_binding(module: &Module, name: &str) -> Option<u32> {
    module.global_variables.iter().find_map(|(_, var)| {
        let binding = var.binding.as_ref()?;
        (binding.group == 0 && var.name.as_deref() == Some(name)).then_some(binding.binding)
    })
}

/// Parse, validate and link a vertex/fragment pair, then resolve handles
pub fn compile_program(
    vertex_source: &str,
    fragment_source: &str,
) -> Result<CompiledProgram, ShaderError> {
    let vertex = parse("vertex", vertex_source)?;
    let fragment = parse("fragment", fragment_source)?;

    let vs = entry_point(&vertex, ShaderStage::Vertex, "vertex")?;
    let fs = entry_point(&fragment, ShaderStage::Fragment, "fragment")?;

    let written: Vec<u32> = outputs(&vertex, vs).into_iter().map(|(_, l)| l).collect();
    if let Some((_, location)) = inputs(&fragment, fs)
        .into_iter()
        .find(|(_, location)| !written.contains(location))
    {
        return Err(ShaderError::Link { location });
    }

    let attributes = inputs(&vertex, vs);
    let attribute = |name: &str| {
        attributes
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, location)| *location)
    };
    let resource =
        |name: &str| global_binding(&fragment, name).or_else(|| global_binding(&vertex, name));

    let handles = ProgramHandles {
        position: attribute(POSITION_ATTRIBUTE),
        tex_coord: attribute(TEX_COORD_ATTRIBUTE),
        video: resource(VIDEO_TEXTURE),
        sampler: resource(VIDEO_SAMPLER),
        input: resource(INPUT_UNIFORM),
        resolution: resource(RESOLUTION_UNIFORM),
    };
    tracing::debug!(?handles, "shader program linked");

    Ok(CompiledProgram {
        vertex_source: vertex_source.to_string(),
        fragment_source: fragment_source.to_string(),
        vertex_entry: vs.name.clone(),
        fragment_entry: fs.name.clone(),
        handles,
    })
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layout entries for the resources a program declares
pub fn layout_entries(handles: &ProgramHandles) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::new();
    if let Some(binding) = handles.video {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    if let Some(binding) = handles.sampler {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries.extend(handles.input.map(uniform_entry));
    entries.extend(handles.resolution.map(uniform_entry));
    entries
}

/// Quad vertex attributes for the locations a program consumes
pub fn vertex_attributes(handles: &ProgramHandles) -> Vec<wgpu::VertexAttribute> {
    let mut attributes = Vec::new();
    if let Some(location) = handles.position {
        attributes.push(wgpu::VertexAttribute {
            offset: 0,
            shader_location: location,
            format: wgpu::VertexFormat::Float32x4,
        });
    }
    if let Some(location) = handles.tex_coord {
        attributes.push(wgpu::VertexAttribute {
            offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
            shader_location: location,
            format: wgpu::VertexFormat::Float32x2,
        });
    }
    attributes
}

/// Program resident on the GPU
pub struct ShaderProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub handles: ProgramHandles,
}

impl ShaderProgram {
    /// Build the render pipeline; GPU validation errors are captured and
    /// returned instead of panicking
    pub fn create(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        compiled: &CompiledProgram,
    ) -> Result<Self, ShaderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Compositor Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(compiled.vertex_source.clone())),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Compositor Fragment Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(compiled.fragment_source.clone())),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compositor Bind Group Layout"),
            entries: &layout_entries(&compiled.handles),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compositor Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let attributes = vertex_attributes(&compiled.handles);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Compositor Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some(compiled.vertex_entry.as_str()),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some(compiled.fragment_entry.as_str()),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Pipeline {
                reason: error.to_string(),
            });
        }

        Ok(Self {
            pipeline,
            bind_group_layout,
            handles: compiled.handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVERT_FRAGMENT: &str = r#"
        @group(0) @binding(0) var u_video: texture_2d<f32>;
        @group(0) @binding(1) var u_video_sampler: sampler;

        @fragment
        fn main(@location(0) v_texCoord: vec2<f32>) -> @location(0) vec4<f32> {
            let c = textureSample(u_video, u_video_sampler, v_texCoord);
            return vec4<f32>(1.0 - c.rgb, 1.0);
        }
    "#;

    #[test]
    fn test_default_program_resolves_all_handles() {
        let compiled = compile_program(DEFAULT_VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER).unwrap();
        let handles = compiled.handles;

        assert_eq!(handles.position, Some(0));
        assert_eq!(handles.tex_coord, Some(1));
        assert_eq!(handles.video, Some(0));
        assert_eq!(handles.sampler, Some(1));
        assert_eq!(handles.input, Some(2));
        assert_eq!(handles.resolution, None);
        assert_eq!(compiled.vertex_entry, "vs_main");
        assert_eq!(compiled.fragment_entry, "fs_main");
    }

    #[test]
    fn test_undeclared_uniform_is_absent() {
        let compiled = compile_program(DEFAULT_VERTEX_SHADER, INVERT_FRAGMENT).unwrap();
        assert_eq!(compiled.handles.input, None);
        assert_eq!(compiled.fragment_entry, "main");
        assert_eq!(layout_entries(&compiled.handles).len(), 2);
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let err = compile_program(DEFAULT_VERTEX_SHADER, "fn broken( {").unwrap_err();
        match err {
            ShaderError::Parse { stage, diagnostic } => {
                assert_eq!(stage, "fragment");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_error() {
        let fragment = r#"
            @fragment
            fn fs_main() -> vec4<f32> {
                return vec4<f32>(1.0, 0.0, 0.0, 1.0);
            }
        "#;
        assert!(matches!(
            compile_program(DEFAULT_VERTEX_SHADER, fragment),
            Err(ShaderError::Validation { stage: "fragment", .. })
        ));
    }

    #[test]
    fn test_missing_entry_point() {
        assert!(matches!(
            compile_program(DEFAULT_FRAGMENT_SHADER, DEFAULT_FRAGMENT_SHADER),
            Err(ShaderError::MissingEntryPoint { stage: "vertex" })
        ));
    }

    #[test]
    fn test_link_rejects_unwritten_varying() {
        let fragment = r#"
            @fragment
            fn fs_main(@location(3) v_extra: vec2<f32>) -> @location(0) vec4<f32> {
                return vec4<f32>(v_extra, 0.0, 1.0);
            }
        "#;
        assert_eq!(
            compile_program(DEFAULT_VERTEX_SHADER, fragment).unwrap_err(),
            ShaderError::Link { location: 3 }
        );
    }

    #[test]
    fn test_vertex_attributes_follow_quad_layout() {
        let handles = ProgramHandles {
            position: Some(2),
            tex_coord: Some(5),
            ..Default::default()
        };
        let attributes = vertex_attributes(&handles);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].shader_location, 2);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].shader_location, 5);
        assert_eq!(attributes[1].offset, 16);
        assert!(vertex_attributes(&ProgramHandles::default()).is_empty());
    }

    #[test]
    fn test_layout_entries_skip_absent_handles() {
        let handles = ProgramHandles {
            video: Some(0),
            resolution: Some(4),
            ..Default::default()
        };
        let bindings: Vec<u32> = layout_entries(&handles).iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![0, 4]);
    }
}
