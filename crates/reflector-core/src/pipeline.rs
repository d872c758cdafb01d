use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use log::{debug, info};
use reflector_shaders::{FeatureFlags, ShaderComposer};

use crate::error::{ReflectorError, Result};
use crate::scene::Vertex;
use crate::targets::DEPTH_TARGET_FORMAT;
use crate::uniforms::{
    BlurUniform, CameraUniform, FrameUniform, ObjectUniform, ReflectorUniform, SurfaceUniform,
};

pub(crate) fn uniform_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    size: usize,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(size as u64),
        },
        count: None,
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32, ty: wgpu::SamplerBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(ty),
        count: None,
    }
}

const FILTERABLE: wgpu::TextureSampleType = wgpu::TextureSampleType::Float { filterable: true };
const FILTERING: wgpu::SamplerBindingType = wgpu::SamplerBindingType::Filtering;
const VS_FS: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX_FRAGMENT;

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: 12,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: 24,
            shader_location: 2,
            format: wgpu::VertexFormat::Float32x2,
        },
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

fn depth_state() -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_TARGET_FORMAT,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Bind group layouts shared by the scene and reflector pipelines.
pub struct SceneLayouts {
    /// group 0: camera
    pub camera: wgpu::BindGroupLayout,
    /// group 1 of the scene shader: object + surface
    pub object_surface: wgpu::BindGroupLayout,
    /// group 1 of the reflector shader: object only
    pub object: wgpu::BindGroupLayout,
    /// group 2: frame lighting
    pub frame: wgpu::BindGroupLayout,
}

impl SceneLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let camera = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera-bgl"),
            entries: &[uniform_entry(0, VS_FS, std::mem::size_of::<CameraUniform>())],
        });
        let object_surface = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-surface-bgl"),
            entries: &[
                uniform_entry(0, VS_FS, std::mem::size_of::<ObjectUniform>()),
                uniform_entry(1, VS_FS, std::mem::size_of::<SurfaceUniform>()),
            ],
        });
        let object = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-bgl"),
            entries: &[uniform_entry(0, VS_FS, std::mem::size_of::<ObjectUniform>())],
        });
        let frame = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bgl"),
            entries: &[uniform_entry(0, VS_FS, std::mem::size_of::<FrameUniform>())],
        });
        Self { camera, object_surface, object, frame }
    }
}

/// Lit pipeline for ordinary scene nodes.
pub struct ScenePipeline {
    pipeline: wgpu::RenderPipeline,
}

impl ScenePipeline {
    pub fn new(
        device: &wgpu::Device,
        layouts: &SceneLayouts,
        target_format: wgpu::TextureFormat,
        label: &str,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene-shader"),
            source: wgpu::ShaderSource::Wgsl(reflector_shaders::scene_shader_source().into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene-pipeline-layout"),
            bind_group_layouts: &[&layouts.camera, &layouts.object_surface, &layouts.frame],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            // the mirrored view flips winding, so nothing is culled
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(depth_state()),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}

/// Fullscreen separable blur, one direction per pass.
pub struct BlurRenderer {
    pipeline: wgpu::RenderPipeline,
    bgl: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl BlurRenderer {
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("reflection-blur-shader"),
            source: wgpu::ShaderSource::Wgsl(reflector_shaders::BLUR_WGSL.into()),
        });
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reflection-blur-bgl"),
            entries: &[
                texture_entry(0, FILTERABLE),
                sampler_entry(1, FILTERING),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<BlurUniform>()),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("reflection-blur-pipeline-layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("reflection-blur-pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("reflection-blur-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        Self { pipeline, bgl, sampler }
    }

    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        src: &wgpu::TextureView,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reflection-blur-bg"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }

    pub fn record<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, bg: &'a wgpu::BindGroup) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bg, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// Binding slots of the reflector material group (group 3).
pub mod material_slot {
    pub const SURFACE: u32 = 0;
    pub const REFLECTOR: u32 = 1;
    pub const TARGET_SAMPLER: u32 = 2;
    pub const SHARP: u32 = 3;
    pub const BLURRED: u32 = 4;
    pub const DEPTH: u32 = 5;
    pub const MAP_SAMPLER: u32 = 6;
    pub const DISTORTION: u32 = 7;
    pub const NORMAL: u32 = 8;
    pub const ROUGHNESS: u32 = 9;
    pub const BUMP: u32 = 10;
    pub const DEPTH_SAMPLER: u32 = 11;
}

/// One compiled reflector variant and the material layout it expects.
pub struct ReflectorPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub material_bgl: wgpu::BindGroupLayout,
}

/// Layout of group 3 for `flags`; bindings of disabled features are absent.
fn material_layout_entries(flags: FeatureFlags) -> Vec<wgpu::BindGroupLayoutEntry> {
    use material_slot as s;
    let mut entries = vec![
        uniform_entry(s::SURFACE, VS_FS, std::mem::size_of::<SurfaceUniform>()),
        uniform_entry(s::REFLECTOR, VS_FS, std::mem::size_of::<ReflectorUniform>()),
        sampler_entry(s::TARGET_SAMPLER, FILTERING),
        texture_entry(s::SHARP, FILTERABLE),
        texture_entry(s::BLURRED, FILTERABLE),
        sampler_entry(s::MAP_SAMPLER, FILTERING),
    ];
    if flags.contains(FeatureFlags::DEPTH) {
        entries.push(texture_entry(s::DEPTH, wgpu::TextureSampleType::Depth));
        entries.push(sampler_entry(s::DEPTH_SAMPLER, wgpu::SamplerBindingType::NonFiltering));
    }
    let maps = [
        (FeatureFlags::DISTORTION_MAP, s::DISTORTION),
        (FeatureFlags::NORMAL_MAP, s::NORMAL),
        (FeatureFlags::ROUGHNESS_MAP, s::ROUGHNESS),
        (FeatureFlags::BUMP_MAP, s::BUMP),
    ];
    for (flag, binding) in maps {
        if flags.contains(flag) {
            entries.push(texture_entry(binding, FILTERABLE));
        }
    }
    entries
}

/// Compiled reflector pipelines keyed by feature set; materials with equal
/// flags share one pipeline.
pub struct ReflectorPipelineCache {
    device: Arc<wgpu::Device>,
    layouts: Arc<SceneLayouts>,
    target_format: wgpu::TextureFormat,
    composer: ShaderComposer,
    pipelines: HashMap<FeatureFlags, ReflectorPipeline>,
}

impl ReflectorPipelineCache {
    pub fn new(
        device: Arc<wgpu::Device>,
        layouts: Arc<SceneLayouts>,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            device,
            layouts,
            target_format,
            composer: ShaderComposer::reflector(),
            pipelines: HashMap::new(),
        }
    }

    /// Swap the shader library; pipelines built from the old one are dropped.
    pub fn set_composer(&mut self, composer: ShaderComposer) {
        self.composer = composer;
        self.pipelines.clear();
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn get(&self, flags: FeatureFlags) -> Option<&ReflectorPipeline> {
        self.pipelines.get(&flags)
    }

    /// Compose and compile the variant for `flags` unless already cached.
    /// Validation errors from compilation come back as `Backend`.
    pub fn get_or_create(&mut self, flags: FeatureFlags) -> Result<&ReflectorPipeline> {
        if !self.pipelines.contains_key(&flags) {
            let source = self.composer.compose(flags)?;
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let built = self.build(flags, &source);
            if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
                return Err(ReflectorError::Backend(format!("reflector variant {flags:?}: {err}")));
            }
            info!("reflector: compiled pipeline variant {flags:?}");
            self.pipelines.insert(flags, built);
        } else {
            debug!("reflector: reusing pipeline variant {flags:?}");
        }
        self.pipelines
            .get(&flags)
            .ok_or_else(|| {
                ReflectorError::Backend(format!("reflector variant {flags:?} missing from cache"))
            })
    }

    fn build(&self, flags: FeatureFlags, source: &str) -> ReflectorPipeline {
        let device = &self.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("reflector-shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let entries = material_layout_entries(flags);
        let material_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reflector-material-bgl"),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("reflector-pipeline-layout"),
            bind_group_layouts: &[
                &self.layouts.camera,
                &self.layouts.object,
                &self.layouts.frame,
                &material_bgl,
            ],

            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("reflector-pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.target_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(depth_state()),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        ReflectorPipeline { pipeline, material_bgl }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(flags: FeatureFlags) -> Vec<u32> {
        let mut b: Vec<u32> = material_layout_entries(flags).iter().map(|e| e.binding).collect();
        b.sort_unstable();
        b
    }

    #[test]
    fn plain_variant_declares_only_core_bindings() {
        assert_eq!(bindings(FeatureFlags::empty()), [0, 1, 2, 3, 4, 6]);
    }

    #[test]
    fn full_variant_declares_every_binding() {
        assert_eq!(bindings(FeatureFlags::all()), (0..=11).collect::<Vec<_>>());
    }

    #[test]
    fn blur_alone_adds_no_binding() {
        assert_eq!(bindings(FeatureFlags::BLUR), bindings(FeatureFlags::empty()));
    }

    #[test]
    fn vertex_layout_matches_vertex() {
        let layout = vertex_layout();
        assert_eq!(layout.array_stride, 32);
        assert_eq!(layout.attributes[2].offset, 24);
    }
}
