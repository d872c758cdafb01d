use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use log::debug;
use wgpu::util::DeviceExt;

use crate::lighting::FrameParams;
use crate::material::PbrParams;
use crate::pipeline::SceneLayouts;
use crate::scene::{Mesh, NodeMaterial, Scene};
use crate::texture::TextureData;
use crate::uniforms::{FrameUniform, ObjectUniform, SurfaceUniform};

/// Uniform buffer bound alone in a bind group.
pub struct UniformBinding {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

impl UniformBinding {
    pub fn new<T: Pod>(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        initial: &T,
        label: &str,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(initial),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }

    pub fn write<T: Pod>(&self, queue: &wgpu::Queue, value: &T) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(value));
    }
}

pub struct GpuMesh {
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
    pub indices: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh-vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh-indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self { vertex, index, indices: mesh.indices.len() as u32 }
    }

    pub fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        pass.set_vertex_buffer(0, self.vertex.slice(..));
        pass.set_index_buffer(self.index.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.indices, 0, 0..1);
    }
}

/// Per-node uniforms: the scene shader binds object + surface, the reflector
/// shader binds the object alone.
pub struct GpuNode {
    object: wgpu::Buffer,
    surface: wgpu::Buffer,
    pub scene_group: wgpu::BindGroup,
    pub object_group: wgpu::BindGroup,
}

impl GpuNode {
    fn new(device: &wgpu::Device, layouts: &SceneLayouts) -> Self {
        let make = |size: usize, label: &'static str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let object = make(std::mem::size_of::<ObjectUniform>(), "node-object");
        let surface = make(std::mem::size_of::<SurfaceUniform>(), "node-surface");
        let scene_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("node-scene-bg"),
            layout: &layouts.object_surface,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: object.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: surface.as_entire_binding(),
                },
            ],
        });
        let object_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("node-object-bg"),
            layout: &layouts.object,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: object.as_entire_binding(),
            }],
        });
        Self { object, surface, scene_group, object_group }
    }
}

/// GPU copies of scene meshes, node uniforms and the frame lighting uniform.
///
/// Meshes are append-only in [`Scene`], so the cache uploads only the tail it
/// has not seen. Node uniforms are rewritten on every sync.
pub struct GpuSceneCache {
    layouts: Arc<SceneLayouts>,
    meshes: Vec<GpuMesh>,
    nodes: Vec<GpuNode>,
    frame: UniformBinding,
}

impl GpuSceneCache {
    pub fn new(device: &wgpu::Device, layouts: Arc<SceneLayouts>) -> Self {
        let initial = FrameUniform::from(&FrameParams::default());
        let frame = UniformBinding::new(device, &layouts.frame, &initial, "frame-uniform");
        Self { layouts, meshes: Vec::new(), nodes: Vec::new(), frame }
    }

    pub fn sync(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        frame: &FrameParams,
    ) {

        let known = self.meshes.len();
        for (_, mesh) in scene.meshes().skip(known) {
            self.meshes.push(GpuMesh::upload(device, mesh));
        }
        if self.meshes.len() > known {
            debug!("scene cache: uploaded {} meshes", self.meshes.len() - known);
        }
        while self.nodes.len() < scene.node_count() {
            self.nodes.push(GpuNode::new(device, &self.layouts));
        }

        let plain = PbrParams::default();
        for (id, node) in scene.nodes() {
            let Some(model) = scene.world_matrix(id) else {
                continue;
            };
            let gpu = &self.nodes[id.0];
            queue.write_buffer(&gpu.object, 0, bytemuck::bytes_of(&ObjectUniform::new(model)));
            let params = match &node.material {
                NodeMaterial::Standard(p) => p,
                NodeMaterial::Reflector => &plain,
            };
            queue.write_buffer(&gpu.surface, 0, bytemuck::bytes_of(&SurfaceUniform::from(params)));
        }
        self.frame.write(queue, &FrameUniform::from(frame));
    }

    pub fn mesh(&self, index: usize) -> Option<&GpuMesh> {
        self.meshes.get(index)
    }

    pub fn node(&self, index: usize) -> Option<&GpuNode> {
        self.nodes.get(index)
    }

    pub fn frame_group(&self) -> &wgpu::BindGroup {
        &self.frame.bind_group
    }
}

/// Map textures uploaded once per `Arc<TextureData>`.
#[derive(Default)]
pub struct TextureCache {
    entries: HashMap<usize, (Arc<TextureData>, wgpu::Texture, wgpu::TextureView)>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(data: &Arc<TextureData>) -> usize {
        Arc::as_ptr(data) as usize
    }

    /// Upload `data` unless it is already resident.
    pub fn ensure(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, data: &Arc<TextureData>) {
        self.entries.entry(Self::key(data)).or_insert_with(|| {
            let (texture, view) = upload_texture(device, queue, data, "material-map");
            (data.clone(), texture, view)
        });
    }

    pub fn get(&self, data: &Arc<TextureData>) -> Option<&wgpu::TextureView> {
        self.entries.get(&Self::key(data)).map(|(_, _, view)| view)
    }

    /// Drop uploads no longer referenced outside the cache.
    pub fn collect_garbage(&mut self) {
        self.entries.retain(|_, (data, _, _)| Arc::strong_count(data) > 1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    data: &TextureData,
    label: &str,
) -> (wgpu::Texture, wgpu::TextureView) {
    let format = if data.srgb {
        wgpu::TextureFormat::Rgba8UnormSrgb
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    };
    let size = wgpu::Extent3d {
        width: data.width.max(1),
        height: data.height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    if !data.pixels.is_empty() {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * data.width),
                rows_per_image: Some(data.height),
            },
            size,
        );
    }
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
