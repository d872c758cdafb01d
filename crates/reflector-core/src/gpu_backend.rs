//! wgpu implementation of [`ReflectionBackend`].
//!
//! The sharp render, horizontal and vertical blur passes of a frame are
//! recorded into one command encoder and submitted at `end_frame`, so any
//! pass recorded afterwards samples finished targets.

use std::sync::Arc;

use glam::Vec4;
use log::{debug, info};

use crate::allocator::{OwnedTexture, RenderAllocator, TexKey};
use crate::blur::BlurKernelConfig;
use crate::error::{ReflectorError, Result};
use crate::lighting::FrameParams;
use crate::pass_manager::{ReflectionBackend, ScenePass};
use crate::pipeline::{BlurRenderer, SceneLayouts, ScenePipeline};
use crate::scene::{NodeMaterial, Scene};
use crate::targets::{COLOR_TARGET_FORMAT, DEPTH_TARGET_FORMAT, TargetSlot};
use crate::uniforms::{BlurUniform, CameraUniform};
use crate::upload::{GpuSceneCache, UniformBinding};

const COLOR_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);
const DEPTH_USAGE: wgpu::TextureUsages =
    wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::TEXTURE_BINDING);

struct GpuTargets {
    sharp: OwnedTexture,
    blurred: OwnedTexture,
    depth: OwnedTexture,
    resolution: u32,
}

impl GpuTargets {
    fn get(&self, slot: TargetSlot) -> &OwnedTexture {
        match slot {
            TargetSlot::Sharp => &self.sharp,
            TargetSlot::Blurred => &self.blurred,
            TargetSlot::Depth => &self.depth,
        }
    }
}

fn pop_scopes(device: &wgpu::Device, what: &str) -> Result<()> {
    let validation = pollster::block_on(device.pop_error_scope());
    let memory = pollster::block_on(device.pop_error_scope());
    match validation.or(memory) {
        Some(err) => Err(ReflectorError::Backend(format!("{what}: {err}"))),
        None => Ok(()),
    }
}

fn push_scopes(device: &wgpu::Device) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
}

pub struct GpuReflectionBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    allocator: RenderAllocator,
    layouts: Arc<SceneLayouts>,
    scene_pipeline: ScenePipeline,
    blur: BlurRenderer,
    h_params: wgpu::Buffer,
    v_params: wgpu::Buffer,
    scene_cache: GpuSceneCache,
    camera: UniformBinding,
    targets: Option<GpuTargets>,
    encoder: Option<wgpu::CommandEncoder>,
    scopes_open: bool,
}

impl GpuReflectionBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let layouts = Arc::new(SceneLayouts::new(&device));
        Self::with_layouts(device, queue, layouts)
    }

    /// Share bind group layouts with the main-pass pipelines.
    pub fn with_layouts(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        layouts: Arc<SceneLayouts>,
    ) -> Self {
        let scene_pipeline =
            ScenePipeline::new(&device, &layouts, COLOR_TARGET_FORMAT, "reflection-scene-pipeline");
        let blur = BlurRenderer::new(&device, COLOR_TARGET_FORMAT);
        let params = |label: &'static str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<BlurUniform>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let h_params = params("reflection-blur-h-params");
        let v_params = params("reflection-blur-v-params");
        let scene_cache = GpuSceneCache::new(&device, layouts.clone());
        let camera = UniformBinding::new(
            &device,
            &layouts.camera,
            &CameraUniform::new(glam::Mat4::IDENTITY, glam::Vec3::ZERO),
            "mirrored-camera",
        );
        Self {
            allocator: RenderAllocator::new(device.clone()),
            device,
            queue,
            layouts,
            scene_pipeline,
            blur,
            h_params,
            v_params,
            scene_cache,
            camera,
            targets: None,
            encoder: None,
            scopes_open: false,
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn layouts(&self) -> &Arc<SceneLayouts> {
        &self.layouts
    }

    /// Scene meshes, node uniforms and frame lighting, shared with the main pass.
    pub fn scene_cache(&self) -> &GpuSceneCache {
        &self.scene_cache
    }

    pub fn sync_scene(&mut self, scene: &Scene, frame: &FrameParams) {
        self.scene_cache.sync(&self.device, &self.queue, scene, frame);
    }

    pub fn pooled_textures(&self) -> usize {
        self.allocator.pooled_textures()
    }

    fn targets(&self) -> Result<&GpuTargets> {
        self.targets.as_ref().ok_or(ReflectorError::MissingTarget(TargetSlot::Sharp))
    }
}

fn clear_color(c: Vec4) -> wgpu::Color {
    wgpu::Color {
        r: c.x as f64,
        g: c.y as f64,
        b: c.z as f64,
        a: c.w as f64,
    }
}

impl ReflectionBackend for GpuReflectionBackend {
    type Target = OwnedTexture;

    fn max_resolution(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_targets(&mut self, resolution: u32) -> Result<()> {
        push_scopes(&self.device);
        let color = TexKey::square(resolution, COLOR_TARGET_FORMAT, COLOR_USAGE);
        let depth = TexKey::square(resolution, DEPTH_TARGET_FORMAT, DEPTH_USAGE);
        let targets = GpuTargets {
            sharp: self.allocator.allocate_texture(color, TargetSlot::Sharp.label()),
            blurred: self.allocator.allocate_texture(color, TargetSlot::Blurred.label()),
            depth: self.allocator.allocate_texture(depth, TargetSlot::Depth.label()),
            resolution,
        };
        pop_scopes(&self.device, "allocating reflection targets")?;
        self.allocator.retain_side(resolution);
        info!("gpu reflector: {resolution}x{resolution} targets ready");
        self.targets = Some(targets);
        Ok(())
    }

    fn destroy_targets(&mut self) {
        if let Some(t) = self.targets.take() {
            for tex in [t.sharp, t.blurred, t.depth] {
                tex.texture.destroy();
            }
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        if !self.scopes_open {
            push_scopes(&self.device);
            self.scopes_open = true;
        }
        Ok(())
    }

    fn render_scene(&mut self, pass: &ScenePass<'_>) -> Result<()> {
        let Some(targets) = self.targets.as_ref() else {
            return Err(ReflectorError::MissingTarget(TargetSlot::Sharp));
        };
        self.scene_cache.sync(&self.device, &self.queue, pass.scene, pass.frame);
        self.camera.write(&self.queue, &CameraUniform::new(pass.view_projection, pass.eye));

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reflection-encoder"),
            })
        });
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("reflection-sharp-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.sharp.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear_color(pass.clear_color)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        rpass.set_pipeline(self.scene_pipeline.pipeline());
        rpass.set_bind_group(0, &self.camera.bind_group, &[]);
        rpass.set_bind_group(2, self.scene_cache.frame_group(), &[]);
        let mut drawn = 0;
        for (id, node, _) in pass.scene.visible_nodes(pass.exclude) {
            if !matches!(node.material, NodeMaterial::Standard(_)) {
                continue;
            }
            let gpu_node = self.scene_cache.node(id.0);
            let (Some(gpu_node), Some(mesh)) = (gpu_node, self.scene_cache.mesh(node.mesh.0)) else {
                continue;
            };
            rpass.set_bind_group(1, &gpu_node.scene_group, &[]);
            mesh.draw(&mut rpass);
            drawn += 1;
        }
        debug!("gpu reflector: recorded {drawn} nodes into the sharp target");
        Ok(())
    }

    fn blur(&mut self, kernel: &BlurKernelConfig) -> Result<()> {
        let resolution = self.targets()?.resolution;
        self.queue.write_buffer(
            &self.h_params,
            0,
            bytemuck::bytes_of(&BlurUniform::new(&kernel.horizontal(), [1.0, 0.0], resolution)),
        );
        self.queue.write_buffer(
            &self.v_params,
            0,
            bytemuck::bytes_of(&BlurUniform::new(&kernel.vertical(), [0.0, 1.0], resolution)),
        );
        let scratch_key = TexKey::square(resolution, COLOR_TARGET_FORMAT, COLOR_USAGE);
        let scratch = self.allocator.allocate_texture(scratch_key, "reflection-blur-scratch");

        let Some(targets) = self.targets.as_ref() else {
            return Err(ReflectorError::MissingTarget(TargetSlot::Blurred));
        };
        let from_sharp = self.blur.bind_group(&self.device, &targets.sharp.view, &self.h_params);
        let from_blurred =
            self.blur.bind_group(&self.device, &targets.blurred.view, &self.h_params);
        let vertical = self.blur.bind_group(&self.device, &scratch.view, &self.v_params);

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reflection-encoder"),
            })
        });
        let run = |encoder: &mut wgpu::CommandEncoder,
                   dst: &wgpu::TextureView,
                   bg: &wgpu::BindGroup,
                   label: &'static str| {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dst,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            self.blur.record(&mut rpass, bg);
        };
        for i in 0..kernel.iterations() {
            let source = if i == 0 { &from_sharp } else { &from_blurred };
            run(encoder, &scratch.view, source, "reflection-blur-h");
            run(encoder, &targets.blurred.view, &vertical, "reflection-blur-v");
        }
        self.allocator.release_texture(scratch);
        Ok(())
    }

    fn copy_sharp_to_blurred(&mut self) -> Result<()> {
        let resolution = self.targets()?.resolution;
        let size = wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: 1,
        };
        let Some(targets) = self.targets.as_ref() else {
            return Err(ReflectorError::MissingTarget(TargetSlot::Blurred));
        };
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reflection-encoder"),
            })
        });
        encoder.copy_texture_to_texture(
            targets.sharp.texture.as_image_copy(),
            targets.blurred.texture.as_image_copy(),
            size,
        );

        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
        if std::mem::take(&mut self.scopes_open) {
            pop_scopes(&self.device, "reflection passes")?;
        }
        Ok(())
    }

    fn target(&self, slot: TargetSlot) -> Option<&OwnedTexture> {
        self.targets.as_ref().map(|t| t.get(slot))
    }
}
