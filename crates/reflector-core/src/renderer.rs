//! Frame driver: reflection passes through the pass manager, then the main
//! camera pass with the reflector pipeline variant the material needs.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;
use reflector_config::ReflectorSettings;
use reflector_shaders::FeatureFlags;

use crate::allocator::OwnedTexture;
use crate::camera::{Camera, ReflectivePlane};
use crate::error::{ReflectorError, Result};
use crate::gpu_backend::GpuReflectionBackend;
use crate::lighting::FrameParams;
use crate::material::ReflectorMaterial;
use crate::pass_manager::{FrameOutcome, ReflectionPassManager};
use crate::pipeline::{ReflectorPipelineCache, SceneLayouts, ScenePipeline, material_slot};
use crate::scene::{NodeMaterial, Scene};
use crate::targets::{COLOR_TARGET_FORMAT, DEPTH_TARGET_FORMAT, TargetHandle};
use crate::texture::TextureData;
use crate::uniforms::{CameraUniform, ReflectorUniform, SurfaceUniform};
use crate::upload::{TextureCache, UniformBinding};

/// What the current material bind group was built from.
#[derive(Clone, Debug, PartialEq, Eq)]
struct BindingKey {
    flags: FeatureFlags,
    targets: [Option<TargetHandle>; 3],
    maps: [Option<usize>; 4],
}

struct MaterialGpu {
    surface: wgpu::Buffer,
    reflector: wgpu::Buffer,
    group: Option<(BindingKey, wgpu::BindGroup)>,
}

pub struct ReflectorRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    manager: ReflectionPassManager<GpuReflectionBackend>,
    main_pipeline: ScenePipeline,
    reflector_pipelines: ReflectorPipelineCache,
    failed_variants: HashSet<FeatureFlags>,
    camera: UniformBinding,
    material: MaterialGpu,
    textures: TextureCache,
    depth: wgpu::TextureView,
    fallback_target: wgpu::TextureView,
    target_sampler: wgpu::Sampler,
    map_sampler: wgpu::Sampler,
    depth_sampler: wgpu::Sampler,
    background: wgpu::Color,
}

fn create_depth(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("main-depth"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn linear_sampler(device: &wgpu::Device, label: &str, address: wgpu::AddressMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        ..Default::default()
    })
}

impl ReflectorRenderer {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        surface_format: wgpu::TextureFormat,
        size: (u32, u32),
        plane: ReflectivePlane,
        settings: &ReflectorSettings,
    ) -> Result<Self> {
        let layouts = Arc::new(SceneLayouts::new(&device));
        let backend =
            GpuReflectionBackend::with_layouts(device.clone(), queue.clone(), layouts.clone());
        let manager = ReflectionPassManager::new(backend, plane, settings)?;
        let main_pipeline =
            ScenePipeline::new(&device, &layouts, surface_format, "main-scene-pipeline");
        let reflector_pipelines =
            ReflectorPipelineCache::new(device.clone(), layouts.clone(), surface_format);
        let camera = UniformBinding::new(
            &device,
            &layouts.camera,
            &CameraUniform::new(glam::Mat4::IDENTITY, glam::Vec3::ZERO),
            "main-camera",
        );
        let uniform = |label: &'static str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let material = MaterialGpu {
            surface: uniform("reflector-surface", std::mem::size_of::<SurfaceUniform>()),
            reflector: uniform("reflector-uniform", std::mem::size_of::<ReflectorUniform>()),
            group: None,
        };
        // unbound reflection targets sample as black; mirror is forced to 0 then anyway
        let fallback_target = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("reflection-fallback"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COLOR_TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            depth: create_depth(&device, size.0, size.1),
            target_sampler: linear_sampler(
                &device,
                "reflection-target-sampler",
                wgpu::AddressMode::ClampToEdge,
            ),
            map_sampler: linear_sampler(&device, "material-map-sampler", wgpu::AddressMode::Repeat),
            depth_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("reflection-depth-sampler"),
                ..Default::default()
            }),
            device,
            queue,
            manager,
            main_pipeline,
            reflector_pipelines,
            failed_variants: HashSet::new(),
            camera,
            material,
            textures: TextureCache::new(),
            fallback_target,
            background: wgpu::Color::BLACK,
        })
    }

    pub fn set_background(&mut self, rgb: [f32; 3]) {
        self.background = wgpu::Color {
            r: rgb[0] as f64,
            g: rgb[1] as f64,
            b: rgb[2] as f64,
            a: 1.0,
        };
    }

    pub fn manager(&self) -> &ReflectionPassManager<GpuReflectionBackend> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ReflectionPassManager<GpuReflectionBackend> {
        &mut self.manager
    }

    /// Surface resize; the main depth buffer follows the surface.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.depth = create_depth(&self.device, width, height);
    }

    /// Pipeline variants compiled so far.
    pub fn compiled_variants(&self) -> usize {
        self.reflector_pipelines.len()
    }

    /// Render reflections, then the scene from `camera` into `target`.
    pub fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        frame: &FrameParams,
        material: &mut ReflectorMaterial,
        target: &wgpu::TextureView,
    ) -> Result<FrameOutcome> {
        self.manager.begin_frame()?;
        let outcome = self.manager.update(scene, camera, frame, material);
        self.manager.end_frame()?;
        let mut outcome = outcome?;
        // submission errors surface in end_frame, after update bound this frame's handles
        if self.manager.is_disabled() && material.uniforms().has_reflection() {
            material.uniforms_mut().clear_targets();
        }
        let flags = self.resolve_variant(material)?;
        if self.manager.is_disabled() {
            outcome = FrameOutcome::Disabled;
        }

        self.manager.backend_mut().sync_scene(scene, frame);
        self.camera
            .write(&self.queue, &CameraUniform::new(camera.view_projection(), camera.position));
        self.bind_material(material, flags)?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("main-encoder"),
        });
        self.record_main_pass(&mut encoder, scene, flags, target);
        self.queue.submit(Some(encoder.finish()));
        self.textures.collect_garbage();
        Ok(outcome)
    }

    /// Pipeline variant for `material`. A reflective variant that fails to
    /// build switches reflections off and the plane draws with the plain one.
    fn resolve_variant(&mut self, material: &mut ReflectorMaterial) -> Result<FeatureFlags> {
        let flags = material.feature_flags();
        if flags.is_empty() {
            self.reflector_pipelines.get_or_create(flags)?;
            return Ok(flags);
        }
        if !self.failed_variants.contains(&flags) {
            match self.reflector_pipelines.get_or_create(flags) {
                Ok(_) => return Ok(flags),
                Err(e @ (ReflectorError::Backend(_) | ReflectorError::Compose(_))) => {
                    self.failed_variants.insert(flags);
                    self.manager.disable(&e);
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!("reflector: variant {flags:?} unavailable, drawing without it");
        }
        material.uniforms_mut().clear_targets();
        self.reflector_pipelines.get_or_create(FeatureFlags::empty())?;
        Ok(FeatureFlags::empty())
    }

    fn bind_material(
        &mut self,
        material: &mut ReflectorMaterial,
        flags: FeatureFlags,
    ) -> Result<()> {
        self.queue.write_buffer(
            &self.material.surface,
            0,
            bytemuck::bytes_of(&SurfaceUniform::from(&material.pbr)),
        );
        if material.take_dirty() {
            debug!("reflector: pushing material uniforms");
            self.queue.write_buffer(
                &self.material.reflector,
                0,
                bytemuck::bytes_of(&ReflectorUniform::from(material.uniforms())),
            );
        }

        let maps: [Option<&Arc<TextureData>>; 4] = [
            material.distortion_map.as_ref(),
            material.pbr.normal_map.as_ref(),
            material.pbr.roughness_map.as_ref(),
            material.pbr.bump_map.as_ref(),
        ];
        for map in maps.iter().flatten() {
            self.textures.ensure(&self.device, &self.queue, map);
        }
        let u = material.uniforms();
        let key = BindingKey {
            flags,
            targets: [u.sharp, u.blurred, u.depth],
            maps: maps.map(|m| m.map(TextureCache::key)),
        };
        if self.material.group.as_ref().is_some_and(|(k, _)| *k == key) {
            return Ok(());
        }

        let sharp = match u.sharp {
            Some(h) => &self.manager.target(h)?.view,
            None => &self.fallback_target,
        };
        let blurred = match u.blurred {
            Some(h) => &self.manager.target(h)?.view,
            None => &self.fallback_target,
        };
        let depth: Option<&OwnedTexture> = match u.depth {
            Some(h) if flags.contains(FeatureFlags::DEPTH) => Some(self.manager.target(h)?),
            _ => None,
        };

        use material_slot as s;
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: s::SURFACE,
                resource: self.material.surface.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: s::REFLECTOR,
                resource: self.material.reflector.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: s::TARGET_SAMPLER,
                resource: wgpu::BindingResource::Sampler(&self.target_sampler),
            },
            wgpu::BindGroupEntry {
                binding: s::SHARP,
                resource: wgpu::BindingResource::TextureView(sharp),
            },
            wgpu::BindGroupEntry {
                binding: s::BLURRED,
                resource: wgpu::BindingResource::TextureView(blurred),
            },
            wgpu::BindGroupEntry {
                binding: s::MAP_SAMPLER,
                resource: wgpu::BindingResource::Sampler(&self.map_sampler),
            },
        ];
        if let Some(depth) = depth {
            entries.push(wgpu::BindGroupEntry {
                binding: s::DEPTH,
                resource: wgpu::BindingResource::TextureView(&depth.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: s::DEPTH_SAMPLER,
                resource: wgpu::BindingResource::Sampler(&self.depth_sampler),
            });
        }
        let map_slots = [
            (FeatureFlags::DISTORTION_MAP, s::DISTORTION),
            (FeatureFlags::NORMAL_MAP, s::NORMAL),
            (FeatureFlags::ROUGHNESS_MAP, s::ROUGHNESS),
            (FeatureFlags::BUMP_MAP, s::BUMP),
        ];
        for ((flag, binding), map) in map_slots.into_iter().zip(maps) {
            if !flags.contains(flag) {
                continue;
            }
            if let Some(view) = map.and_then(|m| self.textures.get(m)) {
                entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::TextureView(view),
                });
            }
        }

        let Some(pipeline) = self.reflector_pipelines.get(flags) else {
            return Ok(());
        };
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reflector-material-bg"),
            layout: &pipeline.material_bgl,
            entries: &entries,
        });
        debug!("reflector: rebuilt material bind group for {flags:?}");
        self.material.group = Some((key, group));
        Ok(())
    }

    fn record_main_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        flags: FeatureFlags,
        target: &wgpu::TextureView,
    ) {
        let cache = self.manager.backend().scene_cache();
        let reflector = self.reflector_pipelines.get(flags);
        let material_group = self.material.group.as_ref().map(|(_, g)| g);

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("main-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.background),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        rpass.set_bind_group(0, &self.camera.bind_group, &[]);
        rpass.set_bind_group(2, cache.frame_group(), &[]);

        for (id, node, _) in scene.visible_nodes(None) {
            let (Some(gpu_node), Some(mesh)) = (cache.node(id.0), cache.mesh(node.mesh.0)) else {
                continue;
            };
            match &node.material {
                NodeMaterial::Standard(_) => {
                    rpass.set_pipeline(self.main_pipeline.pipeline());
                    rpass.set_bind_group(1, &gpu_node.scene_group, &[]);
                }
                NodeMaterial::Reflector => {
                    let (Some(pipeline), Some(group)) = (reflector, material_group) else {
                        continue;
                    };
                    rpass.set_pipeline(&pipeline.pipeline);
                    rpass.set_bind_group(1, &gpu_node.object_group, &[]);
                    rpass.set_bind_group(3, group, &[]);
                }
            }
            mesh.draw(&mut rpass);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use glam::Vec3;
    use reflector_shaders::{
        COMMON_WGSL, Hook, LIGHTING_WGSL, PBR_TEMPLATE_WGSL, ShaderComposer, Snippet, SnippetKind,
        reflector_snippets,
    };

    use super::*;
    use crate::GpuContext;
    use crate::material::PbrParams;
    use crate::scene::{Mesh, Transform};

    const SIZE: u32 = 64;
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    /// Reflector library whose depth variants reference an undefined symbol.
    fn composer_without_depth() -> ShaderComposer {
        let broken = "fn broken() -> f32 { return missing_depth; }";
        let mut snippets = reflector_snippets();
        snippets.push(
            Snippet::new(SnippetKind::DepthBinding, Hook::Module, broken)
                .requires(FeatureFlags::DEPTH),
        );
        ShaderComposer::new(format!("{COMMON_WGSL}{LIGHTING_WGSL}"), PBR_TEMPLATE_WGSL, snippets)
    }

    fn read_pixel(ctx: &GpuContext, texture: &wgpu::Texture, x: u32, y: u32) -> [u8; 4] {
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (SIZE * SIZE * 4) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder =
            ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(SIZE * 4),
                    rows_per_image: Some(SIZE),
                },
            },
            texture.size(),
        );
        ctx.queue.submit(Some(encoder.finish()));
        let slice = buffer.slice(..);
        slice.map_async(wgpu::MapMode::Read, |r| r.unwrap());
        let _ = ctx.device.poll(wgpu::Maintain::Wait);
        let data = slice.get_mapped_range();
        let i = ((y * SIZE + x) * 4) as usize;
        [data[i], data[i + 1], data[i + 2], data[i + 3]]
    }

    #[test]
    fn failed_depth_variant_falls_back_to_plain_surface() {
        let ctx = match GpuContext::headless() {
            Ok(ctx) => ctx,
            Err(e) => {
                eprintln!("skipping GPU test: {e:#}");
                return;
            }
        };
        let mut scene = Scene::new();
        let quad = scene.add_mesh(Mesh::plane(8.0, 8.0));
        let floor = scene.add_node(
            "floor",
            quad,
            Transform::from_position_euler([0.0, 0.0, 0.0], [-FRAC_PI_2, 0.0, 0.0]),
            NodeMaterial::Reflector,
        );
        let ball = scene.add_mesh(Mesh::uv_sphere(0.5, 16, 8));
        scene.add_node(
            "ball",
            ball,
            Transform::from_translation(Vec3::new(0.0, 1.0, 0.0)),
            NodeMaterial::Standard(PbrParams::emitter(Vec3::new(1.0, 0.5, 0.2), 2.0)),
        );
        let settings = ReflectorSettings {
            resolution: 64,
            mirror: 1.0,
            depth_scale: 1.0,
            ..Default::default()
        };
        let plane = ReflectivePlane::new(floor, [8.0, 8.0]);
        let (device, queue) = (ctx.device.clone(), ctx.queue.clone());
        let mut renderer =
            ReflectorRenderer::new(device, queue, FORMAT, (SIZE, SIZE), plane, &settings).unwrap();

        renderer.set_background([1.0, 0.0, 1.0]);
        renderer.reflector_pipelines.set_composer(composer_without_depth());
        let mut material = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen"),
            size: wgpu::Extent3d {
                width: SIZE,
                height: SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 45.0, 1.0);

        for _ in 0..3 {
            let outcome = renderer
                .render(&scene, &camera, &FrameParams::default(), &mut material, &view)
                .unwrap();
            assert_eq!(outcome, FrameOutcome::Disabled);
        }
        assert!(renderer.manager().is_disabled());
        assert!(!material.uniforms().has_reflection());
        assert!(renderer.reflector_pipelines.get(FeatureFlags::empty()).is_some());
        assert!(renderer.reflector_pipelines.get(FeatureFlags::DEPTH).is_none());
        // the floor under the screen centre was drawn over the clear colour
        assert_ne!(read_pixel(&ctx, &texture, SIZE / 2, SIZE / 2), [255, 0, 255, 255]);
    }
}
