//! GPU checks. Each test returns early when the machine has no adapter.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::Vec3;
use reflector_config::ReflectorSettings;
use reflector_core::pipeline::{ReflectorPipelineCache, SceneLayouts};
use reflector_core::{
    Camera, FeatureFlags, FrameOutcome, FrameParams, GpuContext, GpuReflectionBackend, Mesh,
    NodeMaterial, PbrParams, ReflectionPassManager, ReflectivePlane, ReflectorMaterial,
    ReflectorRenderer, Scene, TargetSlot, Transform, wgpu,
};

fn context() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e:#}");
            None
        }
    }
}

fn offscreen(ctx: &GpuContext, format: wgpu::TextureFormat) -> wgpu::TextureView {
    ctx.device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen"),
            size: wgpu::Extent3d {
                width: 64,
                height: 64,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn floor_scene() -> (Scene, ReflectivePlane) {
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
    (scene, ReflectivePlane::new(floor, [8.0, 8.0]))
}

#[test]
fn every_feature_variant_compiles() {
    let Some(ctx) = context() else { return };
    let layouts = Arc::new(SceneLayouts::new(&ctx.device));
    let format = wgpu::TextureFormat::Bgra8UnormSrgb;
    let mut cache = ReflectorPipelineCache::new(ctx.device.clone(), layouts, format);
    for bits in 0..=FeatureFlags::all().bits() {
        let Some(flags) = FeatureFlags::from_bits(bits) else { continue };
        if let Err(e) = cache.get_or_create(flags) {
            panic!("variant {flags:?} failed: {e}");
        }
    }
    assert_eq!(cache.len(), 64);
}

#[test]
fn gpu_backend_renders_reflections() {
    let Some(ctx) = context() else { return };
    let (scene, plane) = floor_scene();
    let settings = ReflectorSettings {
        resolution: 128,
        mirror: 1.0,
        blur: [8.0, 8.0],
        depth_scale: 1.0,
        ..Default::default()
    };
    let backend = GpuReflectionBackend::new(ctx.device.clone(), ctx.queue.clone());
    let mut manager = ReflectionPassManager::new(backend, plane, &settings).unwrap();
    let mut material = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();
    let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 45.0, 1.0);

    for _ in 0..2 {
        manager.begin_frame().unwrap();
        manager.backend_mut().sync_scene(&scene, &FrameParams::default());
        let frame = FrameParams::default();
        let outcome = manager.update(&scene, &camera, &frame, &mut material).unwrap();

        manager.end_frame().unwrap();
        assert_eq!(outcome, FrameOutcome::Rendered);
    }
    assert!(!manager.is_disabled());
    let sharp = manager.handle(TargetSlot::Sharp).unwrap();
    let texture = manager.target(sharp).unwrap();
    assert_eq!(texture.texture.width(), 128);
    assert!(material.feature_flags().contains(FeatureFlags::BLUR | FeatureFlags::DEPTH));
}

#[test]
fn renderer_draws_into_offscreen_target() {
    let Some(ctx) = context() else { return };
    let (scene, plane) = floor_scene();
    let settings = ReflectorSettings { resolution: 64, mirror: 0.8, ..Default::default() };
    let format = wgpu::TextureFormat::Rgba8UnormSrgb;
    let (device, queue) = (ctx.device.clone(), ctx.queue.clone());
    let mut renderer =
        ReflectorRenderer::new(device, queue, format, (64, 64), plane, &settings).unwrap();
    let mut material = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();
    let target = offscreen(&ctx, format);
    let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 45.0, 1.0);

    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let outcome = renderer
        .render(&scene, &camera, &FrameParams::default(), &mut material, &target)
        .unwrap();
    let error = pollster::block_on(ctx.device.pop_error_scope());
    assert!(error.is_none(), "validation error: {error:?}");
    assert_eq!(outcome, FrameOutcome::Rendered);
    assert_eq!(renderer.compiled_variants(), 1);
    assert!(!material.is_dirty());
}

#[test]
fn renderer_samples_reflection_depth() {
    let Some(ctx) = context() else { return };
    let (scene, plane) = floor_scene();
    let settings = ReflectorSettings {
        resolution: 64,
        mirror: 1.0,
        depth_scale: 1.0,
        ..Default::default()
    };
    let format = wgpu::TextureFormat::Rgba8UnormSrgb;
    let (device, queue) = (ctx.device.clone(), ctx.queue.clone());
    let mut renderer =
        ReflectorRenderer::new(device, queue, format, (64, 64), plane, &settings).unwrap();
    let mut material = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();
    let target = offscreen(&ctx, format);
    let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 45.0, 1.0);

    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    for _ in 0..3 {
        let outcome = renderer
            .render(&scene, &camera, &FrameParams::default(), &mut material, &target)
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Rendered);
    }
    let error = pollster::block_on(ctx.device.pop_error_scope());
    assert!(error.is_none(), "validation error: {error:?}");
    assert!(material.feature_flags().contains(FeatureFlags::DEPTH));
    assert!(!renderer.manager().is_disabled());
}
