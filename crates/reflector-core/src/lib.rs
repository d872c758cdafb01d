//! reflector-core: planar reflection passes and the composite reflector material.

use std::sync::Arc;

use anyhow::{Context, Result};

/// Re-export wgpu and glam so downstream crates build against the same versions.
pub use glam;
pub use wgpu;

mod allocator;
pub mod blur;
pub mod camera;
pub mod color;
pub mod composite;
mod error;
mod gpu_backend;
pub mod lighting;
pub mod material;
pub mod math;
mod pass_manager;
pub mod pipeline;
mod renderer;
pub mod scene;
mod software;
pub mod targets;
pub mod texture;
pub mod uniforms;
pub mod upload;

pub use allocator::{OwnedTexture, RenderAllocator, TexKey};
pub use blur::{BlurKernelConfig, GaussianKernel};
pub use camera::{Camera, ClipState, FallbackReason, MirroredCamera, PlaneSurface, ReflectivePlane};
pub use error::{ReflectorError, Result as ReflectorResult};
pub use gpu_backend::GpuReflectionBackend;
pub use lighting::{ColorEncoding, FrameParams, Light};
pub use material::{DebugView, MaterialUniformSet, PbrParams, ReflectorMaterial};
pub use pass_manager::{FrameOutcome, ReflectionBackend, ReflectionPassManager, ScenePass};
pub use reflector_shaders::FeatureFlags;
pub use renderer::ReflectorRenderer;
pub use scene::{Mesh, MeshId, NodeId, NodeMaterial, Scene, SceneNode, Transform, Vertex};
pub use software::{SoftwareBackend, SoftwareTarget};
pub use targets::{TargetHandle, TargetSet, TargetSlot};
pub use texture::{Image, TextureData};

/// Device and queue shared by the renderer and its reflection backend.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Open a device without a surface. Fails when no adapter is available.
    pub fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("no suitable GPU adapter")?;
        Self::request(&adapter)
    }

    /// Open a device on an adapter chosen by the caller.
    pub fn request(adapter: &wgpu::Adapter) -> Result<Self> {
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("reflector-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            },
            None,
        ))
        .context("failed to request device")?;
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

/// Choose an sRGB surface format when available; otherwise, pick the first format.
pub fn choose_srgb_surface_format(
    adapter: &wgpu::Adapter,
    surface: &wgpu::Surface,
) -> Option<wgpu::TextureFormat> {
    let caps = surface.get_capabilities(adapter);
    caps.formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first().copied())
}

/// Create a surface configuration for the given size. With `vsync` FIFO is
/// used, otherwise Mailbox or Immediate when the surface offers them.
pub fn make_surface_config(
    adapter: &wgpu::Adapter,
    surface: &wgpu::Surface,
    width: u32,
    height: u32,
    vsync: bool,
) -> Result<wgpu::SurfaceConfiguration> {
    let caps = surface.get_capabilities(adapter);
    let format =
        choose_srgb_surface_format(adapter, surface).context("surface reports no formats")?;

    let wanted: &[wgpu::PresentMode] = if vsync {
        &[wgpu::PresentMode::Fifo]
    } else {
        &[wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate, wgpu::PresentMode::Fifo]
    };
    let present_mode = wanted
        .iter()
        .copied()
        .find(|m| caps.present_modes.contains(m))
        .unwrap_or(wgpu::PresentMode::Fifo);
    let alpha_mode = caps
        .alpha_modes
        .iter()
        .copied()
        .find(|m| *m == wgpu::CompositeAlphaMode::Opaque)
        .or_else(|| caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);
    Ok(wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 1,
    })
}
