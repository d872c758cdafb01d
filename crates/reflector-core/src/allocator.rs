use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

#[derive(Debug)]
pub struct OwnedTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub key: TexKey,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TexKey {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TexKey {
    pub fn square(side: u32, format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> Self {
        Self { width: side, height: side, format, usage }
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width.max(1),
            height: self.height.max(1),
            depth_or_array_layers: 1,
        }
    }
}

/// Texture allocator with pooling of released textures by key.
///
/// The reflection targets are allocated directly; transient textures such as
/// the blur scratch target go back to the pool when the pass is recorded.
pub struct RenderAllocator {
    device: Arc<wgpu::Device>,
    texture_pool: HashMap<TexKey, Vec<wgpu::Texture>>,
}

impl RenderAllocator {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self { device, texture_pool: HashMap::new() }
    }

    pub fn allocate_texture(&mut self, key: TexKey, label: &str) -> OwnedTexture {
        let entry = self.texture_pool.entry(key).or_default();
        let texture = entry.pop().unwrap_or_else(|| {
            debug!(
                "allocator: new {}x{} {:?} texture ({label})",
                key.width, key.height, key.format
            );

            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: key.extent(),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: key.format,
                usage: key.usage,
                view_formats: &[],
            })
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        OwnedTexture { texture, view, key }
    }

    pub fn release_texture(&mut self, tex: OwnedTexture) {
        self.texture_pool.entry(tex.key).or_default().push(tex.texture);
    }

    /// Destroy pooled textures whose size no longer matches `side`.
    pub fn retain_side(&mut self, side: u32) {
        self.texture_pool.retain(|key, textures| {
            let keep = key.width == side && key.height == side;
            if !keep {
                for t in textures.drain(..) {
                    t.destroy();
                }
            }
            keep
        });
    }

    pub fn pooled_textures(&self) -> usize {
        self.texture_pool.values().map(Vec::len).sum()
    }
}
