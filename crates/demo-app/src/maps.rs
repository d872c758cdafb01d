//! Floor maps: image files when configured, procedural stand-ins otherwise.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use log::info;
use reflector_config::DemoSettings;
use reflector_core::TextureData;

const SIZE: u32 = 256;

pub struct FloorMaps {
    pub roughness: Arc<TextureData>,
    pub normal: Arc<TextureData>,
    pub distortion: Arc<TextureData>,
}

impl FloorMaps {
    pub fn load(demo: &DemoSettings) -> Result<Self> {
        let roughness = load_or(demo.roughness_map.as_deref(), procedural_roughness)?;
        let normal = load_or(demo.normal_map.as_deref(), procedural_normal)?;
        // the roughness imperfections double as ripples unless told otherwise
        let distortion = match demo.distortion_map.as_deref() {
            Some(path) => load_or(Some(path), procedural_roughness)?,
            None => roughness.clone(),
        };
        Ok(Self { roughness, normal, distortion })
    }
}

fn load_or(path: Option<&Path>, fallback: fn() -> RgbaImage) -> Result<Arc<TextureData>> {
    let data = match path {
        Some(path) => {
            info!("loading map {}", path.display());
            TextureData::open(path, false)
                .with_context(|| format!("failed to load map {}", path.display()))?

        }
        None => TextureData::from_image(&DynamicImage::ImageRgba8(fallback()), false),
    };
    Ok(Arc::new(data))
}

fn hash(x: u32, y: u32) -> f32 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as f32 / u32::MAX as f32
}

/// Tileable value noise with `cells` lattice cells per side.
fn value_noise(x: f32, y: f32, cells: u32) -> f32 {
    let (fx, fy) = (x * cells as f32, y * cells as f32);
    let (ix, iy) = (fx.floor() as u32, fy.floor() as u32);
    let (tx, ty) = (fx.fract(), fy.fract());
    let (sx, sy) = (tx * tx * (3.0 - 2.0 * tx), ty * ty * (3.0 - 2.0 * ty));
    let at = |dx: u32, dy: u32| hash((ix + dx) % cells, (iy + dy) % cells);
    let top = at(0, 0) + (at(1, 0) - at(0, 0)) * sx;
    let bottom = at(0, 1) + (at(1, 1) - at(0, 1)) * sx;
    top + (bottom - top) * sy
}

fn imperfections(u: f32, v: f32) -> f32 {
    0.55 * value_noise(u, v, 8) + 0.3 * value_noise(u, v, 32) + 0.15 * value_noise(u, v, 64)
}

fn procedural_roughness() -> RgbaImage {
    RgbaImage::from_fn(SIZE, SIZE, |x, y| {
        let n = imperfections(x as f32 / SIZE as f32, y as f32 / SIZE as f32);
        let g = (n.clamp(0.0, 1.0) * 255.0) as u8;
        Rgba([g, g, g, 255])
    })
}

/// Normals from the central differences of the imperfection height field.
fn procedural_normal() -> RgbaImage {
    let step = 1.0 / SIZE as f32;
    RgbaImage::from_fn(SIZE, SIZE, |x, y| {
        let (u, v) = (x as f32 * step, y as f32 * step);
        let dx = imperfections((u + step).fract(), v) - imperfections((u - step + 1.0).fract(), v);
        let dy = imperfections(u, (v + step).fract()) - imperfections(u, (v - step + 1.0).fract());
        let n = glam::Vec3::new(-dx * 4.0, -dy * 4.0, 1.0).normalize();
        let enc = |c: f32| ((c * 0.5 + 0.5) * 255.0) as u8;
        Rgba([enc(n.x), enc(n.y), enc(n.z), 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_tileable_and_bounded() {
        for i in 0..32 {
            let t = i as f32 / 32.0;
            let n = imperfections(t, 0.3);
            assert!((0.0..=1.0).contains(&n));
            assert!((value_noise(0.0, t, 8) - value_noise(1.0 - 1e-6, t, 8)).abs() < 0.05);
        }
    }

    #[test]
    fn procedural_normals_point_up() {
        let img = procedural_normal();
        assert!(img.pixels().all(|p| p[2] > 128));
    }
}
