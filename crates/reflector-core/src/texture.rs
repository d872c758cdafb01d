//! CPU images: float render targets for the software backend and 8-bit map textures.

use std::path::Path;

use glam::{Vec2, Vec4};

use crate::color::srgba_u8_to_linear;

#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Copy> Image<T> {
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, v: T) {
        let w = self.width as usize;
        self.data[y as usize * w + x as usize] = v;
    }

    pub fn fill(&mut self, v: T) {
        self.data.fill(v);
    }

    pub fn pixels(&self) -> &[T] {
        &self.data
    }

    fn clamped(&self, x: i64, y: i64) -> T {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(x, y)
    }
}

impl Image<Vec4> {
    /// Bilinear sample with clamp-to-edge addressing, texel centres at half-integers.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if !uv.is_finite() {
            return self.clamped(0, 0);
        }
        // everything past one texture width reads the edge anyway; keeps texel indices small
        let uv = uv.clamp(Vec2::splat(-1.0), Vec2::splat(2.0));
        let px = uv.x * self.width as f32 - 0.5;
        let py = uv.y * self.height as f32 - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let fx = px - x0;
        let fy = py - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let a = self.clamped(x0, y0).lerp(self.clamped(x0 + 1, y0), fx);
        let b = self.clamped(x0, y0 + 1).lerp(self.clamped(x0 + 1, y0 + 1), fx);
        a.lerp(b, fy)
    }

    /// `sample(coord.xy / coord.w)`
    pub fn sample_projected(&self, coord: Vec4) -> Vec4 {
        self.sample(coord.truncate().truncate() / coord.w)
    }
}

impl Image<f32> {
    /// Nearest texel for `uv` clamped to [0, 1].
    pub fn load(&self, uv: Vec2) -> f32 {
        let uv = if uv.is_finite() { uv.clamp(Vec2::ZERO, Vec2::ONE) } else { Vec2::ZERO };
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        self.get(x, y)
    }
}

/// 8-bit RGBA texture used for material maps.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
    /// Colour data stored in sRGB; data maps (normal, roughness) are not.
    pub srgb: bool,
}

impl TextureData {
    pub fn from_fn(
        width: u32,
        height: u32,
        srgb: bool,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self { width, height, pixels, srgb }
    }

    pub fn solid(rgba: [u8; 4], srgb: bool) -> Self {
        Self::from_fn(1, 1, srgb, |_, _| rgba)
    }

    pub fn from_image(img: &image::DynamicImage, srgb: bool) -> Self {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba.pixels().map(|p| p.0).collect();
        Self { width, height, pixels, srgb }
    }

    pub fn open<P: AsRef<Path>>(path: P, srgb: bool) -> Result<Self, image::ImageError> {
        let img = image::open(path)?;
        Ok(Self::from_image(&img, srgb))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.rem_euclid(self.height as i64) as usize;
        let p = self.pixels[y * self.width as usize + x];
        if self.srgb {
            srgba_u8_to_linear(p)
        } else {
            Vec4::new(p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32) / 255.0
        }
    }

    /// Bilinear sample with repeat addressing.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if self.width == 0 || self.height == 0 || !uv.is_finite() {
            return Vec4::ZERO;
        }
        // repeat addressing is periodic in uv
        let uv = uv - uv.floor();
        let px = uv.x * self.width as f32 - 0.5;
        let py = uv.y * self.height as f32 - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let fx = px - x0;
        let fy = py - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let a = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let b = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        a.lerp(b, fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_between_texels() {
        let mut img = Image::new(2, 1, Vec4::ZERO);
        img.set(1, 0, Vec4::ONE);
        assert_eq!(img.sample(Vec2::new(0.25, 0.5)), Vec4::ZERO);
        assert_eq!(img.sample(Vec2::new(0.75, 0.5)), Vec4::ONE);
        let mid = img.sample(Vec2::new(0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 1e-6);
        // clamp-to-edge
        assert_eq!(img.sample(Vec2::new(5.0, -3.0)), Vec4::ONE);
    }

    #[test]
    fn projected_sample_divides_by_w() {
        let mut img = Image::new(2, 2, Vec4::ZERO);
        img.set(1, 1, Vec4::splat(2.0));
        let v = img.sample_projected(Vec4::new(1.5, 1.5, 0.0, 2.0));
        assert_eq!(v, Vec4::splat(2.0));
    }

    #[test]
    fn near_zero_w_clamps_to_edge() {
        let mut img = Image::new(4, 4, Vec4::ZERO);
        img.set(3, 3, Vec4::ONE);
        assert_eq!(img.sample_projected(Vec4::new(0.5, 0.5, 0.5, 1e-30)), Vec4::ONE);
        assert_eq!(img.sample(Vec2::new(f32::MAX, -f32::MAX)), Vec4::ZERO);
        assert_eq!(img.sample(Vec2::splat(-3.0e38)), Vec4::ZERO);
    }

    #[test]
    fn huge_map_coordinates_stay_in_range() {
        let tex = TextureData::solid([255, 255, 255, 255], false);
        assert_eq!(tex.sample(Vec2::new(3.0e38, -3.0e38)), Vec4::ONE);
        assert_eq!(tex.sample(Vec2::splat(1.0e20)), Vec4::ONE);
    }

    #[test]
    fn depth_load_is_nearest_and_clamped() {
        let mut depth = Image::new(4, 4, 1.0f32);
        depth.set(3, 0, 0.25);
        assert_eq!(depth.load(Vec2::new(0.9, 0.1)), 0.25);
        assert_eq!(depth.load(Vec2::new(1.5, -1.0)), 0.25);
        assert_eq!(depth.load(Vec2::new(0.1, 0.9)), 1.0);
    }

    #[test]
    fn map_sampling_wraps() {
        let tex = TextureData::from_fn(2, 1, false, |x, _| {
            if x == 0 { [0, 0, 0, 255] } else { [255, 255, 255, 255] }
        });

        assert_eq!(tex.sample(Vec2::new(0.75, 0.5)).x, 1.0);
        assert_eq!(tex.sample(Vec2::new(1.75, 0.5)).x, 1.0);
        assert_eq!(tex.sample(Vec2::new(-0.75, 0.5)).x, 0.0);
    }
}
