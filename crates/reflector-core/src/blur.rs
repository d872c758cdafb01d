//! Separable gaussian kernel shared by the GPU blur pass and the software backend.

use glam::{Vec2, Vec4};

use crate::texture::Image;

/// Taps per direction the blur uniform can carry (centre tap included).
pub const MAX_TAPS: usize = 32;

/// Blur radii, iteration count and tap cap. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurKernelConfig {
    radius_x: f32,
    radius_y: f32,
    iterations: u32,
    max_taps: usize,
}

impl BlurKernelConfig {
    /// Radii are in target pixels; each iteration is one horizontal and one vertical pass.
    pub fn new(radii: [f32; 2], iterations: u32) -> Self {
        let sanitize = |r: f32| if r.is_finite() { r.max(0.0) } else { 0.0 };
        Self {
            radius_x: sanitize(radii[0]),
            radius_y: sanitize(radii[1]),
            iterations: iterations.max(1),
            max_taps: MAX_TAPS,
        }
    }

    pub fn with_max_taps(mut self, max_taps: usize) -> Self {
        self.max_taps = max_taps.clamp(1, MAX_TAPS);
        self
    }

    pub fn disabled() -> Self {
        Self::new([0.0, 0.0], 1)
    }

    pub fn enabled(&self) -> bool {
        self.radius_x + self.radius_y > 0.0
    }

    pub fn radii(&self) -> [f32; 2] {
        [self.radius_x, self.radius_y]
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn horizontal(&self) -> GaussianKernel {
        GaussianKernel::new(self.radius_x, self.max_taps)
    }

    pub fn vertical(&self) -> GaussianKernel {
        GaussianKernel::new(self.radius_y, self.max_taps)
    }
}

/// One-sided kernel: `weights[0]` is the centre, taps `i > 0` are applied at `±offsets[i]` pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianKernel {
    pub weights: Vec<f32>,
    pub offsets: Vec<f32>,
}

impl GaussianKernel {
    /// `radius` is treated as three standard deviations. Taps are spread
    /// evenly over the radius and rely on bilinear filtering in between.
    pub fn new(radius: f32, max_taps: usize) -> Self {
        if !(radius > 0.0) {
            return Self::identity();
        }
        let taps = ((radius.ceil() as usize) + 1).clamp(2, max_taps.clamp(2, MAX_TAPS));
        let sigma = (radius / 3.0).max(1e-3);
        let step = radius / (taps - 1) as f32;
        let mut weights = Vec::with_capacity(taps);
        let mut offsets = Vec::with_capacity(taps);
        for i in 0..taps {
            let x = i as f32 * step;
            offsets.push(x);
            weights.push((-(x * x) / (2.0 * sigma * sigma)).exp());
        }
        let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
        for w in &mut weights {
            *w /= total;
        }
        Self { weights, offsets }
    }

    pub fn identity() -> Self {
        Self { weights: vec![1.0], offsets: vec![0.0] }
    }

    pub fn tap_count(&self) -> usize {
        self.weights.len()
    }

    /// Sum over the full symmetric footprint; 1 for a normalised kernel.
    pub fn total_weight(&self) -> f32 {
        self.weights[0] + 2.0 * self.weights[1..].iter().sum::<f32>()
    }

    /// Pack into the `array<vec4<f32>, 8>` layout used by the blur uniform.
    pub fn packed(&self) -> ([[f32; 4]; 8], [[f32; 4]; 8]) {
        let mut w = [[0.0; 4]; 8];
        let mut o = [[0.0; 4]; 8];
        for (i, (wi, oi)) in self.weights.iter().zip(&self.offsets).take(MAX_TAPS).enumerate() {
            w[i / 4][i % 4] = *wi;
            o[i / 4][i % 4] = *oi;
        }
        (w, o)
    }

    /// One directional pass over `src`, sampling bilinearly like the GPU pass.
    pub fn apply(&self, src: &Image<Vec4>, dst: &mut Image<Vec4>, direction: Vec2) {
        let (w, h) = (src.width(), src.height());
        let texel = Vec2::new(1.0 / w as f32, 1.0 / h as f32);
        for y in 0..h {
            for x in 0..w {
                let uv = (Vec2::new(x as f32, y as f32) + 0.5) * texel;
                let mut color = src.sample(uv) * self.weights[0];
                for i in 1..self.tap_count() {
                    let o = direction * self.offsets[i] * texel;
                    color += (src.sample(uv + o) + src.sample(uv - o)) * self.weights[i];
                }
                dst.set(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_only_with_positive_radius_sum() {
        assert!(!BlurKernelConfig::new([0.0, 0.0], 1).enabled());
        assert!(BlurKernelConfig::new([0.0, 2.0], 1).enabled());
        assert!(!BlurKernelConfig::new([-3.0, f32::NAN], 1).enabled());
        assert_eq!(BlurKernelConfig::new([1.0, 1.0], 0).iterations(), 1);
    }

    #[test]
    fn kernel_is_normalised_and_decreasing() {
        for radius in [1.0, 4.5, 150.0, 200.0] {
            let k = GaussianKernel::new(radius, MAX_TAPS);
            assert!((k.total_weight() - 1.0).abs() < 1e-5, "radius {radius}");
            assert!(k.tap_count() <= MAX_TAPS);
            assert!(k.weights.windows(2).all(|w| w[0] >= w[1]));
            assert!((k.offsets.last().copied().unwrap() - radius).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_radius_is_identity() {
        let k = GaussianKernel::new(0.0, MAX_TAPS);
        assert_eq!(k.tap_count(), 1);
        assert_eq!(k.weights[0], 1.0);
    }

    #[test]
    fn tap_cap_is_respected() {
        let cfg = BlurKernelConfig::new([100.0, 3.0], 2).with_max_taps(8);
        assert_eq!(cfg.horizontal().tap_count(), 8);
        assert_eq!(cfg.vertical().tap_count(), 4);
    }

    #[test]
    fn packing_layout() {
        let k = GaussianKernel::new(20.0, MAX_TAPS);
        let (w, o) = k.packed();
        assert_eq!(w[0][0], k.weights[0]);
        assert_eq!(w[2][3], k.weights[11]);
        assert_eq!(o[1][1], k.offsets[5]);
    }

    #[test]
    fn blur_preserves_constant_image() {
        let src = Image::new(8, 8, Vec4::splat(0.5));
        let mut dst = Image::new(8, 8, Vec4::ZERO);
        GaussianKernel::new(3.0, MAX_TAPS).apply(&src, &mut dst, Vec2::X);
        assert!(dst.pixels().iter().all(|p| (*p - Vec4::splat(0.5)).length() < 1e-5));
    }

    #[test]
    fn blur_spreads_a_spike() {
        let mut src = Image::new(9, 1, Vec4::ZERO);
        src.set(4, 0, Vec4::ONE);
        let mut dst = Image::new(9, 1, Vec4::ZERO);
        GaussianKernel::new(2.0, MAX_TAPS).apply(&src, &mut dst, Vec2::X);
        assert!(dst.get(4, 0).x < 1.0);
        assert!(dst.get(3, 0).x > 0.0);
        assert!((dst.get(3, 0).x - dst.get(5, 0).x).abs() < 1e-6);
    }
}
