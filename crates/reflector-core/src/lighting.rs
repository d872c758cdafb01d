//! Frame-level lighting inputs and the CPU copy of the PBR lighting function.

use glam::Vec3;

use crate::color::srgb_to_linear;

/// Upper bound on lights uploaded per frame.
pub const MAX_LIGHTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    /// `direction` is the direction light travels.
    Directional { direction: Vec3, color: Vec3, intensity: f32 },
    /// `range == 0` means no falloff.
    Point { position: Vec3, color: Vec3, intensity: f32, range: f32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorEncoding {
    #[default]
    Linear,
    Srgb,
}

impl ColorEncoding {
    pub fn as_u32(self) -> u32 {
        match self {
            ColorEncoding::Linear => 0,
            ColorEncoding::Srgb => 1,
        }
    }

    /// Convert a colour read from a reflection target to linear.
    pub fn decode(self, c: Vec3) -> Vec3 {
        match self {
            ColorEncoding::Linear => c,
            ColorEncoding::Srgb => srgb_to_linear(c.to_array()),
        }
    }
}

/// Ambient light, environment and lights, passed explicitly to every pass.
#[derive(Clone, Debug)]
pub struct FrameParams {
    pub ambient: Vec3,
    pub environment: Vec3,
    pub lights: Vec<Light>,
    /// Encoding of colours stored in the reflection targets.
    pub reflection_encoding: ColorEncoding,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            ambient: Vec3::ZERO,
            environment: Vec3::ONE,
            lights: Vec::new(),
            reflection_encoding: ColorEncoding::Linear,
        }
    }
}

/// Surface terms fed to [`shade_pbr`].
#[derive(Clone, Copy, Debug)]
pub struct SurfacePoint {
    pub albedo: Vec3,
    pub metalness: f32,
    pub roughness: f32,
    pub normal: Vec3,
    pub view_dir: Vec3,
    pub world_pos: Vec3,
    pub env_intensity: f32,
}

const PI: f32 = std::f32::consts::PI;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * d * d).max(1e-6)
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    gv * gl
}

fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// Cook-Torrance + Lambert over at most [`MAX_LIGHTS`] lights. Matches `shade_pbr` in WGSL.
pub fn shade_pbr(s: &SurfacePoint, frame: &FrameParams) -> Vec3 {
    let rough = s.roughness.clamp(0.04, 1.0);
    let f0 = Vec3::splat(0.04).lerp(s.albedo, s.metalness);
    let diffuse_color = s.albedo * (1.0 - s.metalness);
    let n_dot_v = s.normal.dot(s.view_dir).max(1e-4);
    let mut color = (frame.ambient + frame.environment * s.env_intensity) * diffuse_color;

    for light in frame.lights.iter().take(MAX_LIGHTS) {
        let (l, radiance, attenuation) = match *light {
            Light::Directional { direction, color, intensity } => {
                (-direction.normalize_or_zero(), color * intensity, 1.0)
            }
            Light::Point { position, color, intensity, range } => {
                let to_light = position - s.world_pos;
                let dist = to_light.length();
                let mut attenuation = 1.0;
                if range > 0.0 {
                    let falloff = (1.0 - dist / range).clamp(0.0, 1.0);
                    attenuation = falloff * falloff;
                }
                (to_light / dist.max(1e-4), color * intensity, attenuation)
            }
        };
        let h = (s.view_dir + l).normalize_or_zero();
        let n_dot_l = s.normal.dot(l).max(0.0);
        let n_dot_h = s.normal.dot(h).max(0.0);
        let v_dot_h = s.view_dir.dot(h).max(0.0);
        let f = fresnel_schlick(v_dot_h, f0);
        let d = distribution_ggx(n_dot_h, rough);
        let g = geometry_smith(n_dot_v, n_dot_l, rough);
        let specular = d * g * f / (4.0 * n_dot_v * n_dot_l).max(1e-4);
        let kd = Vec3::ONE - f;
        color += (kd * diffuse_color + specular * PI) * radiance * n_dot_l * attenuation;
    }
    color
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(albedo: Vec3) -> SurfacePoint {
        SurfacePoint {
            albedo,
            metalness: 0.0,
            roughness: 1.0,
            normal: Vec3::Y,
            view_dir: Vec3::Y,
            world_pos: Vec3::ZERO,
            env_intensity: 1.0,
        }
    }

    #[test]
    fn ambient_only() {
        let frame = FrameParams {
            ambient: Vec3::splat(0.1),
            environment: Vec3::ZERO,
            ..Default::default()
        };
        let c = shade_pbr(&point(Vec3::ONE), &frame);
        assert!((c - Vec3::splat(0.1)).length() < 1e-6);
    }

    #[test]
    fn environment_scaled_by_intensity() {
        let frame = FrameParams { environment: Vec3::splat(0.5), ..Default::default() };
        let mut s = point(Vec3::ONE);
        s.env_intensity = 0.2;
        let c = shade_pbr(&s, &frame);
        assert!((c - Vec3::splat(0.1)).length() < 1e-6);
    }

    #[test]
    fn light_from_behind_contributes_nothing() {
        let frame = FrameParams {
            environment: Vec3::ZERO,
            lights: vec![Light::Directional {
                direction: Vec3::Y,
                color: Vec3::ONE,
                intensity: 3.0,
            }],
            ..Default::default()
        };
        assert_eq!(shade_pbr(&point(Vec3::ONE), &frame), Vec3::ZERO);
    }

    #[test]
    fn point_light_out_of_range() {
        let frame = FrameParams {
            environment: Vec3::ZERO,
            lights: vec![Light::Point {
                position: Vec3::new(0.0, 5.0, 0.0),
                color: Vec3::ONE,
                intensity: 1.0,
                range: 2.0,
            }],
            ..Default::default()
        };
        assert_eq!(shade_pbr(&point(Vec3::ONE), &frame), Vec3::ZERO);
    }

    #[test]
    fn overhead_light_brightens_surface() {
        let frame = FrameParams {
            environment: Vec3::ZERO,
            lights: vec![Light::Directional {
                direction: Vec3::NEG_Y,
                color: Vec3::ONE,
                intensity: 1.0,
            }],

            ..Default::default()
        };
        let c = shade_pbr(&point(Vec3::splat(0.5)), &frame);
        assert!(c.x > 0.0 && c.x.is_finite());
    }

    #[test]
    fn srgb_decode() {
        let c = ColorEncoding::Srgb.decode(Vec3::new(0.0, 0.5, 1.0));
        assert!(c.x.abs() < 1e-6);
        assert!((c.y - 0.214).abs() < 1e-3);
        assert!((c.z - 1.0).abs() < 1e-6);
        assert_eq!(ColorEncoding::Linear.decode(Vec3::splat(0.5)), Vec3::splat(0.5));
    }
}
