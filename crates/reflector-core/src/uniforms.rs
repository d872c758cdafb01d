//! `#[repr(C)]` mirrors of the WGSL uniform structs.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::blur::GaussianKernel;
use crate::lighting::{FrameParams, Light, MAX_LIGHTS};
use crate::material::{MaterialUniformSet, PbrParams};
use crate::scene::normal_matrix;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl CameraUniform {
    pub fn new(view_proj: Mat4, position: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            position: position.extend(1.0).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
}

impl ObjectUniform {
    pub fn new(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal_matrix: normal_matrix(model).to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SurfaceUniform {
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
    pub metalness: f32,
    pub roughness: f32,
    pub env_intensity: f32,
    pub bump_scale: f32,
    pub normal_scale: [f32; 2],
    pub map_repeat: [f32; 2],
}

impl From<&PbrParams> for SurfaceUniform {
    fn from(p: &PbrParams) -> Self {
        Self {
            base_color: p.base_color.to_array(),
            emissive: p.emissive_radiance().extend(0.0).to_array(),
            metalness: p.metalness,
            roughness: p.roughness,
            env_intensity: p.env_intensity,
            bump_scale: p.bump_scale,
            normal_scale: p.normal_scale.to_array(),
            map_repeat: p.map_repeat.to_array(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightUniform {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

impl From<&Light> for LightUniform {
    fn from(light: &Light) -> Self {
        match *light {
            Light::Directional { direction, color, intensity } => Self {
                position: direction.extend(0.0).to_array(),
                color: (color * intensity).extend(0.0).to_array(),
            },
            Light::Point { position, color, intensity, range } => Self {
                position: position.extend(1.0).to_array(),
                color: (color * intensity).extend(range.max(0.0)).to_array(),
            },
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniform {
    pub ambient: [f32; 4],
    pub environment: [f32; 4],
    pub lights: [LightUniform; MAX_LIGHTS],
    pub light_count: u32,
    pub reflection_encoding: u32,
    pub _pad: [u32; 2],
}

impl From<&FrameParams> for FrameUniform {
    fn from(f: &FrameParams) -> Self {
        let mut lights = [LightUniform::default(); MAX_LIGHTS];
        let mut count = 0;
        for (slot, light) in lights.iter_mut().zip(&f.lights) {
            *slot = light.into();
            count += 1;
        }
        Self {
            ambient: f.ambient.extend(0.0).to_array(),
            environment: f.environment.extend(0.0).to_array(),
            lights,
            light_count: count,
            reflection_encoding: f.reflection_encoding.as_u32(),
            _pad: [0; 2],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ReflectorUniform {
    pub texture_matrix: [[f32; 4]; 4],
    pub mirror: f32,
    pub mix_blur: f32,
    pub mix_strength: f32,
    pub min_depth_threshold: f32,
    pub max_depth_threshold: f32,
    pub depth_scale: f32,
    pub depth_to_blur_ratio_bias: f32,
    pub distortion: f32,
    pub debug_view: u32,
    pub _pad: [u32; 3],
}

impl From<&MaterialUniformSet> for ReflectorUniform {
    fn from(u: &MaterialUniformSet) -> Self {
        Self {
            texture_matrix: u.texture_matrix.to_cols_array_2d(),
            mirror: u.effective_mirror(),
            mix_blur: u.mix_blur,
            mix_strength: u.mix_strength,
            min_depth_threshold: u.min_depth_threshold,
            max_depth_threshold: u.max_depth_threshold,
            depth_scale: u.depth_scale,
            depth_to_blur_ratio_bias: u.depth_to_blur_ratio_bias,
            distortion: u.distortion,
            debug_view: u.debug as u32,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BlurUniform {
    pub direction: [f32; 2],
    pub texel: [f32; 2],
    pub tap_count: u32,
    pub _pad: [u32; 3],
    pub weights: [[f32; 4]; 8],
    pub offsets: [[f32; 4]; 8],
}

impl BlurUniform {
    pub fn new(kernel: &GaussianKernel, direction: [f32; 2], resolution: u32) -> Self {
        let (weights, offsets) = kernel.packed();
        let texel = 1.0 / resolution.max(1) as f32;
        Self {
            direction,
            texel: [texel, texel],
            tap_count: kernel.tap_count() as u32,
            _pad: [0; 3],
            weights,
            offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lighting::ColorEncoding;

    #[test]
    fn sizes_match_wgsl_layouts() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 80);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 128);
        assert_eq!(std::mem::size_of::<SurfaceUniform>(), 64);
        assert_eq!(std::mem::size_of::<LightUniform>(), 32);
        assert_eq!(std::mem::size_of::<FrameUniform>(), 176);
        assert_eq!(std::mem::size_of::<ReflectorUniform>(), 112);
        assert_eq!(std::mem::size_of::<BlurUniform>(), 288);
    }

    #[test]
    fn frame_uniform_caps_lights() {
        let light = Light::Point {
            position: Vec3::Y,
            color: Vec3::ONE,
            intensity: 2.0,
            range: 5.0,
        };

        let frame = FrameParams {
            lights: vec![light; 6],
            reflection_encoding: ColorEncoding::Srgb,
            ..Default::default()
        };
        let u = FrameUniform::from(&frame);
        assert_eq!(u.light_count, MAX_LIGHTS as u32);
        assert_eq!(u.reflection_encoding, 1);
        assert_eq!(u.lights[0].position, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(u.lights[0].color, [2.0, 2.0, 2.0, 5.0]);
    }
}
