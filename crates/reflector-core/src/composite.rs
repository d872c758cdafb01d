//! CPU reference of the reflector fragment stage.
//!
//! `shade` follows the composed WGSL step for step: distortion, projective
//! sampling, normal-map offset, depth fade, blur mix and the final diffuse
//! blend. `shade_fragment` adds the PBR lighting and debug views on top so a
//! whole plane fragment can be evaluated without a GPU.

use glam::{Vec2, Vec3, Vec4};
use reflector_shaders::FeatureFlags;

use crate::camera::PlaneSurface;
use crate::lighting::{FrameParams, SurfacePoint, shade_pbr};
use crate::material::{DebugView, PbrParams, ReflectorMaterial};
use crate::texture::Image;

/// Lower clamp of the depth factor, also its value when depth is disabled.
pub const MIN_DEPTH_FACTOR: f32 = 1e-4;

/// Reflection targets as the composite reads them.
#[derive(Clone, Copy, Debug)]
pub struct ReflectionSamples<'a> {
    pub sharp: &'a Image<Vec4>,
    pub blurred: &'a Image<Vec4>,
    pub depth: Option<&'a Image<f32>>,
}

/// Inputs of the composite for one fragment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeFragment {
    /// Mesh uv, before `map_repeat`.
    pub uv: Vec2,
    pub reflection_coord: Vec4,
    /// Diffuse colour of the host material before blending.
    pub diffuse: Vec4,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeOutput {
    pub diffuse: Vec4,
    pub merged: Vec4,
    pub depth_factor: f32,
    pub blur_factor: f32,
    /// Roughness after the roughness map, fed on to lighting.
    pub roughness: f32,
    /// Projective coordinate after distortion.
    pub reflection_coord: Vec4,
}

/// `smoothstep` that tolerates `edge0 >= edge1` by degrading to a step.
pub fn fade_step(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge0 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Fade for a stored depth value in [0, 1]; result lies in `[MIN_DEPTH_FACTOR, 1]`.
pub fn depth_factor(depth: f32, min_threshold: f32, max_threshold: f32, depth_scale: f32) -> f32 {
    let f = fade_step(min_threshold, max_threshold, 1.0 - depth) * depth_scale;
    if f.is_nan() {
        return MIN_DEPTH_FACTOR;
    }
    f.clamp(MIN_DEPTH_FACTOR, 1.0)
}

pub fn blur_factor(mix_blur: f32, roughness: f32) -> f32 {
    (mix_blur * roughness).min(1.0)
}

/// `roughness`, scaled by the green channel of the roughness map when bound.
pub fn roughness_factor(pbr: &PbrParams, uv: Vec2) -> f32 {
    match &pbr.roughness_map {
        Some(map) => pbr.roughness * map.sample(uv).y,
        None => pbr.roughness,
    }
}

/// Blend the reflection into `fragment.diffuse`.
pub fn shade(
    material: &ReflectorMaterial,
    samples: &ReflectionSamples<'_>,
    frame: &FrameParams,
    fragment: &CompositeFragment,
) -> CompositeOutput {
    let flags = material.feature_flags();
    let u = material.uniforms();
    let pbr = &material.pbr;
    let uv = fragment.uv * pbr.map_repeat;
    let roughness = roughness_factor(pbr, uv);

    let mut coord = fragment.reflection_coord;
    if let Some(map) = material.distortion_map.as_deref() {
        let d = map.sample(uv).x * u.distortion;
        coord.x += d;
        coord.y += d;
    }

    let mut base = samples.sharp.sample_projected(coord);
    let mut blur = samples.blurred.sample_projected(coord);
    let mut normal_uv = None;

    if let Some(map) = pbr.normal_map.as_deref() {
        let texel = map.sample(uv * pbr.normal_scale);
        let n = Vec3::new(texel.x * 2.0 - 1.0, texel.z, texel.y * 2.0 - 1.0).normalize_or_zero();
        let c = coord.truncate() / coord.w;
        let offset_uv = Vec2::new(c.x, c.y) + Vec2::new(n.x, n.z) * c.z * 0.01;
        base = samples.sharp.sample(offset_uv);
        blur = samples.blurred.sample(offset_uv);
        normal_uv = Some(offset_uv);
    }

    let mut merged = base;
    let mut depth = MIN_DEPTH_FACTOR;
    let depth_target = samples.depth.filter(|_| flags.contains(FeatureFlags::DEPTH));
    if let Some(target) = depth_target {
        let depth_uv = normal_uv.unwrap_or_else(|| coord.truncate().truncate() / coord.w);
        let stored = target.load(depth_uv);

        depth = depth_factor(stored, u.min_depth_threshold, u.max_depth_threshold, u.depth_scale);
        if flags.contains(FeatureFlags::BLUR) {
            blur *= (depth + u.depth_to_blur_ratio_bias).min(1.0);
            merged *= (depth + 0.5).min(1.0);
        } else {
            merged *= depth;
        }
    }

    let mut blur_amount = 0.0;
    if flags.contains(FeatureFlags::BLUR) {
        blur_amount = blur_factor(u.mix_blur, roughness);
        merged = merged.lerp(blur, blur_amount);
    }

    let m = u.effective_mirror().min(1.0);
    let reflected = frame.reflection_encoding.decode(merged.truncate()) * u.mix_strength * m;
    let rgb = fragment.diffuse.truncate() * (1.0 - m) + reflected;

    CompositeOutput {
        diffuse: rgb.extend(fragment.diffuse.w),
        merged,
        depth_factor: depth,
        blur_factor: blur_amount,
        roughness,
        reflection_coord: coord,
    }
}

/// One point of the reflective plane as the fragment stage sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneFragment {
    pub world_pos: Vec3,
    /// Unit normal, already flipped towards the viewer.
    pub normal: Vec3,
    /// Unit world directions of increasing u and v.
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub uv: Vec2,
    pub reflection_coord: Vec4,
}

impl PlaneFragment {
    /// Fragment at `local` (plane-local XY) of a quad with the given half
    /// extents, uv laid out like [`crate::scene::Mesh::plane`].
    pub fn at(surface: &PlaneSurface, half_extents: Vec2, local: Vec2, eye: Vec3) -> Self {
        let local4 = Vec4::new(local.x, local.y, 0.0, 1.0);
        let world_pos = (surface.model * local4).truncate();
        let mut normal = surface.normal.normalize_or_zero();
        if normal.dot(eye - world_pos) < 0.0 {
            normal = -normal;
        }
        let uv = Vec2::new(
            0.5 + local.x / (2.0 * half_extents.x.max(1e-6)),
            0.5 - local.y / (2.0 * half_extents.y.max(1e-6)),
        );
        Self {
            world_pos,
            normal,
            tangent: surface.model.x_axis.truncate().normalize_or_zero(),
            bitangent: -surface.model.y_axis.truncate().normalize_or_zero(),
            uv,
            reflection_coord: Vec4::ZERO,
        }
    }

    pub fn with_texture_matrix(mut self, texture_matrix: glam::Mat4, local: Vec2) -> Self {
        self.reflection_coord = texture_matrix * Vec4::new(local.x, local.y, 0.0, 1.0);
        self
    }
}

/// Final colour of a plane fragment: composite, lighting, emissive, debug view.
///
/// Normal maps perturb the lighting normal through the plane's tangent frame.
/// Bump maps need screen-space derivatives and are left to the GPU path.
pub fn shade_fragment(
    material: &ReflectorMaterial,
    samples: &ReflectionSamples<'_>,
    frame: &FrameParams,
    fragment: &PlaneFragment,
    eye: Vec3,
) -> Vec4 {
    let pbr = &material.pbr;
    let uv = fragment.uv * pbr.map_repeat;
    let mut normal = fragment.normal;
    if let Some(map) = pbr.normal_map.as_deref() {
        let m = map.sample(uv).truncate() * 2.0 - Vec3::ONE;
        let perturbed = fragment.tangent * m.x * pbr.normal_scale.x
            + fragment.bitangent * m.y * pbr.normal_scale.y
            + fragment.normal * m.z;
        normal = perturbed.try_normalize().unwrap_or(fragment.normal);
    }

    let out = shade(
        material,
        samples,
        frame,
        &CompositeFragment {
            uv: fragment.uv,
            reflection_coord: fragment.reflection_coord,
            diffuse: pbr.base_color,
        },
    );
    let lit = shade_pbr(
        &SurfacePoint {
            albedo: out.diffuse.truncate(),
            metalness: pbr.metalness,
            roughness: out.roughness,
            normal,
            view_dir: (eye - fragment.world_pos).normalize_or_zero(),
            world_pos: fragment.world_pos,
            env_intensity: pbr.env_intensity,
        },
        frame,
    );
    let color = (lit + pbr.emissive_radiance()).extend(out.diffuse.w);
    apply_debug(material.uniforms().debug, &out, samples, frame, color)
}

/// Replace `color` by the selected debug visualisation.
pub fn apply_debug(
    view: DebugView,
    out: &CompositeOutput,
    samples: &ReflectionSamples<'_>,
    frame: &FrameParams,
    color: Vec4,
) -> Vec4 {
    let decode = |c: Vec4| frame.reflection_encoding.decode(c.truncate()).extend(1.0);
    match view {
        DebugView::Normal => color,
        DebugView::DepthFactor => Vec3::splat(out.depth_factor).extend(1.0),
        DebugView::BlurFactor => Vec3::splat(out.blur_factor).extend(1.0),
        DebugView::Sharp => decode(samples.sharp.sample_projected(out.reflection_coord)),
        DebugView::Blurred => decode(samples.blurred.sample_projected(out.reflection_coord)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{TargetHandle, TargetSlot};
    use reflector_config::ReflectorSettings;
    use std::sync::Arc;

    use crate::texture::TextureData;

    fn bound(settings: ReflectorSettings, pbr: PbrParams) -> ReflectorMaterial {
        let mut m = ReflectorMaterial::new(pbr, &settings).unwrap();
        let u = m.uniforms_mut();
        for slot in TargetSlot::ALL {
            let h = Some(TargetHandle { slot, generation: 1, resolution: 4 });
            match slot {
                TargetSlot::Sharp => u.sharp = h,
                TargetSlot::Blurred => u.blurred = h,
                TargetSlot::Depth => u.depth = h,
            }
        }
        m
    }

    fn fragment() -> CompositeFragment {
        CompositeFragment {
            uv: Vec2::splat(0.5),
            reflection_coord: Vec4::new(0.5, 0.5, 0.5, 1.0),
            diffuse: Vec4::new(0.2, 0.4, 0.6, 1.0),
        }
    }

    #[test]
    fn depth_factor_is_monotone_and_bounded() {
        let mut last = 0.0;
        for i in 0..=100 {
            let one_minus_depth = i as f32 / 100.0;
            let f = depth_factor(1.0 - one_minus_depth, 0.2, 0.8, 3.0);
            assert!((MIN_DEPTH_FACTOR..=1.0).contains(&f));
            assert!(f >= last);
            last = f;
        }
        assert_eq!(depth_factor(0.5, 0.9, 0.9, 1.0), MIN_DEPTH_FACTOR);
        assert_eq!(depth_factor(0.0, 0.9, 0.9, 1.0), 1.0);
    }

    #[test]
    fn blur_factor_limits() {
        assert_eq!(blur_factor(0.0, 1.0), 0.0);
        assert_eq!(blur_factor(5.0, 0.0), 0.0);
        assert_eq!(blur_factor(5.0, 1.0), 1.0);
        assert!((blur_factor(0.5, 0.5) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn zero_mirror_keeps_diffuse() {
        let sharp = Image::new(4, 4, Vec4::ONE);
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: None };
        let settings = ReflectorSettings {
            mirror: 0.0,
            mix_strength: 1.0,
            ..Default::default()
        };
        let m = bound(settings, PbrParams::default());
        let out = shade(&m, &samples, &FrameParams::default(), &fragment());
        assert_eq!(out.diffuse, fragment().diffuse);
    }

    #[test]
    fn full_mirror_replaces_diffuse() {
        let sharp = Image::new(4, 4, Vec4::new(0.9, 0.1, 0.1, 1.0));
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: None };
        let settings = ReflectorSettings { mirror: 1.0, mix_strength: 0.5, ..Default::default() };
        let m = bound(settings, PbrParams::default());
        let out = shade(&m, &samples, &FrameParams::default(), &fragment());
        assert!((out.diffuse - Vec4::new(0.45, 0.05, 0.05, 1.0)).length() < 1e-5);
    }

    #[test]
    fn unbound_targets_disable_the_blend() {
        let sharp = Image::new(4, 4, Vec4::ONE);
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: None };
        let settings = ReflectorSettings { mirror: 1.0, mix_strength: 1.0, ..Default::default() };
        let m = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();
        let out = shade(&m, &samples, &FrameParams::default(), &fragment());
        assert_eq!(out.diffuse, fragment().diffuse);
    }

    #[test]
    fn blur_mix_follows_roughness() {
        let sharp = Image::new(4, 4, Vec4::ZERO);
        let blurred = Image::new(4, 4, Vec4::ONE);
        let samples = ReflectionSamples { sharp: &sharp, blurred: &blurred, depth: None };
        let settings = ReflectorSettings {
            blur: [2.0, 2.0],
            mix_blur: 0.5,
            mirror: 1.0,
            ..Default::default()
        };
        let pbr = PbrParams { roughness: 0.8, ..Default::default() };
        let out = shade(&bound(settings, pbr), &samples, &FrameParams::default(), &fragment());
        assert!((out.blur_factor - 0.4).abs() < 1e-6);
        assert!((out.merged.x - 0.4).abs() < 1e-5);
    }

    #[test]
    fn roughness_map_scales_roughness() {
        let mut pbr = PbrParams { roughness: 0.5, ..Default::default() };
        pbr.roughness_map = Some(Arc::new(TextureData::solid([0, 51, 0, 255], false)));
        assert!((roughness_factor(&pbr, Vec2::ZERO) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn depth_without_blur_scales_merged() {
        let sharp = Image::new(4, 4, Vec4::ONE);
        let depth = Image::new(4, 4, 0.5f32);
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: Some(&depth) };
        let settings = ReflectorSettings {
            depth_scale: 1.0,
            min_depth_threshold: 0.0,
            max_depth_threshold: 1.0,
            mirror: 1.0,
            ..Default::default()
        };
        let m = bound(settings, PbrParams::default());
        let out = shade(&m, &samples, &FrameParams::default(), &fragment());
        assert!((out.depth_factor - 0.5).abs() < 1e-5);
        assert!((out.merged.x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn distortion_shifts_the_lookup() {
        let mut sharp = Image::new(2, 1, Vec4::ZERO);
        sharp.set(1, 0, Vec4::ONE);
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: None };
        let settings = ReflectorSettings { distortion: 0.5, mirror: 1.0, ..Default::default() };
        let m = bound(settings, PbrParams::default())
            .with_distortion_map(Arc::new(TextureData::solid([255, 0, 0, 255], false)));
        let f = CompositeFragment {
            reflection_coord: Vec4::new(0.25, 0.5, 0.5, 1.0),
            ..fragment()
        };
        let out = shade(&m, &samples, &FrameParams::default(), &f);
        assert!((out.reflection_coord.x - 0.75).abs() < 1e-6);
        assert_eq!(out.merged, Vec4::ONE);
    }

    #[test]
    fn sharp_debug_view_is_a_direct_sample() {
        let mut sharp = Image::new(4, 4, Vec4::ZERO);
        sharp.set(2, 1, Vec4::new(0.3, 0.6, 0.9, 1.0));
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: None };
        let settings = ReflectorSettings { debug: 3, mirror: 0.4, ..Default::default() };
        let m = bound(settings, PbrParams::default());
        let coord = Vec4::new(2.5 / 4.0, 1.5 / 4.0, 0.5, 1.0) * 2.0;
        let frame = FrameParams::default();
        let f = CompositeFragment { reflection_coord: coord, ..fragment() };
        let out = shade(&m, &samples, &frame, &f);
        let shown = apply_debug(DebugView::Sharp, &out, &samples, &frame, Vec4::ZERO);
        assert_eq!(shown, sharp.sample_projected(coord).truncate().extend(1.0));
    }

    #[test]
    fn normal_map_offsets_the_reflection_lookup() {
        let mut sharp = Image::new(2, 1, Vec4::ZERO);
        sharp.set(1, 0, Vec4::ONE);
        let samples = ReflectionSamples { sharp: &sharp, blurred: &sharp, depth: None };
        let settings = ReflectorSettings { mirror: 1.0, ..Default::default() };
        let f = CompositeFragment {
            reflection_coord: Vec4::new(0.25, 0.5, 50.0, 1.0),
            ..fragment()
        };

        let plain = bound(settings.clone(), PbrParams::default());
        let flat = shade(&plain, &samples, &FrameParams::default(), &f);

        assert_eq!(flat.merged, Vec4::ZERO);

        let mut pbr = PbrParams::default();
        pbr.normal_map = Some(Arc::new(TextureData::solid([255, 128, 128, 255], false)));
        let out = shade(&bound(settings, pbr), &samples, &FrameParams::default(), &f);
        // r -> x, b -> y, g -> z of the reflector normal
        let n = Vec3::new(1.0, 128.0 / 255.0, 128.0 / 255.0 * 2.0 - 1.0).normalize();
        let expected = sharp.sample(Vec2::new(0.25, 0.5) + Vec2::new(n.x, n.z) * 50.0 * 0.01);
        assert!((out.merged - expected).length() < 1e-5);
        assert!(out.merged.x > 0.5);
    }

    fn depth_and_blur_setup() -> (Image<Vec4>, Image<Vec4>, Image<f32>, ReflectorMaterial) {
        let sharp = Image::new(4, 4, Vec4::ONE);
        let blurred = Image::new(4, 4, Vec4::new(0.5, 0.5, 0.5, 1.0));
        let depth = Image::new(4, 4, 0.8f32);
        let settings = ReflectorSettings {
            blur: [2.0, 2.0],
            mix_blur: 0.5,
            depth_scale: 1.0,
            min_depth_threshold: 0.0,
            max_depth_threshold: 1.0,
            depth_to_blur_ratio_bias: 0.25,
            mirror: 1.0,
            ..Default::default()
        };
        (sharp, blurred, depth, bound(settings, PbrParams::default()))
    }

    #[test]
    fn depth_with_blur_scales_both_samples() {
        let (sharp, blurred, depth, m) = depth_and_blur_setup();
        let samples = ReflectionSamples { sharp: &sharp, blurred: &blurred, depth: Some(&depth) };
        let out = shade(&m, &samples, &FrameParams::default(), &fragment());

        // 1 - 0.8 = 0.2 through smoothstep(0, 1)
        let d = 0.2 * 0.2 * (3.0 - 2.0 * 0.2);
        assert!((out.depth_factor - d).abs() < 1e-5);
        assert!((out.blur_factor - 0.5).abs() < 1e-6);
        let base = (d + 0.5_f32).min(1.0);
        let blur = 0.5 * (d + 0.25_f32).min(1.0);
        let expected = base + (blur - base) * 0.5;
        assert!((out.merged.x - expected).abs() < 1e-5);
        // a large bias saturates the blur scale at 1
        let mut biased = m.clone();
        biased.uniforms_mut().depth_to_blur_ratio_bias = 2.0;
        let out = shade(&biased, &samples, &FrameParams::default(), &fragment());
        assert!((out.merged.x - (base + (0.5 - base) * 0.5)).abs() < 1e-5);
    }

    #[test]
    fn factor_and_blurred_debug_views() {
        let (sharp, blurred, depth, m) = depth_and_blur_setup();
        let samples = ReflectionSamples { sharp: &sharp, blurred: &blurred, depth: Some(&depth) };
        let frame = FrameParams::default();
        let out = shade(&m, &samples, &frame, &fragment());
        let lit = Vec4::new(0.3, 0.2, 0.1, 1.0);

        assert_eq!(apply_debug(DebugView::Normal, &out, &samples, &frame, lit), lit);
        assert_eq!(
            apply_debug(DebugView::DepthFactor, &out, &samples, &frame, lit),
            Vec3::splat(out.depth_factor).extend(1.0)
        );
        assert_eq!(
            apply_debug(DebugView::BlurFactor, &out, &samples, &frame, lit),
            Vec3::splat(out.blur_factor).extend(1.0)
        );
        assert_eq!(
            apply_debug(DebugView::Blurred, &out, &samples, &frame, lit),
            Vec4::new(0.5, 0.5, 0.5, 1.0)
        );
    }
}
