//! Standard PBR parameters and the reflector material built on top of them.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use reflector_config::ReflectorSettings;
use reflector_shaders::FeatureFlags;

use crate::error::{ReflectorError, Result};
use crate::targets::TargetHandle;
use crate::texture::TextureData;

/// Standard metallic-roughness surface. Colours are linear.
#[derive(Clone, Debug)]
pub struct PbrParams {
    pub base_color: Vec4,
    pub metalness: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub env_intensity: f32,
    /// Green channel scales roughness.
    pub roughness_map: Option<Arc<TextureData>>,
    pub normal_map: Option<Arc<TextureData>>,
    pub normal_scale: Vec2,
    pub bump_map: Option<Arc<TextureData>>,
    pub bump_scale: f32,
    /// UV multiplier applied to every map.
    pub map_repeat: Vec2,
}

impl Default for PbrParams {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metalness: 0.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            env_intensity: 1.0,
            roughness_map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            bump_map: None,
            bump_scale: 1.0,
            map_repeat: Vec2::ONE,
        }
    }
}

impl PbrParams {
    pub fn from_color(base_color: Vec3) -> Self {
        Self { base_color: base_color.extend(1.0), ..Default::default() }
    }

    /// Unlit-looking emitter: black base, emissive `color * intensity`.
    pub fn emitter(color: Vec3, intensity: f32) -> Self {
        Self {
            base_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            emissive: color,
            emissive_intensity: intensity,
            env_intensity: 0.0,
            ..Default::default()
        }
    }

    pub fn emissive_radiance(&self) -> Vec3 {
        self.emissive * self.emissive_intensity
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DebugView {
    #[default]
    Normal = 0,
    DepthFactor = 1,
    BlurFactor = 2,
    Sharp = 3,
    Blurred = 4,
}

impl TryFrom<u32> for DebugView {
    type Error = ReflectorError;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            0 => Ok(DebugView::Normal),
            1 => Ok(DebugView::DepthFactor),
            2 => Ok(DebugView::BlurFactor),
            3 => Ok(DebugView::Sharp),
            4 => Ok(DebugView::Blurred),
            other => Err(ReflectorError::InvalidDebugView(other)),
        }
    }
}

/// Every numeric composite parameter plus the texture matrix and target handles.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialUniformSet {
    /// Object space to projective texture space of the mirrored camera.
    pub texture_matrix: Mat4,
    pub mirror: f32,
    pub mix_blur: f32,
    pub mix_strength: f32,
    pub min_depth_threshold: f32,
    pub max_depth_threshold: f32,
    pub depth_scale: f32,
    pub depth_to_blur_ratio_bias: f32,
    pub distortion: f32,
    pub debug: DebugView,
    /// Fixed when the material is built; toggling selects another shader variant.
    pub has_blur: bool,
    pub use_depth: bool,
    pub sharp: Option<TargetHandle>,
    pub blurred: Option<TargetHandle>,
    pub depth: Option<TargetHandle>,
}

impl MaterialUniformSet {
    pub fn from_settings(settings: &ReflectorSettings) -> Result<Self> {
        settings.validate().map_err(ReflectorError::Config)?;
        Ok(Self {
            texture_matrix: Mat4::IDENTITY,
            mirror: settings.mirror,
            mix_blur: settings.mix_blur,
            mix_strength: settings.mix_strength,
            min_depth_threshold: settings.min_depth_threshold,
            max_depth_threshold: settings.max_depth_threshold,
            depth_scale: settings.depth_scale,
            depth_to_blur_ratio_bias: settings.depth_to_blur_ratio_bias,
            distortion: settings.distortion,
            debug: DebugView::try_from(settings.debug)?,
            has_blur: settings.blur[0] + settings.blur[1] > 0.0,
            use_depth: settings.depth_scale > 0.0,
            sharp: None,
            blurred: None,
            depth: None,
        })
    }

    /// Whether reflection targets are bound at all.
    pub fn has_reflection(&self) -> bool {
        self.sharp.is_some() && self.blurred.is_some()
    }

    /// Mirror strength actually applied: zero while no targets are bound.
    pub fn effective_mirror(&self) -> f32 {
        if self.has_reflection() { self.mirror } else { 0.0 }
    }

    pub fn clear_targets(&mut self) {
        self.sharp = None;
        self.blurred = None;
        self.depth = None;
    }
}

/// PBR material extended with the planar reflection composite.
#[derive(Clone, Debug)]
pub struct ReflectorMaterial {
    pub pbr: PbrParams,
    pub distortion_map: Option<Arc<TextureData>>,
    uniforms: MaterialUniformSet,
    dirty: bool,
}

impl ReflectorMaterial {
    pub fn new(pbr: PbrParams, settings: &ReflectorSettings) -> Result<Self> {
        Ok(Self {
            pbr,
            distortion_map: None,
            uniforms: MaterialUniformSet::from_settings(settings)?,
            dirty: true,
        })
    }

    pub fn with_distortion_map(mut self, map: Arc<TextureData>) -> Self {
        self.distortion_map = Some(map);
        self
    }

    pub fn uniforms(&self) -> &MaterialUniformSet {
        &self.uniforms
    }

    /// Mutable access; marks the GPU copy stale.
    pub fn uniforms_mut(&mut self) -> &mut MaterialUniformSet {
        self.dirty = true;
        &mut self.uniforms
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the dirty flag and clears it.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn set_debug_view(&mut self, v: u32) -> Result<()> {
        let view = DebugView::try_from(v)?;
        self.uniforms_mut().debug = view;
        Ok(())
    }

    /// Features of the shader variant this material needs right now. Map flags
    /// follow bound maps; depth and blur also need their targets.
    pub fn feature_flags(&self) -> FeatureFlags {
        let mut flags = FeatureFlags::empty();
        flags.set(FeatureFlags::DISTORTION_MAP, self.distortion_map.is_some());
        flags.set(FeatureFlags::NORMAL_MAP, self.pbr.normal_map.is_some());
        flags.set(FeatureFlags::ROUGHNESS_MAP, self.pbr.roughness_map.is_some());
        flags.set(FeatureFlags::BUMP_MAP, self.pbr.bump_map.is_some());
        let u = &self.uniforms;
        flags.set(FeatureFlags::DEPTH, u.use_depth && u.depth.is_some() && u.has_reflection());
        flags.set(FeatureFlags::BLUR, u.has_blur && u.has_reflection());
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::TargetSlot;

    fn handle(slot: TargetSlot) -> TargetHandle {
        TargetHandle { slot, generation: 1, resolution: 256 }
    }

    #[test]
    fn debug_view_range() {
        assert_eq!(DebugView::try_from(3).unwrap(), DebugView::Sharp);
        assert!(matches!(DebugView::try_from(5), Err(ReflectorError::InvalidDebugView(5))));
    }

    #[test]
    fn settings_validation_surfaces_as_config_error() {
        let settings = ReflectorSettings { resolution: 0, ..Default::default() };
        assert!(matches!(
            ReflectorMaterial::new(PbrParams::default(), &settings),
            Err(ReflectorError::Config(_))
        ));
    }

    #[test]
    fn dirty_flag_round_trip() {
        let settings = ReflectorSettings::default();
        let mut m = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();

        assert!(m.take_dirty());
        assert!(!m.is_dirty());
        m.uniforms_mut().mirror = 0.5;
        assert!(m.is_dirty());
        assert!(m.take_dirty());
        assert!(!m.take_dirty());
    }

    #[test]
    fn blur_and_depth_flags_need_targets() {
        let settings = ReflectorSettings {
            blur: [10.0, 10.0],
            depth_scale: 2.0,
            ..Default::default()
        };
        let mut m = ReflectorMaterial::new(PbrParams::default(), &settings).unwrap();
        assert_eq!(m.feature_flags(), FeatureFlags::empty());

        let u = m.uniforms_mut();
        u.sharp = Some(handle(TargetSlot::Sharp));
        u.blurred = Some(handle(TargetSlot::Blurred));
        u.depth = Some(handle(TargetSlot::Depth));
        assert_eq!(m.feature_flags(), FeatureFlags::BLUR | FeatureFlags::DEPTH);

        // numeric changes never alter the variant
        m.uniforms_mut().depth_scale = 0.0;
        m.uniforms_mut().mix_blur = 0.0;
        assert_eq!(m.feature_flags(), FeatureFlags::BLUR | FeatureFlags::DEPTH);

        m.uniforms_mut().clear_targets();
        assert_eq!(m.feature_flags(), FeatureFlags::empty());
        assert_eq!(m.uniforms().effective_mirror(), 0.0);
    }

    #[test]
    fn map_flags_follow_bound_maps() {
        let map = Arc::new(TextureData::solid([128, 128, 255, 255], false));
        let mut pbr = PbrParams::default();
        pbr.normal_map = Some(map.clone());
        pbr.bump_map = Some(map.clone());
        let m = ReflectorMaterial::new(pbr, &ReflectorSettings::default())
            .unwrap()
            .with_distortion_map(map);
        assert_eq!(
            m.feature_flags(),
            FeatureFlags::NORMAL_MAP | FeatureFlags::BUMP_MAP | FeatureFlags::DISTORTION_MAP
        );
    }
}
