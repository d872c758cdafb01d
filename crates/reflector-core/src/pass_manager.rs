//! Per-frame reflection passes: mirrored camera, sharp render, blur chain and
//! the texture matrix handed to the reflector material.

use glam::{Mat4, Vec3, Vec4};
use log::{debug, error, info, warn};
use reflector_config::ReflectorSettings;

use crate::blur::BlurKernelConfig;
use crate::camera::{self, Camera, MirroredCamera, PlaneSurface, ReflectivePlane};
use crate::error::{ReflectorError, Result};
use crate::lighting::FrameParams;
use crate::material::ReflectorMaterial;
use crate::scene::{NodeId, Scene};
use crate::targets::{TargetHandle, TargetSet, TargetSlot};

/// One scene render into the sharp colour and depth targets.
#[derive(Clone, Copy, Debug)]
pub struct ScenePass<'a> {
    pub scene: &'a Scene,
    pub frame: &'a FrameParams,
    pub view_projection: Mat4,
    pub eye: Vec3,
    /// Node left out of the pass, normally the reflective plane itself.
    pub exclude: Option<NodeId>,
    pub clear_color: Vec4,
}

/// Where the reflection targets live and how they are drawn.
///
/// Implementations own the three targets; the manager only tracks which
/// generation is current. Errors returned here disable the manager.
pub trait ReflectionBackend {
    type Target;

    /// Largest square target side the backend accepts.
    fn max_resolution(&self) -> u32;

    /// (Re)create sharp, blurred and depth targets at `resolution`.
    fn create_targets(&mut self, resolution: u32) -> Result<()>;

    fn destroy_targets(&mut self);

    fn begin_frame(&mut self) -> Result<()> {
        Ok(())
    }

    /// Clear and draw every visible standard node into sharp colour and depth.
    fn render_scene(&mut self, pass: &ScenePass<'_>) -> Result<()>;

    /// Separable blur of sharp into blurred, `kernel.iterations()` H+V pairs.
    fn blur(&mut self, kernel: &BlurKernelConfig) -> Result<()>;

    fn copy_sharp_to_blurred(&mut self) -> Result<()>;

    /// Flush recorded work.
    fn end_frame(&mut self) -> Result<()> {
        Ok(())
    }

    fn target(&self, slot: TargetSlot) -> Option<&Self::Target>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// Camera behind the mirror; last frame's targets stay bound.
    SkippedBehindMirror,
    /// A backend failure switched reflections off.
    Disabled,
}

pub struct ReflectionPassManager<B: ReflectionBackend> {
    backend: B,
    plane: ReflectivePlane,
    kernel: BlurKernelConfig,
    clip_bias: f32,
    clear_color: Vec4,
    targets: TargetSet,
    pending_resolution: Option<u32>,
    in_frame: bool,
    disabled: bool,
    texture_matrix: Mat4,
}

impl<B: ReflectionBackend> ReflectionPassManager<B> {
    /// Allocates the targets at `settings.resolution`. A backend that fails
    /// here yields a manager that is already disabled.
    pub fn new(backend: B, plane: ReflectivePlane, settings: &ReflectorSettings) -> Result<Self> {
        settings.validate().map_err(ReflectorError::Config)?;
        let mut manager = Self {
            backend,
            plane,
            kernel: BlurKernelConfig::new(settings.blur, settings.blur_iterations),
            clip_bias: settings.clip_bias,
            clear_color: Vec4::from_array(settings.clear_color),
            targets: TargetSet::new(),
            pending_resolution: None,
            in_frame: false,
            disabled: false,
            texture_matrix: Mat4::IDENTITY,
        };
        manager.check_resolution(settings.resolution)?;
        manager.reallocate(settings.resolution);
        Ok(manager)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn plane(&self) -> &ReflectivePlane {
        &self.plane
    }

    pub fn blur_kernel(&self) -> &BlurKernelConfig {
        &self.kernel
    }

    pub fn resolution(&self) -> u32 {
        self.targets.resolution()
    }

    pub fn generation(&self) -> u64 {
        self.targets.generation()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Matrix written by the last successful [`Self::compute_texture_matrix`].
    pub fn texture_matrix(&self) -> Mat4 {
        self.texture_matrix
    }

    pub fn handle(&self, slot: TargetSlot) -> Result<TargetHandle> {
        self.targets.handle(slot)
    }

    /// Resolve a handle held by a material to the backend target.
    pub fn target(&self, handle: TargetHandle) -> Result<&B::Target> {
        self.targets.validate(handle)?;
        self.backend.target(handle.slot).ok_or(ReflectorError::MissingTarget(handle.slot))
    }

    /// Queue a resolution change for the next `begin_frame`.
    pub fn request_resolution(&mut self, resolution: u32) -> Result<()> {
        self.check_resolution(resolution)?;
        self.pending_resolution = Some(resolution);
        Ok(())
    }

    /// Reallocate now. Refused between `begin_frame` and `end_frame`.
    pub fn set_resolution_now(&mut self, resolution: u32) -> Result<()> {
        if self.in_frame {
            return Err(ReflectorError::ResizeInFlight);
        }
        self.check_resolution(resolution)?;
        self.pending_resolution = None;
        self.reallocate(resolution);
        Ok(())
    }

    pub fn begin_frame(&mut self) -> Result<()> {
        if self.in_frame {
            return Err(ReflectorError::FrameInProgress);
        }
        if let Some(resolution) = self.pending_resolution.take() {
            self.reallocate(resolution);
        }
        self.in_frame = true;
        if !self.disabled {
            if let Err(e) = self.backend.begin_frame() {
                self.disable(&e);
            }
        }
        Ok(())
    }

    pub fn end_frame(&mut self) -> Result<()> {
        if !self.in_frame {
            return Err(ReflectorError::NotInFrame);
        }
        self.in_frame = false;
        if !self.disabled {
            if let Err(e) = self.backend.end_frame() {
                self.disable(&e);
            }
        }
        Ok(())
    }

    /// World placement of the plane this frame.
    pub fn plane_surface(&self, scene: &Scene) -> Result<PlaneSurface> {
        self.plane.surface(scene).ok_or_else(|| {

            ReflectorError::Config(format!(
                "reflective plane node {:?} is not in the scene",
                self.plane.node
            ))
        })
    }

    pub fn compute_mirrored_camera(
        &self,
        scene: &Scene,
        main_camera: &Camera,
    ) -> Result<MirroredCamera> {
        self.require_frame()?;
        let surface = self.plane_surface(scene)?;
        Ok(camera::compute_mirrored_camera(&surface, main_camera, self.clip_bias))
    }

    /// Render the scene minus the plane into the sharp and depth targets.
    pub fn render_sharp_pass(
        &mut self,
        scene: &Scene,
        frame: &FrameParams,
        mirrored: &MirroredCamera,
    ) -> Result<(TargetHandle, TargetHandle)> {
        self.require_active_frame()?;
        let sharp = self.targets.handle(TargetSlot::Sharp)?;
        let depth = self.targets.handle(TargetSlot::Depth)?;
        let pass = ScenePass {
            scene,
            frame,
            view_projection: mirrored.view_projection(),
            eye: mirrored.position,
            exclude: Some(self.plane.node),
            clear_color: self.clear_color,
        };
        self.guard(|b| b.render_scene(&pass))?;
        Ok((sharp, depth))
    }

    /// Blur `sharp` into the blurred target, or copy it when blur is off.
    pub fn render_blur_pass(&mut self, sharp: TargetHandle) -> Result<TargetHandle> {
        self.require_active_frame()?;
        self.targets.validate(sharp)?;
        let blurred = self.targets.handle(TargetSlot::Blurred)?;
        let kernel = self.kernel;
        if kernel.enabled() {
            self.guard(|b| b.blur(&kernel))?;
        } else {
            self.guard(|b| b.copy_sharp_to_blurred())?;
        }
        Ok(blurred)
    }

    pub fn compute_texture_matrix(
        &mut self,
        scene: &Scene,
        mirrored: &MirroredCamera,
    ) -> Result<Mat4> {
        self.require_frame()?;
        let surface = self.plane_surface(scene)?;
        self.texture_matrix = camera::compute_texture_matrix(mirrored, &surface);
        Ok(self.texture_matrix)
    }

    /// Run every pass for this frame and publish the results into `material`.
    pub fn update(
        &mut self,
        scene: &Scene,
        main_camera: &Camera,
        frame: &FrameParams,
        material: &mut ReflectorMaterial,
    ) -> Result<FrameOutcome> {
        self.require_frame()?;
        if self.disabled {
            Self::unbind(material);
            return Ok(FrameOutcome::Disabled);
        }

        let mirrored = self.compute_mirrored_camera(scene, main_camera)?;
        if !mirrored.facing {
            debug!("reflector: camera behind mirror, keeping previous targets");
            let u = material.uniforms();
            let stale = [u.sharp, u.blurred, u.depth]
                .into_iter()
                .flatten()
                .any(|h| self.targets.validate(h).is_err());
            if stale {
                Self::unbind(material);
            }
            return Ok(FrameOutcome::SkippedBehindMirror);
        }

        let passes = self
            .render_sharp_pass(scene, frame, &mirrored)
            .and_then(|(sharp, depth)| Ok((sharp, depth, self.render_blur_pass(sharp)?)));
        let (sharp, depth, blurred) = match passes {
            Ok(handles) => handles,
            Err(ReflectorError::Backend(_)) if self.disabled => {
                Self::unbind(material);
                return Ok(FrameOutcome::Disabled);
            }
            Err(e) => return Err(e),
        };
        let texture_matrix = self.compute_texture_matrix(scene, &mirrored)?;

        let has_blur = self.kernel.enabled();
        let u = material.uniforms_mut();
        u.texture_matrix = texture_matrix;
        u.sharp = Some(sharp);
        u.blurred = Some(blurred);
        u.depth = Some(depth);
        u.has_blur = has_blur;
        Ok(FrameOutcome::Rendered)
    }

    fn unbind(material: &mut ReflectorMaterial) {
        if material.uniforms().sharp.is_some()
            || material.uniforms().blurred.is_some()
            || material.uniforms().depth.is_some()
        {
            material.uniforms_mut().clear_targets();
        }
    }

    fn require_frame(&self) -> Result<()> {
        if self.in_frame { Ok(()) } else { Err(ReflectorError::NotInFrame) }
    }

    fn require_active_frame(&self) -> Result<()> {
        self.require_frame()?;
        if self.disabled {
            return Err(ReflectorError::Backend("reflection passes are disabled".into()));
        }
        Ok(())
    }

    fn check_resolution(&self, resolution: u32) -> Result<()> {
        if resolution == 0 || resolution > self.backend.max_resolution() {
            return Err(ReflectorError::InvalidResolution(resolution));
        }
        Ok(())
    }

    fn reallocate(&mut self, resolution: u32) {
        if self.disabled {
            return;
        }
        if self.targets.is_allocated() {
            self.backend.destroy_targets();
            self.targets.released();
        }
        match self.backend.create_targets(resolution) {
            Ok(()) => {
                self.targets.allocated(resolution);
                info!(
                    "reflector: allocated {resolution}x{resolution} targets (generation {})",
                    self.targets.generation()
                );
            }
            Err(e) => self.disable(&e),
        }
    }

    fn guard(&mut self, op: impl FnOnce(&mut B) -> Result<()>) -> Result<()> {
        op(&mut self.backend).inspect_err(|e| self.disable(e))
    }

    /// Switch reflections off for good and release the targets. Called on
    /// backend errors and by renderers whose reflective variant fails to build.
    pub fn disable(&mut self, cause: &ReflectorError) {
        if self.disabled {
            warn!("reflector: further backend error while disabled: {cause}");
            return;
        }
        error!("reflector: disabling planar reflections: {cause}");
        self.disabled = true;
        if self.targets.is_allocated() {
            self.backend.destroy_targets();
            self.targets.released();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::PbrParams;
    use crate::scene::{Mesh, NodeMaterial, Transform};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_render: bool,
    }

    impl ReflectionBackend for Recorder {
        type Target = ();

        fn max_resolution(&self) -> u32 {
            1024
        }

        fn create_targets(&mut self, _resolution: u32) -> Result<()> {
            self.calls.push("create");
            Ok(())
        }

        fn destroy_targets(&mut self) {
            self.calls.push("destroy");
        }

        fn render_scene(&mut self, _pass: &ScenePass<'_>) -> Result<()> {
            self.calls.push("render");
            if self.fail_render {
                return Err(ReflectorError::Backend("device lost".into()));
            }
            Ok(())
        }

        fn blur(&mut self, _kernel: &BlurKernelConfig) -> Result<()> {
            self.calls.push("blur");
            Ok(())
        }

        fn copy_sharp_to_blurred(&mut self) -> Result<()> {
            self.calls.push("copy");
            Ok(())
        }

        fn target(&self, _slot: TargetSlot) -> Option<&()> {
            Some(&())
        }
    }

    fn setup(
        settings: &ReflectorSettings,
    ) -> (Scene, ReflectionPassManager<Recorder>, ReflectorMaterial) {
        let mut scene = Scene::new();
        let quad = scene.add_mesh(Mesh::plane(4.0, 4.0));
        let rotation = [-std::f32::consts::FRAC_PI_2, 0.0, 0.0];
        let node = scene.add_node(
            "mirror",
            quad,
            Transform::from_position_euler([0.0, 0.0, 0.0], rotation),
            NodeMaterial::Reflector,
        );
        let plane = ReflectivePlane::new(node, [4.0, 4.0]);
        let manager = ReflectionPassManager::new(Recorder::default(), plane, settings).unwrap();
        let material = ReflectorMaterial::new(PbrParams::default(), settings).unwrap();
        (scene, manager, material)
    }

    fn camera_at(y: f32) -> Camera {
        Camera::new(Vec3::new(0.0, y, 5.0), Vec3::ZERO, 45.0, 1.0)
    }

    #[test]
    fn blur_off_copies_and_blur_on_blurs() {
        let (scene, mut m, mut mat) = setup(&ReflectorSettings::default());
        m.begin_frame().unwrap();
        m.update(&scene, &camera_at(2.0), &FrameParams::default(), &mut mat).unwrap();
        m.end_frame().unwrap();
        assert_eq!(m.backend().calls, ["create", "render", "copy"]);
        assert!(!mat.uniforms().has_blur);

        let settings = ReflectorSettings { blur: [4.0, 0.0], ..Default::default() };
        let (scene, mut m, mut mat) = setup(&settings);
        m.begin_frame().unwrap();
        m.update(&scene, &camera_at(2.0), &FrameParams::default(), &mut mat).unwrap();
        assert_eq!(m.backend().calls, ["create", "render", "blur"]);
        assert!(mat.uniforms().has_blur);
    }

    #[test]
    fn operations_need_a_frame() {
        let (scene, mut m, mut mat) = setup(&ReflectorSettings::default());
        assert!(matches!(
            m.update(&scene, &camera_at(2.0), &FrameParams::default(), &mut mat),
            Err(ReflectorError::NotInFrame)
        ));
        assert!(matches!(m.end_frame(), Err(ReflectorError::NotInFrame)));
        m.begin_frame().unwrap();
        assert!(matches!(m.begin_frame(), Err(ReflectorError::FrameInProgress)));
    }

    #[test]
    fn pending_resolution_applies_at_begin_frame() {
        let (_, mut m, _) = setup(&ReflectorSettings::default());
        m.request_resolution(512).unwrap();
        assert_eq!(m.resolution(), 256);
        m.begin_frame().unwrap();
        assert_eq!(m.resolution(), 512);
        assert_eq!(m.generation(), 2);
        assert!(matches!(m.set_resolution_now(128), Err(ReflectorError::ResizeInFlight)));
        m.end_frame().unwrap();
        m.set_resolution_now(128).unwrap();
        assert_eq!(m.resolution(), 128);
        assert!(matches!(m.request_resolution(0), Err(ReflectorError::InvalidResolution(0))));
        assert!(matches!(m.request_resolution(4096), Err(ReflectorError::InvalidResolution(4096))));
    }

    #[test]
    fn backend_failure_disables_once() {
        let (scene, mut m, mut mat) = setup(&ReflectorSettings::default());
        m.begin_frame().unwrap();
        m.update(&scene, &camera_at(2.0), &FrameParams::default(), &mut mat).unwrap();
        m.end_frame().unwrap();
        assert!(mat.uniforms().has_reflection());

        m.backend_mut().fail_render = true;
        m.begin_frame().unwrap();
        let outcome = m.update(&scene, &camera_at(2.0), &FrameParams::default(), &mut mat).unwrap();
        m.end_frame().unwrap();
        assert_eq!(outcome, FrameOutcome::Disabled);
        assert!(m.is_disabled());
        assert!(!mat.uniforms().has_reflection());

        let calls = m.backend().calls.len();
        m.begin_frame().unwrap();
        let outcome = m.update(&scene, &camera_at(2.0), &FrameParams::default(), &mut mat).unwrap();
        m.end_frame().unwrap();
        assert_eq!(outcome, FrameOutcome::Disabled);
        assert_eq!(m.backend().calls.len(), calls);
    }

    #[test]
    fn camera_behind_mirror_skips_passes() {
        let (scene, mut m, mut mat) = setup(&ReflectorSettings::default());
        m.begin_frame().unwrap();
        let outcome =
            m.update(&scene, &camera_at(-2.0), &FrameParams::default(), &mut mat).unwrap();

        assert_eq!(outcome, FrameOutcome::SkippedBehindMirror);
        assert_eq!(m.backend().calls, ["create"]);
    }
}
