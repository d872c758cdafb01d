//! Main camera, reflective plane and the mirrored camera derived from both.

use glam::{Mat4, Vec2, Vec3};
use log::debug;

use crate::math::{self, ON_PLANE_EPSILON, Plane};
use crate::scene::{NodeId, Scene};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.1,
            far: 100.0,
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed perspective with depth in [0, 1].
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect.max(1e-4), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }
}

/// A flat quad in the local XY plane of a scene node; local +Z is the mirror normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReflectivePlane {
    pub node: NodeId,
    pub half_extents: Vec2,
}

/// World-space placement of a [`ReflectivePlane`] for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneSurface {
    pub model: Mat4,
    pub origin: Vec3,
    /// Not normalised; zero length when the transform flattens the plane.
    pub normal: Vec3,
}

impl PlaneSurface {
    pub fn plane(&self) -> Option<Plane> {
        Plane::from_point_normal(self.origin, self.normal)
    }
}

impl ReflectivePlane {
    pub fn new(node: NodeId, size: [f32; 2]) -> Self {
        Self { node, half_extents: Vec2::new(size[0] * 0.5, size[1] * 0.5) }
    }

    /// `None` if the node no longer exists.
    pub fn surface(&self, scene: &Scene) -> Option<PlaneSurface> {
        let model = scene.world_matrix(self.node)?;
        let origin = model.transform_point3(Vec3::ZERO);
        // Span of the transformed local axes, valid under non-uniform scale.
        let normal = model.x_axis.truncate().cross(model.y_axis.truncate());
        Some(PlaneSurface { model, origin, normal })
    }
}

/// Why the mirrored camera uses the unclipped projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    DegeneratePlane,
    CameraOnPlane,
    InvalidClipScale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipState {
    Oblique,
    Unclipped(FallbackReason),
}

/// Per-frame virtual camera behind the mirror. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MirroredCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    pub clip: ClipState,
    /// False when the main camera is behind the mirror.
    pub facing: bool,
}

impl MirroredCamera {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Reflect `camera` across `surface` and clip the projection at the plane.
pub fn compute_mirrored_camera(
    surface: &PlaneSurface,
    camera: &Camera,
    clip_bias: f32,
) -> MirroredCamera {

    let Some(plane) = surface.plane() else {
        debug!("reflector: degenerate plane normal, using main camera");
        return MirroredCamera {
            position: camera.position,
            target: camera.target,
            up: camera.up,
            view: camera.view(),
            projection: camera.projection(),
            clip: ClipState::Unclipped(FallbackReason::DegeneratePlane),
            facing: true,
        };
    };

    let distance = plane.signed_distance(camera.position);
    let position = plane.reflect_point(camera.position);
    let target = plane.reflect_point(camera.target);
    let up = plane.reflect_vector(camera.up);
    let view = Mat4::look_at_rh(position, target, up);
    let projection = camera.projection();

    let (projection, clip) = if distance.abs() < ON_PLANE_EPSILON {
        (projection, ClipState::Unclipped(FallbackReason::CameraOnPlane))
    } else {
        let clip_plane = math::plane_to_view_space(plane.offset(clip_bias).as_vec4(), view);
        match math::oblique_projection(projection, clip_plane) {
            Some(oblique) => (oblique, ClipState::Oblique),
            None => (projection, ClipState::Unclipped(FallbackReason::InvalidClipScale)),
        }
    };
    if clip != ClipState::Oblique {
        debug!("reflector: mirrored projection unclipped ({clip:?})");
    }

    MirroredCamera {
        position,
        target,
        up,
        view,
        projection,
        clip,
        facing: distance > -ON_PLANE_EPSILON,
    }
}

/// `bias · projection · view` of the mirrored camera, then the plane's model
/// matrix so object-space positions map straight to projective texture space.
pub fn compute_texture_matrix(mirrored: &MirroredCamera, surface: &PlaneSurface) -> Mat4 {
    math::texture_bias_matrix() * mirrored.view_projection() * surface.model
}
