//! Plane math, mirror reflection and oblique near-plane clipping.

use glam::{Mat4, Vec3, Vec4};

/// Normals shorter than this are treated as degenerate.
pub const DEGENERATE_NORMAL_EPSILON: f32 = 1e-6;

/// Cameras closer to the plane than this cannot build a stable clip plane.
pub const ON_PLANE_EPSILON: f32 = 1e-5;

/// Plane `normal · p + d = 0` with a unit normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// `None` when the normal is (near) zero length.
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Option<Self> {
        if !(normal.length() >= DEGENERATE_NORMAL_EPSILON) {
            return None;
        }
        let n = normal.normalize();
        Some(Self { normal: n, d: -n.dot(point) })
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }

    pub fn reflect_point(&self, p: Vec3) -> Vec3 {
        p - 2.0 * self.signed_distance(p) * self.normal
    }

    pub fn reflect_vector(&self, v: Vec3) -> Vec3 {
        v - 2.0 * v.dot(self.normal) * self.normal
    }

    /// Same plane moved `offset` along its normal.
    pub fn offset(&self, offset: f32) -> Self {
        Self { normal: self.normal, d: self.d - offset }
    }

    pub fn as_vec4(&self) -> Vec4 {
        self.normal.extend(self.d)
    }

    /// Householder reflection `I - 2nnᵀ` with the plane offset folded into the translation.
    pub fn reflection_matrix(&self) -> Mat4 {
        let n = self.normal;
        let d = self.d;
        Mat4::from_cols(
            Vec4::new(1.0 - 2.0 * n.x * n.x, -2.0 * n.y * n.x, -2.0 * n.z * n.x, 0.0),
            Vec4::new(-2.0 * n.x * n.y, 1.0 - 2.0 * n.y * n.y, -2.0 * n.z * n.y, 0.0),
            Vec4::new(-2.0 * n.x * n.z, -2.0 * n.y * n.z, 1.0 - 2.0 * n.z * n.z, 0.0),
            Vec4::new(-2.0 * n.x * d, -2.0 * n.y * d, -2.0 * n.z * d, 1.0),
        )
    }
}

/// Transform a world-space plane (as `(n, d)`) into the space of `view`.
pub fn plane_to_view_space(plane: Vec4, view: Mat4) -> Vec4 {
    view.inverse().transpose() * plane
}

/// Replace the near plane of a `[0, 1]`-depth perspective projection with
/// `clip_plane` (view space, keeping the half-space where `clip_plane · p >= 0`).
///
/// Lengyel's construction: the far plane stays as close to the input far plane as
/// possible while the third row becomes the scaled clip plane. Returns `None`
/// when the scale is not finite and positive.
pub fn oblique_projection(projection: Mat4, clip_plane: Vec4) -> Option<Mat4> {
    let corner = Vec4::new(clip_plane.x.signum(), clip_plane.y.signum(), 1.0, 1.0);
    let q = projection.inverse() * corner;
    let denom = clip_plane.dot(q);
    let scale = 1.0 / denom;
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    let row = clip_plane * scale;
    let mut m = projection;
    m.x_axis.z = row.x;
    m.y_axis.z = row.y;
    m.z_axis.z = row.z;
    m.w_axis.z = row.w;
    Some(m)
}

/// Maps clip-space x,y in [-1, 1] to texture u,v in [0, 1] with v pointing
/// down; z and w pass through.
pub fn texture_bias_matrix() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.5, 0.5, 0.0, 1.0),
    )
}
