//! CPU implementation of [`ReflectionBackend`] for headless rendering and tests.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use log::debug;

use crate::blur::BlurKernelConfig;
use crate::error::{ReflectorError, Result};
use crate::lighting::{SurfacePoint, shade_pbr};
use crate::material::PbrParams;
use crate::pass_manager::{ReflectionBackend, ScenePass};
use crate::scene::{NodeMaterial, normal_matrix};
use crate::targets::TargetSlot;
use crate::texture::Image;

const DEFAULT_MAX_RESOLUTION: u32 = 2048;
const W_EPSILON: f32 = 1e-5;

#[derive(Clone, Debug, PartialEq)]
pub enum SoftwareTarget {
    Color(Image<Vec4>),
    Depth(Image<f32>),
}

impl SoftwareTarget {
    pub fn as_color(&self) -> Option<&Image<Vec4>> {
        match self {
            SoftwareTarget::Color(img) => Some(img),
            SoftwareTarget::Depth(_) => None,
        }
    }

    pub fn as_depth(&self) -> Option<&Image<f32>> {
        match self {
            SoftwareTarget::Depth(img) => Some(img),
            SoftwareTarget::Color(_) => None,
        }
    }
}

fn slot_index(slot: TargetSlot) -> usize {
    match slot {
        TargetSlot::Sharp => 0,
        TargetSlot::Blurred => 1,
        TargetSlot::Depth => 2,
    }
}

pub struct SoftwareBackend {
    max_resolution: u32,
    resolution: u32,
    targets: [Option<SoftwareTarget>; 3],
    scratch: Option<Image<Vec4>>,
    scene_passes: u64,
    blur_passes: u64,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            max_resolution: DEFAULT_MAX_RESOLUTION,
            resolution: 0,
            targets: [None, None, None],
            scratch: None,
            scene_passes: 0,
            blur_passes: 0,
        }
    }

    pub fn with_max_resolution(mut self, max: u32) -> Self {
        self.max_resolution = max;
        self
    }

    /// Scene renders performed so far.
    pub fn scene_passes(&self) -> u64 {
        self.scene_passes
    }

    /// Directional blur passes performed so far.
    pub fn blur_passes(&self) -> u64 {
        self.blur_passes
    }

    pub fn color(&self, slot: TargetSlot) -> Result<&Image<Vec4>> {
        self.targets[slot_index(slot)]
            .as_ref()
            .and_then(SoftwareTarget::as_color)
            .ok_or(ReflectorError::MissingTarget(slot))
    }

    pub fn depth(&self) -> Result<&Image<f32>> {
        self.targets[slot_index(TargetSlot::Depth)]
            .as_ref()
            .and_then(SoftwareTarget::as_depth)
            .ok_or(ReflectorError::MissingTarget(TargetSlot::Depth))
    }

    fn take_color(&mut self, slot: TargetSlot) -> Result<Image<Vec4>> {
        match self.targets[slot_index(slot)].take() {
            Some(SoftwareTarget::Color(img)) => Ok(img),
            other => {
                self.targets[slot_index(slot)] = other;
                Err(ReflectorError::MissingTarget(slot))
            }
        }
    }

    fn take_depth(&mut self) -> Result<Image<f32>> {
        let slot = TargetSlot::Depth;
        match self.targets[slot_index(slot)].take() {
            Some(SoftwareTarget::Depth(img)) => Ok(img),
            other => {
                self.targets[slot_index(slot)] = other;
                Err(ReflectorError::MissingTarget(slot))
            }
        }
    }
}

impl ReflectionBackend for SoftwareBackend {
    type Target = SoftwareTarget;

    fn max_resolution(&self) -> u32 {
        self.max_resolution
    }

    fn create_targets(&mut self, resolution: u32) -> Result<()> {
        let r = resolution;
        self.targets = [
            Some(SoftwareTarget::Color(Image::new(r, r, Vec4::ZERO))),
            Some(SoftwareTarget::Color(Image::new(r, r, Vec4::ZERO))),
            Some(SoftwareTarget::Depth(Image::new(r, r, 1.0))),
        ];
        self.resolution = r;
        Ok(())
    }

    fn destroy_targets(&mut self) {
        self.targets = [None, None, None];
        self.scratch = None;
        self.resolution = 0;
    }

    fn render_scene(&mut self, pass: &ScenePass<'_>) -> Result<()> {
        let mut color = self.take_color(TargetSlot::Sharp)?;
        let mut depth = match self.take_depth() {
            Ok(d) => d,
            Err(e) => {
                self.targets[slot_index(TargetSlot::Sharp)] = Some(SoftwareTarget::Color(color));
                return Err(e);
            }
        };
        color.fill(pass.clear_color);
        depth.fill(1.0);

        let mut raster = Rasterizer { color: &mut color, depth: &mut depth, pass };
        let mut drawn = 0;
        for (_, node, model) in pass.scene.visible_nodes(pass.exclude) {
            let NodeMaterial::Standard(params) = &node.material else {
                continue;
            };
            let Some(mesh) = pass.scene.mesh(node.mesh) else {
                continue;
            };
            let nm = normal_matrix(model);
            let verts: Vec<ClipVertex> = mesh
                .vertices
                .iter()
                .map(|v| {
                    let world = model * Vec3::from(v.position).extend(1.0);
                    ClipVertex {
                        clip: pass.view_projection * world,
                        world: world.xyz(),
                        normal: nm.transform_vector3(Vec3::from(v.normal)),
                    }
                })
                .collect();
            for tri in mesh.indices.chunks_exact(3) {
                let (Some(a), Some(b), Some(c)) = (
                    verts.get(tri[0] as usize),
                    verts.get(tri[1] as usize),
                    verts.get(tri[2] as usize),
                ) else {
                    continue;
                };
                raster.triangle([*a, *b, *c], params);
            }
            drawn += 1;
        }
        debug!("software reflector: drew {drawn} nodes");

        self.targets[slot_index(TargetSlot::Sharp)] = Some(SoftwareTarget::Color(color));
        self.targets[slot_index(TargetSlot::Depth)] = Some(SoftwareTarget::Depth(depth));
        self.scene_passes += 1;
        Ok(())
    }

    fn blur(&mut self, kernel: &BlurKernelConfig) -> Result<()> {
        self.color(TargetSlot::Sharp)?;
        let mut blurred = self.take_color(TargetSlot::Blurred)?;
        let r = self.resolution;
        let mut scratch = self
            .scratch
            .take()
            .filter(|s| s.width() == r && s.height() == r)
            .unwrap_or_else(|| Image::new(r, r, Vec4::ZERO));

        let horizontal = kernel.horizontal();
        let vertical = kernel.vertical();
        for i in 0..kernel.iterations() {
            if i == 0 {
                let sharp = self.color(TargetSlot::Sharp)?;
                horizontal.apply(sharp, &mut scratch, Vec2::X);
            } else {
                horizontal.apply(&blurred, &mut scratch, Vec2::X);
            }
            vertical.apply(&scratch, &mut blurred, Vec2::Y);
            self.blur_passes += 2;
        }

        self.targets[slot_index(TargetSlot::Blurred)] = Some(SoftwareTarget::Color(blurred));
        self.scratch = Some(scratch);
        Ok(())
    }

    fn copy_sharp_to_blurred(&mut self) -> Result<()> {
        let sharp = self.color(TargetSlot::Sharp)?.clone();
        self.targets[slot_index(TargetSlot::Blurred)] = Some(SoftwareTarget::Color(sharp));
        Ok(())
    }

    fn target(&self, slot: TargetSlot) -> Option<&SoftwareTarget> {
        self.targets[slot_index(slot)].as_ref()
    }
}

#[derive(Clone, Copy, Debug)]
struct ClipVertex {
    clip: Vec4,
    world: Vec3,
    normal: Vec3,
}

impl ClipVertex {
    fn lerp(&self, other: &ClipVertex, t: f32) -> ClipVertex {
        ClipVertex {
            clip: self.clip.lerp(other.clip, t),
            world: self.world.lerp(other.world, t),
            normal: self.normal.lerp(other.normal, t),
        }
    }
}

/// Sutherland-Hodgman against one homogeneous half-space `dist(v) >= 0`.
fn clip_polygon(poly: Vec<ClipVertex>, dist: impl Fn(&Vec4) -> f32) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(poly.len() + 2);
    for i in 0..poly.len() {
        let a = &poly[i];
        let b = &poly[(i + 1) % poly.len()];
        let (da, db) = (dist(&a.clip), dist(&b.clip));
        if da >= 0.0 {
            out.push(*a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            out.push(a.lerp(b, da / (da - db)));
        }
    }
    out
}

struct Rasterizer<'a> {
    color: &'a mut Image<Vec4>,
    depth: &'a mut Image<f32>,
    pass: &'a ScenePass<'a>,
}

impl Rasterizer<'_> {
    fn triangle(&mut self, tri: [ClipVertex; 3], params: &PbrParams) {
        let mut poly = tri.to_vec();
        poly = clip_polygon(poly, |c| c.w - W_EPSILON);
        poly = clip_polygon(poly, |c| c.z);
        poly = clip_polygon(poly, |c| c.w - c.z);
        if poly.len() < 3 {
            return;
        }
        for i in 1..poly.len() - 1 {
            self.fill([poly[0], poly[i], poly[i + 1]], params);
        }
    }

    fn fill(&mut self, tri: [ClipVertex; 3], params: &PbrParams) {
        let (w, h) = (self.color.width() as f32, self.color.height() as f32);
        let screen = tri.map(|v| {
            let ndc = v.clip.xyz() / v.clip.w;
            Vec3::new((ndc.x + 1.0) * 0.5 * w, (1.0 - ndc.y) * 0.5 * h, ndc.z)
        });
        let area = edge(screen[0], screen[1], screen[2]);
        if area.abs() < 1e-12 {
            return;
        }
        let min = screen.iter().fold(Vec2::splat(f32::MAX), |m, p| m.min(Vec2::new(p.x, p.y)));
        let max = screen.iter().fold(Vec2::splat(f32::MIN), |m, p| m.max(Vec2::new(p.x, p.y)));
        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.ceil().min(w) as u32).min(self.color.width());
        let y1 = (max.y.ceil().min(h) as u32).min(self.color.height());
        let inv_w = tri.map(|v| 1.0 / v.clip.w);

        for y in y0..y1 {
            for x in x0..x1 {
                let p = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0);
                let b = [
                    edge(screen[1], screen[2], p) / area,
                    edge(screen[2], screen[0], p) / area,
                    edge(screen[0], screen[1], p) / area,
                ];
                if b.iter().any(|v| *v < 0.0) {
                    continue;
                }
                let z = b[0] * screen[0].z + b[1] * screen[1].z + b[2] * screen[2].z;
                if !(z < self.depth.get(x, y)) {
                    continue;
                }
                // perspective-correct weights
                let pw = [b[0] * inv_w[0], b[1] * inv_w[1], b[2] * inv_w[2]];
                let sum = pw[0] + pw[1] + pw[2];
                if sum <= 0.0 {
                    continue;
                }
                let world =
                    (tri[0].world * pw[0] + tri[1].world * pw[1] + tri[2].world * pw[2]) / sum;
                let normal =
                    (tri[0].normal * pw[0] + tri[1].normal * pw[1] + tri[2].normal * pw[2]) / sum;
                self.depth.set(x, y, z);
                self.color.set(x, y, self.shade(world, normal, params));
            }
        }
    }

    fn shade(&self, world: Vec3, normal: Vec3, params: &PbrParams) -> Vec4 {
        let view_dir = (self.pass.eye - world).normalize_or_zero();
        let mut n = normal.normalize_or_zero();
        if n.dot(view_dir) < 0.0 {
            n = -n;
        }
        let lit = shade_pbr(
            &SurfacePoint {
                albedo: params.base_color.xyz(),
                metalness: params.metalness,
                roughness: params.roughness,
                normal: n,
                view_dir,
                world_pos: world,
                env_intensity: params.env_intensity,
            },
            self.pass.frame,
        );
        (lit + params.emissive_radiance()).extend(params.base_color.w)
    }
}

fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}
