use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::material::PbrParams;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Quad in the local XY plane facing +Z, centred at the origin.
    pub fn plane(width: f32, height: f32) -> Self {
        let (hx, hy) = (width * 0.5, height * 0.5);
        let n = [0.0, 0.0, 1.0];
        let vertices = vec![
            Vertex { position: [-hx, -hy, 0.0], normal: n, uv: [0.0, 1.0] },
            Vertex { position: [hx, -hy, 0.0], normal: n, uv: [1.0, 1.0] },
            Vertex { position: [hx, hy, 0.0], normal: n, uv: [1.0, 0.0] },
            Vertex { position: [-hx, hy, 0.0], normal: n, uv: [0.0, 0.0] },
        ];
        Self { vertices, indices: vec![0, 1, 2, 0, 2, 3] }
    }

    /// Axis-aligned box with per-face normals.
    pub fn cuboid(size: Vec3) -> Self {
        let h = size * 0.5;
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            let center = normal * h;
            let corners = [
                (-1.0, -1.0, [0.0, 1.0]),
                (1.0, -1.0, [1.0, 1.0]),
                (1.0, 1.0, [1.0, 0.0]),
                (-1.0, 1.0, [0.0, 0.0]),
            ];
            for (su, sv, uv) in corners {
                let p = center + u * h * su + v * h * sv;
                mesh.vertices.push(Vertex {
                    position: p.to_array(),
                    normal: normal.to_array(),
                    uv,
                });
            }
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut mesh = Self::default();
        for r in 0..=rings {
            let v = r as f32 / rings as f32;
            let theta = v * std::f32::consts::PI;
            for s in 0..=segments {
                let u = s as f32 / segments as f32;
                let phi = u * std::f32::consts::TAU;
                let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                mesh.vertices.push(Vertex {
                    position: (n * radius).to_array(),
                    normal: n.to_array(),
                    uv: [u, v],
                });
            }
        }
        let stride = segments + 1;
        for r in 0..rings {
            for s in 0..segments {
                let a = r * stride + s;
                let b = a + stride;
                mesh.indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        mesh
    }

    /// Ring around the local Y axis.
    pub fn torus(major: f32, minor: f32, segments: u32, sides: u32) -> Self {
        let segments = segments.max(3);
        let sides = sides.max(3);
        let mut mesh = Self::default();
        for i in 0..=segments {
            let u = i as f32 / segments as f32;
            let a = u * std::f32::consts::TAU;
            let center = Vec3::new(a.cos() * major, 0.0, a.sin() * major);
            for j in 0..=sides {
                let v = j as f32 / sides as f32;
                let b = v * std::f32::consts::TAU;
                let n = Vec3::new(a.cos() * b.cos(), b.sin(), a.sin() * b.cos());
                mesh.vertices.push(Vertex {
                    position: (center + n * minor).to_array(),
                    normal: n.to_array(),
                    uv: [u, v],
                });
            }
        }
        let stride = sides + 1;
        for i in 0..segments {
            for j in 0..sides {
                let a = i * stride + j;
                let b = a + stride;
                mesh.indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }
        mesh
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    /// Euler XYZ rotation in radians.
    pub fn from_position_euler(position: [f32; 3], rotation: [f32; 3]) -> Self {
        Self {
            translation: Vec3::from_array(position),
            rotation: Quat::from_euler(EulerRot::XYZ, rotation[0], rotation[1], rotation[2]),
            scale: Vec3::ONE,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// How a node is shaded.
#[derive(Clone, Debug)]
pub enum NodeMaterial {
    Standard(PbrParams),
    /// Shaded by the reflector material the renderer is handed each frame.
    Reflector,
}

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,
    pub mesh: MeshId,
    pub transform: Transform,
    pub material: NodeMaterial,
    pub visible: bool,
}

/// Flat node list under one root transform.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub root: Transform,
    meshes: Vec<Mesh>,
    nodes: Vec<SceneNode>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        mesh: MeshId,
        transform: Transform,
        material: NodeMaterial,
    ) -> NodeId {
        self.nodes.push(SceneNode {
            name: name.into(),
            mesh,
            transform,
            material,
            visible: true,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn meshes(&self) -> impl Iterator<Item = (MeshId, &Mesh)> {
        self.meshes.iter().enumerate().map(|(i, m)| (MeshId(i), m))
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn world_matrix(&self, id: NodeId) -> Option<Mat4> {
        self.node(id).map(|n| self.root.matrix() * n.transform.matrix())
    }

    /// Visible nodes with their world matrix, minus `exclude`.
    pub fn visible_nodes(
        &self,
        exclude: Option<NodeId>,
    ) -> impl Iterator<Item = (NodeId, &SceneNode, Mat4)> {
        let root = self.root.matrix();
        self.nodes()
            .filter(move |(id, n)| n.visible && Some(*id) != exclude)
            .map(move |(id, n)| (id, n, root * n.transform.matrix()))
    }
}

/// Inverse-transpose of the upper 3x3, for transforming normals.
pub fn normal_matrix(model: Mat4) -> Mat4 {
    let det = model.determinant();
    if det.abs() < 1e-12 || !det.is_finite() {
        return model;
    }
    Mat4::from_mat3(glam::Mat3::from_mat4(model).inverse().transpose())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_mesh_faces_local_z() {
        let mesh = Mesh::plane(2.0, 4.0);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
        let max_y = mesh.vertices.iter().map(|v| v.position[1]).fold(f32::MIN, f32::max);
        assert_eq!(max_y, 2.0);
    }

    #[test]
    fn mesh_indices_in_range() {
        let meshes = [
            Mesh::cuboid(Vec3::ONE),
            Mesh::uv_sphere(1.0, 12, 8),
            Mesh::torus(1.0, 0.3, 16, 8),
        ];
        for mesh in meshes {
            let n = mesh.vertices.len() as u32;
            assert!(mesh.indices.iter().all(|&i| i < n));
            assert_eq!(mesh.indices.len() % 3, 0);
        }
    }

    #[test]
    fn world_matrix_includes_root() {
        let mut scene = Scene::new();
        scene.root = Transform::from_translation(Vec3::new(0.0, -1.0, 0.0));
        let mesh = scene.add_mesh(Mesh::cuboid(Vec3::ONE));
        let transform = Transform::from_translation(Vec3::X);
        let id = scene.add_node("box", mesh, transform, NodeMaterial::Reflector);

        let p = scene.world_matrix(id).unwrap().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(1.0, -1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn visible_nodes_skips_excluded_and_hidden() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh(Mesh::plane(1.0, 1.0));
        let a = scene.add_node("a", mesh, Transform::IDENTITY, NodeMaterial::Reflector);
        let b = scene.add_node("b", mesh, Transform::IDENTITY, NodeMaterial::Reflector);
        let c = scene.add_node("c", mesh, Transform::IDENTITY, NodeMaterial::Reflector);
        scene.node_mut(c).unwrap().visible = false;
        let ids: Vec<NodeId> = scene.visible_nodes(Some(a)).map(|(id, _, _)| id).collect();
        assert_eq!(ids, vec![b]);
    }
}
