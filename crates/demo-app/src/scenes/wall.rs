use anyhow::Result;
use glam::Vec3;
use reflector_config::{MirrorConfig, ReflectorSettings};
use reflector_core::{
    Camera, FrameParams, Light, Mesh, NodeId, NodeMaterial, PbrParams, ReflectivePlane,
    ReflectorMaterial, Scene, Transform,

};

use super::{DemoScene, SceneSetup};

const WALL_SIZE: [f32; 2] = [6.0, 3.0];

/// Clean vertical mirror behind an orbiting ball; no maps, no blur.
#[derive(Default)]
pub struct WallScene {
    ball: Option<NodeId>,
}

impl DemoScene for WallScene {
    fn name(&self) -> &'static str {
        "wall"
    }

    fn build(&mut self, config: &MirrorConfig, aspect: f32) -> Result<SceneSetup> {
        let settings = ReflectorSettings {
            mirror: 1.0,
            mix_strength: 1.0,
            blur: [0.0, 0.0],
            depth_scale: 0.0,
            ..config.reflector.clone()
        };

        let mut scene = Scene::new();
        let quad = scene.add_mesh(Mesh::plane(WALL_SIZE[0], WALL_SIZE[1]));
        let wall = scene.add_node(
            "wall",
            quad,
            Transform::from_translation(Vec3::new(0.0, 1.5, -2.0)),
            NodeMaterial::Reflector,
        );
        let ground = scene.add_mesh(Mesh::cuboid(Vec3::new(8.0, 0.1, 6.0)));
        scene.add_node(
            "ground",
            ground,
            Transform::from_translation(Vec3::new(0.0, -0.05, 0.0)),
            NodeMaterial::Standard(PbrParams::from_color(Vec3::splat(0.3))),
        );
        let sphere = scene.add_mesh(Mesh::uv_sphere(0.4, 32, 16));
        self.ball = Some(scene.add_node(
            "ball",
            sphere,
            Transform::from_translation(Vec3::new(0.0, 0.6, 0.0)),
            NodeMaterial::Standard(PbrParams::emitter(Vec3::new(0.3, 0.7, 1.0), 2.0)),
        ));

        let material = ReflectorMaterial::new(PbrParams::from_color(Vec3::splat(0.05)), &settings)?;
        let frame = FrameParams {
            ambient: Vec3::splat(config.demo.ambient),
            lights: vec![Light::Directional {
                direction: Vec3::new(0.3, -1.0, -0.5),
                color: Vec3::ONE,
                intensity: 2.0,
            }],
            ..FrameParams::default()
        };
        let camera = Camera::new(Vec3::new(2.5, 1.8, 5.0), Vec3::new(0.0, 1.0, -1.0), 45.0, aspect);

        Ok(SceneSetup {
            scene,
            plane: ReflectivePlane::new(wall, WALL_SIZE),
            material,
            frame,
            camera,
        })
    }

    fn update(&mut self, scene: &mut Scene, elapsed: f32) {
        if let Some(node) = self.ball.and_then(|id| scene.node_mut(id)) {
            node.transform.translation = Vec3::new(1.5 * elapsed.cos(), 0.6, 1.5 * elapsed.sin());
        }
    }
}
