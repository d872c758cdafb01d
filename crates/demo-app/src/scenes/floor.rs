use std::f32::consts::TAU;

use anyhow::Result;
use glam::{Quat, Vec2, Vec3};
use log::warn;
use reflector_config::MirrorConfig;
use reflector_core::color::parse_hex_linear;
use reflector_core::{
    Camera, FrameParams, Light, Mesh, NodeId, NodeMaterial, PbrParams, ReflectivePlane,
    ReflectorMaterial, Scene, Transform,

};

use super::{DemoScene, SceneSetup};
use crate::maps::FloorMaps;

/// Imperfect floor mirror with a spinning model and a small lamp.
#[derive(Default)]
pub struct FloorScene {
    model: Option<NodeId>,
    spin_period: f32,
}

impl DemoScene for FloorScene {
    fn name(&self) -> &'static str {
        "floor"
    }

    fn build(&mut self, config: &MirrorConfig, aspect: f32) -> Result<SceneSetup> {
        let demo = &config.demo;
        let settings = &config.reflector;
        self.spin_period = demo.spin_period;

        let mut scene = Scene::new();
        scene.root = Transform::from_translation(Vec3::new(0.0, -1.0, 0.0));
        let quad = scene.add_mesh(Mesh::plane(settings.plane.size[0], settings.plane.size[1]));
        let floor = scene.add_node(
            "floor",
            quad,
            Transform::from_position_euler(settings.plane.position, settings.plane.rotation),
            NodeMaterial::Reflector,
        );

        let torus = scene.add_mesh(Mesh::torus(0.55, 0.2, 64, 24));
        let model = scene.add_node(
            "model",
            torus,
            Transform::from_translation(Vec3::new(0.0, 0.8, 0.0)),
            NodeMaterial::Standard(PbrParams {
                metalness: 0.9,
                roughness: 0.25,
                ..PbrParams::from_color(Vec3::new(0.9, 0.75, 0.5))
            }),
        );
        self.model = Some(model);
        let ball = scene.add_mesh(Mesh::uv_sphere(0.25, 32, 16));
        scene.add_node(
            "lamp",
            ball,
            Transform::from_translation(Vec3::new(1.6, 0.25, -0.8)),
            NodeMaterial::Standard(PbrParams::emitter(Vec3::new(1.0, 0.55, 0.25), 4.0)),
        );

        let base = parse_hex_linear(&demo.floor_color).unwrap_or_else(|| {
            warn!("demo: cannot parse floor colour {:?}, using grey", demo.floor_color);
            Vec3::splat(0.35)
        });
        let maps = FloorMaps::load(demo)?;
        let pbr = PbrParams {
            metalness: demo.floor_metalness,
            roughness: demo.floor_roughness,
            env_intensity: demo.env_intensity,
            roughness_map: Some(maps.roughness),
            normal_map: Some(maps.normal),
            normal_scale: Vec2::from(demo.normal_scale),
            map_repeat: Vec2::splat(demo.map_repeat),
            ..PbrParams::from_color(base)
        };
        let material = ReflectorMaterial::new(pbr, settings)?.with_distortion_map(maps.distortion);

        let frame = FrameParams {
            ambient: Vec3::splat(demo.ambient),
            lights: vec![
                Light::Directional {
                    direction: Vec3::new(-0.4, -1.0, -0.3),
                    color: Vec3::ONE,
                    intensity: 1.5,
                },
                Light::Point {
                    position: Vec3::new(1.6, -0.6, -0.8),
                    color: Vec3::new(1.0, 0.55, 0.25),
                    intensity: 3.0,
                    range: 6.0,
                },
            ],
            ..FrameParams::default()
        };
        let camera = Camera::new(
            Vec3::from(demo.camera_position),
            Vec3::from(demo.camera_target),
            demo.camera_fov,
            aspect,
        );

        Ok(SceneSetup {
            scene,
            plane: ReflectivePlane::new(floor, settings.plane.size),
            material,
            frame,
            camera,
        })
    }

    fn update(&mut self, scene: &mut Scene, elapsed: f32) {
        let Some(node) = self.model.and_then(|id| scene.node_mut(id)) else {
            return;
        };
        let turn = if self.spin_period > 0.0 { elapsed / self.spin_period } else { 0.0 };
        node.transform.rotation = Quat::from_rotation_y(turn * TAU) * Quat::from_rotation_x(0.4);
    }
}
