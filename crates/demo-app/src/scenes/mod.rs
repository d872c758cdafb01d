use anyhow::Result;
use reflector_config::MirrorConfig;
use reflector_core::{Camera, FrameParams, ReflectivePlane, ReflectorMaterial, Scene};

/// Everything a demo hands to the render loop.
pub struct SceneSetup {
    pub scene: Scene,
    pub plane: ReflectivePlane,
    pub material: ReflectorMaterial,
    pub frame: FrameParams,
    pub camera: Camera,
}

pub trait DemoScene {
    fn name(&self) -> &'static str;

    fn build(&mut self, config: &MirrorConfig, aspect: f32) -> Result<SceneSetup>;

    /// Animate node transforms; `elapsed` is seconds since start.
    fn update(&mut self, _scene: &mut Scene, _elapsed: f32) {}
}

/// `DEMO_SCENE=wall` or `--scene=wall` picks the wall mirror; the floor is the default.
pub fn select() -> Box<dyn DemoScene> {
    let scene_env = std::env::var("DEMO_SCENE").ok();
    let wall_flag = std::env::args().any(|a| a == "--scene=wall" || a == "--wall");
    if scene_env.as_deref() == Some("wall") || wall_flag {

        Box::new(wall::WallScene::default())
    } else {
        Box::new(floor::FloorScene::default())
    }
}

pub mod floor;
pub mod wall;
