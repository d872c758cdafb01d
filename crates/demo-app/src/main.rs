use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use glam::Vec2;
use log::{error, info, warn};
use reflector_config::MirrorConfig;
use reflector_core::{GpuContext, ReflectorRenderer, Transform, make_surface_config};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

mod maps;
mod scenes;
mod slerp;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = MirrorConfig::load();
    config
        .reflector
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid [reflector] settings")?;

    let event_loop = EventLoop::new()?;
    let [width, height] = config.rendering.window_size;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Planar Reflector Demo")
            .with_inner_size(PhysicalSize::new(width, height))
            .build(&event_loop)?,
    );

    let instance = wgpu::Instance::default();
    let surface = instance.create_surface(window.clone())?;
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: Some(&surface),
    }))
    .context("No suitable GPU adapters found")?;
    let gpu = GpuContext::request(&adapter)?;

    let mut size = window.inner_size();
    let vsync = config.rendering.vsync;
    let mut surface_config =
        make_surface_config(&adapter, &surface, size.width, size.height, vsync)?;
    surface.configure(&gpu.device, &surface_config);

    let mut demo = scenes::select();
    let aspect = size.width.max(1) as f32 / size.height.max(1) as f32;
    let mut setup = demo.build(&config, aspect)?;
    info!("demo: running {} scene", demo.name());

    let mut renderer = ReflectorRenderer::new(
        gpu.device.clone(),
        gpu.queue.clone(),
        surface_config.format,
        (size.width, size.height),
        setup.plane,
        &config.reflector,
    )?;
    renderer.set_background(config.rendering.background);

    let root = setup.scene.root;
    let mut pointer = slerp::PointerSlerp::default();
    let start = Instant::now();
    let mut last = start;

    event_loop.run(move |event, target| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            window_id,
        } if window_id == window.id() => {
            target.exit();
        }
        Event::WindowEvent {
            event: WindowEvent::Resized(new_size),
            window_id,
        } if window_id == window.id() => {
            if new_size.width > 0 && new_size.height > 0 {
                size = new_size;
                surface_config.width = size.width;
                surface_config.height = size.height;
                surface.configure(&gpu.device, &surface_config);
                renderer.resize(size.width, size.height);
                setup.camera.aspect = size.width as f32 / size.height as f32;
            }
        }
        Event::WindowEvent {
            event: WindowEvent::CursorMoved { position, .. },
            window_id,
        } if window_id == window.id() => {
            let ndc = Vec2::new(
                position.x as f32 / size.width.max(1) as f32 * 2.0 - 1.0,
                1.0 - position.y as f32 / size.height.max(1) as f32 * 2.0,
            );
            pointer.set_pointer(ndc);
        }
        Event::WindowEvent {
            event:
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key,
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                },
            window_id,
        } if window_id == window.id() => match logical_key {
            Key::Named(NamedKey::Escape) => target.exit(),
            Key::Character(c) => match c.as_str() {
                "0" | "1" | "2" | "3" | "4" => {
                    if let Ok(v) = c.parse::<u32>() {
                        if let Err(e) = setup.material.set_debug_view(v) {
                            warn!("demo: {e}");
                        }
                    }
                }
                "[" | "]" => {
                    let current = renderer.manager().resolution().max(1);
                    let next = if c.as_str() == "]" { current * 2 } else { current / 2 };
                    match renderer.manager_mut().request_resolution(next) {
                        Ok(()) => info!("demo: reflection resolution -> {next}"),
                        Err(e) => warn!("demo: {e}"),
                    }
                }
                _ => {}
            },
            _ => {}
        },
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            window_id,
        } if window_id == window.id() => {
            let now = Instant::now();
            let dt = (now - last).as_secs_f32();
            last = now;
            setup.scene.root = Transform {
                rotation: pointer.step(dt) * root.rotation,
                ..root
            };
            demo.update(&mut setup.scene, (now - start).as_secs_f32());

            match surface.get_current_texture() {
                Ok(frame) => {
                    let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
                    let result = renderer.render(
                        &setup.scene,
                        &setup.camera,
                        &setup.frame,
                        &mut setup.material,
                        &view,
                    );
                    if let Err(e) = result {
                        error!("demo: frame failed: {e}");
                    }

                    frame.present();
                }
                Err(_) => {
                    surface.configure(&gpu.device, &surface_config);
                }
            }
        }
        Event::AboutToWait => {
            window.request_redraw();
        }
        _ => {}
    })?;

    Ok(())
}
