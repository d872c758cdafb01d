/// Example program to print the loaded configuration
///
/// Run with: cargo run -p reflector-config --example print_config

fn main() {
    let config = reflector_config::MirrorConfig::load();

    println!("=== Reflector Configuration ===\n");

    let r = &config.reflector;
    println!("Reflector Settings:");
    println!("  Resolution: {}", r.resolution);
    println!("  Mirror: {}", r.mirror);
    println!("  Blur: {:?} x{}", r.blur, r.blur_iterations);
    println!("  Mix Blur / Strength: {} / {}", r.mix_blur, r.mix_strength);
    println!("  Depth Thresholds: {} .. {}", r.min_depth_threshold, r.max_depth_threshold);
    println!("  Depth Scale: {}", r.depth_scale);
    println!("  Debug View: {}", r.debug);
    println!("  Plane: {:?} at {:?}", r.plane.size, r.plane.position);
    if let Err(e) = r.validate() {
        println!("  INVALID: {e}");
    }
    println!();

    println!("Rendering Settings:");
    println!("  VSync: {}", config.rendering.vsync);
    println!("  Window Size: {:?}", config.rendering.window_size);
    println!();

    match toml::to_string_pretty(&config) {
        Ok(toml_str) => {
            println!("=== Serialized Configuration ===");
            println!("{}", toml_str);
        }
        Err(e) => {
            eprintln!("Failed to serialize config: {}", e);
        }
    }
}
