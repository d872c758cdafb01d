//! Reflector configuration
//!
//! Loads `reflector.toml` (or the file named by `REFLECTOR_CONFIG`), falls back
//! to defaults, then applies environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "reflector.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Reflective surface settings
    pub reflector: ReflectorSettings,
    /// Surface/present settings
    pub rendering: RenderingSettings,
    /// Demo scene settings
    pub demo: DemoSettings,
}

/// Settings of one reflective plane and its composite material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectorSettings {
    /// Side length of the square sharp/blur/depth targets
    pub resolution: u32,
    /// Overall reflection strength in [0, 1]
    pub mirror: f32,
    /// Horizontal and vertical blur radii in pixels
    pub blur: [f32; 2],
    /// Number of horizontal + vertical pass pairs
    pub blur_iterations: u32,
    pub mix_blur: f32,
    pub mix_strength: f32,
    pub min_depth_threshold: f32,
    pub max_depth_threshold: f32,
    /// Depth fade magnitude; values above zero enable the depth feature
    pub depth_scale: f32,
    pub depth_to_blur_ratio_bias: f32,
    pub distortion: f32,
    /// Debug view selector (0 = normal shading)
    pub debug: u32,
    /// Offset of the oblique clip plane along the mirror normal
    pub clip_bias: f32,
    /// Linear clear colour of the sharp target
    pub clear_color: [f32; 4],
    pub plane: PlaneSettings,
}

/// World placement of the reflective quad.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaneSettings {
    /// Full width and height
    pub size: [f32; 2],
    pub position: [f32; 3],
    /// Euler XYZ rotation in radians
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderingSettings {
    /// Prefer FIFO presentation
    pub vsync: bool,
    pub window_size: [u32; 2],
    /// Linear clear colour of the main view
    pub background: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoSettings {
    /// Optional image files; procedural maps are generated when absent
    pub roughness_map: Option<PathBuf>,
    pub normal_map: Option<PathBuf>,
    pub distortion_map: Option<PathBuf>,
    pub map_repeat: f32,
    /// Floor base colour as `#rrggbb`
    pub floor_color: String,
    pub floor_metalness: f32,
    pub floor_roughness: f32,
    pub normal_scale: [f32; 2],
    pub env_intensity: f32,
    pub ambient: f32,
    pub camera_position: [f32; 3],
    pub camera_target: [f32; 3],
    /// Vertical field of view in degrees
    pub camera_fov: f32,
    /// Seconds per full turn of the showcased model
    pub spin_period: f32,
}

impl Default for ReflectorSettings {
    fn default() -> Self {
        Self {
            resolution: 256,
            mirror: 0.0,
            blur: [0.0, 0.0],
            blur_iterations: 1,
            mix_blur: 0.0,
            mix_strength: 0.5,
            min_depth_threshold: 0.9,
            max_depth_threshold: 1.0,
            depth_scale: 0.0,
            depth_to_blur_ratio_bias: 0.25,
            distortion: 1.0,
            debug: 0,
            clip_bias: 0.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            plane: PlaneSettings::default(),
        }
    }
}

impl Default for PlaneSettings {
    fn default() -> Self {
        Self {
            size: [16.0, 16.0],
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0],
        }
    }
}

impl Default for RenderingSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            window_size: [1280, 720],
            background: [0.0, 0.0, 0.0],
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            roughness_map: None,
            normal_map: None,
            distortion_map: None,
            map_repeat: 4.0,
            floor_color: "#a0a0a0".to_string(),
            floor_metalness: 0.2,
            floor_roughness: 1.0,
            normal_scale: [0.5, 0.5],
            env_intensity: 0.08,
            ambient: 0.1,
            camera_position: [10.0, -0.5, 9.0],
            camera_target: [2.5, -0.4, 0.0],
            camera_fov: 15.0,
            spin_period: 12.0,
        }
    }
}

impl ReflectorSettings {
    /// The floor setup the demo showcases.
    pub fn showcase() -> Self {
        Self {
            resolution: 1024,
            mirror: 1.0,
            blur: [150.0, 200.0],
            mix_blur: 8.0,
            mix_strength: 5.0,
            min_depth_threshold: 0.5,
            max_depth_threshold: 2.0,
            depth_scale: 4.0,
            depth_to_blur_ratio_bias: 0.7,
            distortion: 0.1,
            plane: PlaneSettings {
                size: [16.0, 16.0],
                position: [3.0, 0.0, 2.0],
                rotation: [-std::f32::consts::FRAC_PI_2, 0.0, 0.0],
            },
            ..Self::default()
        }
    }

    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.resolution == 0 {
            return Err("resolution must be greater than zero".to_string());
        }
        if self.blur_iterations == 0 {
            return Err("blur_iterations must be at least 1".to_string());
        }
        if self.blur.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(format!("blur radii must be finite and non-negative, got {:?}", self.blur));
        }
        if self.debug > 4 {
            return Err(format!("debug view {} is outside 0..=4", self.debug));
        }
        let scalars = [
            ("mirror", self.mirror),
            ("mix_blur", self.mix_blur),
            ("mix_strength", self.mix_strength),
            ("min_depth_threshold", self.min_depth_threshold),
            ("max_depth_threshold", self.max_depth_threshold),
            ("depth_scale", self.depth_scale),
            ("depth_to_blur_ratio_bias", self.depth_to_blur_ratio_bias),
            ("distortion", self.distortion),
            ("clip_bias", self.clip_bias),
        ];
        if let Some((name, _)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("{name} must be finite"));
        }
        if self.plane.size.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(format!("plane size must be positive, got {:?}", self.plane.size));
        }
        Ok(())
    }
}

impl MirrorConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Load from `REFLECTOR_CONFIG` or `reflector.toml`, or return defaults
    /// if the file does not exist or fails to parse.
    pub fn load_or_default() -> Self {
        let path = std::env::var("REFLECTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from_file(path).unwrap_or_default()
    }

    /// Environment variables take precedence over file values.
    pub fn merge_with_env(&mut self) {
        if let Ok(val) = std::env::var("REFLECTOR_RESOLUTION") {
            if let Ok(res) = val.trim().parse::<u32>() {
                self.reflector.resolution = res;
            }
        }
        if let Ok(val) = std::env::var("REFLECTOR_DEBUG") {
            if let Ok(debug) = val.trim().parse::<u32>() {
                self.reflector.debug = debug;
            }
        }
        if let Ok(val) = std::env::var("REFLECTOR_MIRROR") {
            if let Ok(mirror) = val.trim().parse::<f32>() {
                self.reflector.mirror = mirror;
            }
        }
        if let Ok(val) = std::env::var("REFLECTOR_MIX_STRENGTH") {
            if let Ok(strength) = val.trim().parse::<f32>() {
                self.reflector.mix_strength = strength;
            }
        }
        if let Ok(val) = std::env::var("REFLECTOR_BLUR") {
            if let Some(blur) = parse_pair(&val) {
                self.reflector.blur = blur;
            }
        }
    }

    /// Recommended entry point: file (or defaults) then environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_or_default();
        config.merge_with_env();
        config
    }
}

/// Parses `"x,y"`; a single number is used for both axes.
fn parse_pair(val: &str) -> Option<[f32; 2]> {
    let mut parts = val.split(',').map(|p| p.trim().parse::<f32>());
    let x = parts.next()?.ok()?;
    let y = match parts.next() {
        Some(p) => p.ok()?,
        None => x,
    };
    if parts.next().is_some() {
        return None;
    }
    Some([x, y])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.reflector.resolution, 256);
        assert_eq!(config.reflector.mirror, 0.0);
        assert_eq!(config.reflector.mix_strength, 0.5);
        assert_eq!(config.reflector.min_depth_threshold, 0.9);
        assert_eq!(config.reflector.max_depth_threshold, 1.0);
        assert_eq!(config.reflector.depth_to_blur_ratio_bias, 0.25);
        assert_eq!(config.reflector.plane.size, [16.0, 16.0]);
        assert!(config.reflector.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = MirrorConfig {
            reflector: ReflectorSettings::showcase(),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: MirrorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: MirrorConfig = toml::from_str(
            r#"
            [reflector]
            mirror = 1.0
            blur = [150.0, 200.0]

            [reflector.plane]
            position = [3.0, 0.0, 2.0]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.reflector.mirror, 1.0);
        assert_eq!(parsed.reflector.blur, [150.0, 200.0]);
        assert_eq!(parsed.reflector.resolution, 256);
        assert_eq!(parsed.reflector.plane.size, [16.0, 16.0]);
        assert_eq!(parsed.reflector.plane.position, [3.0, 0.0, 2.0]);
    }

    #[test]
    fn test_load_or_default() {
        // Should not panic even if reflector.toml doesn't exist
        let config = MirrorConfig::load_or_default();
        assert!(config.reflector.resolution > 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut s = ReflectorSettings::default();
        s.resolution = 0;
        assert!(s.validate().is_err());

        let mut s = ReflectorSettings::default();
        s.debug = 5;
        assert!(s.validate().is_err());

        let mut s = ReflectorSettings::default();
        s.blur = [-1.0, 0.0];
        assert!(s.validate().is_err());

        let mut s = ReflectorSettings::default();
        s.mix_blur = f32::NAN;
        assert!(s.validate().unwrap_err().contains("mix_blur"));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("150, 200"), Some([150.0, 200.0]));
        assert_eq!(parse_pair("8"), Some([8.0, 8.0]));
        assert_eq!(parse_pair("1,2,3"), None);
        assert_eq!(parse_pair("a,2"), None);
    }

    #[test]
    fn test_merge_with_env() {
        unsafe {
            std::env::set_var("REFLECTOR_RESOLUTION", "512");
            std::env::set_var("REFLECTOR_DEBUG", "3");
            std::env::set_var("REFLECTOR_MIRROR", "0.75");
            std::env::set_var("REFLECTOR_MIX_STRENGTH", "2");
            std::env::set_var("REFLECTOR_BLUR", "10,20");
        }

        let mut config = MirrorConfig::default();
        config.merge_with_env();

        assert_eq!(config.reflector.resolution, 512);
        assert_eq!(config.reflector.debug, 3);
        assert_eq!(config.reflector.mirror, 0.75);
        assert_eq!(config.reflector.mix_strength, 2.0);
        assert_eq!(config.reflector.blur, [10.0, 20.0]);

        unsafe {
            std::env::remove_var("REFLECTOR_RESOLUTION");
            std::env::remove_var("REFLECTOR_DEBUG");
            std::env::remove_var("REFLECTOR_MIRROR");
            std::env::remove_var("REFLECTOR_MIX_STRENGTH");
            std::env::remove_var("REFLECTOR_BLUR");
        }
    }
}
