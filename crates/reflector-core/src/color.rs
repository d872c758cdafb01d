use std::str::FromStr;

use glam::{Vec3, Vec4};
use palette::{FromColor, LinSrgb, LinSrgba, Srgb, Srgba};

// sRGB → linear conversions for material inputs. Shaders only ever see linear values.

/// sRGB u8 RGBA to linear floats (straight alpha).
#[inline]
pub fn srgba_u8_to_linear(c: [u8; 4]) -> Vec4 {
    let s = Srgba::new(
        c[0] as f32 / 255.0,
        c[1] as f32 / 255.0,
        c[2] as f32 / 255.0,
        c[3] as f32 / 255.0,
    );
    let lin: LinSrgba = LinSrgba::from_color(s);
    Vec4::new(lin.red, lin.green, lin.blue, lin.alpha)
}

/// sRGB float RGB to linear.
#[inline]
pub fn srgb_to_linear(c: [f32; 3]) -> Vec3 {
    let lin: LinSrgb = Srgb::new(c[0], c[1], c[2]).into_linear();
    Vec3::new(lin.red, lin.green, lin.blue)
}

/// Linear RGB back to sRGB u8, for readbacks and screenshots.
#[inline]
pub fn linear_to_srgb_u8(c: Vec3) -> [u8; 3] {
    let s: Srgb = Srgb::from_linear(LinSrgb::new(c.x.max(0.0), c.y.max(0.0), c.z.max(0.0)));
    [
        (s.red * 255.0).round().clamp(0.0, 255.0) as u8,
        (s.green * 255.0).round().clamp(0.0, 255.0) as u8,
        (s.blue * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Parse `#rrggbb` (or `rrggbb`) into linear RGB.
pub fn parse_hex_linear(hex: &str) -> Option<Vec3> {
    let srgb = Srgb::<u8>::from_str(hex.trim()).ok()?;
    Some(srgb_to_linear([
        srgb.red as f32 / 255.0,
        srgb.green as f32 / 255.0,
        srgb.blue as f32 / 255.0,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parses_to_linear() {
        let c = parse_hex_linear("#a0a0a0").unwrap();
        // 160/255 in sRGB is roughly 0.35 linear
        assert!((c.x - 0.3515).abs() < 1e-3);
        assert_eq!(c.x, c.y);
        assert!(parse_hex_linear("not a colour").is_none());
    }

    #[test]
    fn white_and_black_are_fixed_points() {
        assert!((srgba_u8_to_linear([255, 255, 255, 255]) - Vec4::ONE).length() < 1e-5);
        assert!(srgba_u8_to_linear([0, 0, 0, 0]).length() < 1e-6);
        assert_eq!(linear_to_srgb_u8(Vec3::ONE), [255, 255, 255]);
    }

    #[test]
    fn round_trip_grey() {
        let v = 153.0 / 255.0;
        let lin = srgb_to_linear([v, v, v]);
        assert_eq!(linear_to_srgb_u8(lin), [153, 153, 153]);
    }
}
