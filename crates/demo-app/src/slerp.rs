use glam::{EulerRot, Quat, Vec2};

/// Eases the scene root towards an orientation picked by the pointer.
pub struct PointerSlerp {
    current: Quat,
    target: Quat,
    /// Approach speed in 1/s.
    rate: f32,
}

impl Default for PointerSlerp {
    fn default() -> Self {
        Self {
            current: Quat::IDENTITY,
            target: Quat::IDENTITY,
            rate: 3.0,
        }
    }
}

impl PointerSlerp {
    /// `ndc` is the pointer in [-1, 1] with +y up.
    pub fn set_pointer(&mut self, ndc: Vec2) {
        let ndc = ndc.clamp(Vec2::NEG_ONE, Vec2::ONE);
        self.target = Quat::from_euler(EulerRot::YXZ, ndc.x * 0.25, -ndc.y * 0.08, 0.0);
    }

    pub fn step(&mut self, dt: f32) -> Quat {
        let t = 1.0 - (-self.rate * dt.max(0.0)).exp();
        self.current = self.current.slerp(self.target, t).normalize();
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_target() {
        let mut s = PointerSlerp::default();
        s.set_pointer(Vec2::new(1.0, 0.0));
        let first = s.step(1.0 / 60.0);
        assert!(first.angle_between(Quat::IDENTITY) > 0.0);
        for _ in 0..600 {
            s.step(1.0 / 60.0);
        }
        assert!(s.current.angle_between(s.target) < 1e-3);
    }
}
