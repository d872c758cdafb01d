//! Identity and lifetime of the three reflection targets.

use crate::error::{ReflectorError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetSlot {
    Sharp,
    Blurred,
    Depth,
}

impl TargetSlot {
    pub const ALL: [TargetSlot; 3] = [TargetSlot::Sharp, TargetSlot::Blurred, TargetSlot::Depth];

    pub fn format(self) -> wgpu::TextureFormat {
        match self {
            TargetSlot::Sharp | TargetSlot::Blurred => COLOR_TARGET_FORMAT,
            TargetSlot::Depth => DEPTH_TARGET_FORMAT,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TargetSlot::Sharp => "reflection-sharp",
            TargetSlot::Blurred => "reflection-blurred",
            TargetSlot::Depth => "reflection-depth",
        }
    }
}

pub const COLOR_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Names one target of one allocation generation. Materials hold these, never textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetHandle {
    pub slot: TargetSlot,
    pub generation: u64,
    pub resolution: u32,
}

/// Generation bookkeeping shared by every backend.
#[derive(Clone, Debug, Default)]
pub struct TargetSet {
    generation: u64,
    resolution: u32,
    allocated: bool,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (re)allocation; invalidates every handle issued before.
    pub fn allocated(&mut self, resolution: u32) {
        self.generation += 1;
        self.resolution = resolution;
        self.allocated = true;
    }

    pub fn released(&mut self) {
        self.allocated = false;
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn handle(&self, slot: TargetSlot) -> Result<TargetHandle> {
        if !self.allocated {
            return Err(ReflectorError::MissingTarget(slot));
        }
        Ok(TargetHandle {
            slot,
            generation: self.generation,
            resolution: self.resolution,
        })
    }

    pub fn validate(&self, handle: TargetHandle) -> Result<()> {
        if !self.allocated {
            return Err(ReflectorError::MissingTarget(handle.slot));
        }
        if handle.generation != self.generation {
            return Err(ReflectorError::StaleTarget {
                slot: handle.slot,
                requested: handle.generation,
                current: self.generation,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_require_allocation() {
        let set = TargetSet::new();
        assert!(matches!(
            set.handle(TargetSlot::Sharp),
            Err(ReflectorError::MissingTarget(TargetSlot::Sharp))
        ));

    }

    #[test]
    fn reallocation_invalidates_handles() {
        let mut set = TargetSet::new();
        set.allocated(256);
        let old = set.handle(TargetSlot::Depth).unwrap();
        assert!(set.validate(old).is_ok());

        set.allocated(512);
        let new = set.handle(TargetSlot::Depth).unwrap();
        assert_eq!(new.resolution, 512);
        assert!(set.validate(new).is_ok());
        match set.validate(old) {
            Err(ReflectorError::StaleTarget { slot, requested, current }) => {
                assert_eq!(slot, TargetSlot::Depth);
                assert_eq!(requested, old.generation);
                assert_eq!(current, new.generation);
            }
            other => panic!("expected StaleTarget, got {other:?}"),
        }
    }

    #[test]
    fn formats() {
        assert_eq!(TargetSlot::Sharp.format(), wgpu::TextureFormat::Rgba16Float);
        assert_eq!(TargetSlot::Depth.format(), wgpu::TextureFormat::Depth32Float);
    }
}
