//! Error types for the reflection pipeline.

use reflector_shaders::ComposeError;
use thiserror::Error;

use crate::targets::TargetSlot;

/// Result type for reflection operations.
pub type Result<T> = std::result::Result<T, ReflectorError>;

#[derive(Error, Debug)]
pub enum ReflectorError {
    /// Resolution is zero or above the backend limit.
    #[error("invalid reflection resolution {0}")]
    InvalidResolution(u32),

    /// Immediate resize requested between begin_frame and end_frame.
    #[error("cannot reallocate reflection targets while a frame is in progress")]
    ResizeInFlight,

    #[error("frame operation called outside begin_frame/end_frame")]
    NotInFrame,

    #[error("begin_frame called while a frame is already in progress")]
    FrameInProgress,

    #[error("{slot:?} target handle is from generation {requested}, current is {current}")]
    StaleTarget {
        slot: TargetSlot,
        requested: u64,
        current: u64,
    },

    #[error("{0:?} target has not been allocated")]
    MissingTarget(TargetSlot),

    #[error("debug view {0} is outside 0..=4")]
    InvalidDebugView(u32),

    #[error("shader composition failed: {0}")]
    Compose(#[from] ComposeError),

    /// GPU validation error, resource exhaustion or similar.
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
