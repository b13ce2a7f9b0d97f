mod drive;
mod error;
mod motion;
mod states;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use drive::{Drive, Uln2003};
pub use error::{MotionError, Result};
pub use motion::{first_peak, Advance, Calibration, Journal, Motion, MotionConfig, Phase, Sample};
pub use states::{CompassOffsets, Homing, MotorState, Rotation, StepOutcome, SUN_DEGREES_PER_MINUTE};
