use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum MotionError {
    #[error("limiter switch did not close after {steps} steps in {elapsed:?}, switch stuck open or motor disconnected")]
    SwitchTimeout { steps: i32, elapsed: Duration },

    #[error("limiter switch still closed after backing off {steps} steps")]
    SwitchStuckClosed { steps: i32 },

    #[error("calibration sweep incomplete, expected {expected} samples, got {collected}")]
    IncompleteSweep { expected: usize, collected: usize },

    #[error("motor drive fault: {0}")]
    Drive(String),
}

impl MotionError {
    /// Faults of the homing protocol leave the step count untrustworthy.
    pub fn position_lost(&self) -> bool {
        matches!(
            self,
            MotionError::SwitchTimeout { .. } | MotionError::Drive(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, MotionError>;
