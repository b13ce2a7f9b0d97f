// This module contains the step-count model of the turntable.
// Everything here is plain data; the hardware lives in `motion.rs`.

/// Apparent motion of the sun across the sky, degrees per minute.
pub const SUN_DEGREES_PER_MINUTE: f32 = 360.0 / (24.0 * 60.0);

/// Rotational sense of a single step.
///
/// Clockwise moves the panel away from the limiter switch and increments the
/// step count; counterclockwise moves it towards the switch.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    pub fn delta(&self) -> i32 {
        match self {
            Rotation::Clockwise => 1,
            Rotation::CounterClockwise => -1,
        }
    }
}

/// Result of a bounded step request.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum StepOutcome {
    Moved,
    /// The step would leave the allowed travel, nothing was issued.
    AtLimit,
}

/// What homing does once the limiter switch has closed.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum Homing {
    /// Step clockwise until the switch reopens and remember the count.
    #[default]
    BackOff,
    /// Stay on the closed switch at step zero.
    KeepClosed,
}

/// Step positions of the compass directions, derived from the south step.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct CompassOffsets {
    pub east: i32,
    pub southeast: i32,
    pub south: i32,
    pub southwest: i32,
    pub west: i32,
}

impl CompassOffsets {
    /// `quarter` and `eighth` are the step counts for 90 and 45 degrees.
    pub fn from_south(south: i32, quarter: i32, eighth: i32, max_steps: i32) -> Self {
        let clamp = |step: i32| step.clamp(1, max_steps.max(1));
        CompassOffsets {
            east: clamp(south - quarter),
            southeast: clamp(south - eighth),
            south,
            southwest: clamp(south + eighth),
            west: clamp(south + quarter),
        }
    }
}

/// Everything the turntable knows about its own position.
///
/// `0 <= steps_taken <= max_steps_to_rotate` holds at rest. Homing is the only
/// operation allowed to pass below zero, and it ends by resetting the count.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct MotorState {
    pub steps_taken: i32,
    pub max_steps_to_rotate: i32,
    pub south_step: Option<i32>,
    pub microswitch_steps: i32,
    pub table_turning: bool,
}

impl MotorState {
    pub fn new(max_steps_to_rotate: i32) -> Self {
        MotorState {
            steps_taken: 0,
            max_steps_to_rotate,
            south_step: None,
            microswitch_steps: 0,
            table_turning: false,
        }
    }

    /// True while the platform sits in the switch's dead zone, where homing
    /// again would not change anything.
    pub fn within_switch_zone(&self) -> bool {
        self.steps_taken <= self.microswitch_steps
    }

    /// A count at the travel limit cannot be advanced from, and it is also
    /// where a forgotten position is parked. Either way only homing helps.
    pub fn position_lost(&self) -> bool {
        self.steps_taken >= self.max_steps_to_rotate
    }
}

impl Default for MotorState {
    fn default() -> Self {
        MotorState::new(900)
    }
}
