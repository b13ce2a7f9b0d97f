use std::fmt;
use std::time::{Duration, Instant};

use embedded_hal::digital::InputPin;
use sensors::Voltmeter;

use crate::drive::Drive;
use crate::error::{MotionError, Result};
use crate::states::{CompassOffsets, Homing, MotorState, Rotation, StepOutcome, SUN_DEGREES_PER_MINUTE};

// 28BYJ-48: ~509 half-steps per output shaft turn, 9:18 spur gears to the table.
const DEFAULT_STEPS_PER_REVOLUTION: i32 = 1018;
// A full turn takes about 22 seconds at the default step delay.
const DEFAULT_HOMING_TIMEOUT: Duration = Duration::from_secs(22);
const DEFAULT_BACKOFF_LIMIT: i32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    pub steps_per_revolution: i32,
    pub homing_timeout: Duration,
    pub homing_step_limit: i32,
    pub backoff_step_limit: i32,
}

impl MotionConfig {
    pub fn new(steps_per_revolution: i32, homing_timeout: Duration) -> Self {
        MotionConfig {
            steps_per_revolution,
            homing_timeout,
            homing_step_limit: steps_per_revolution,
            backoff_step_limit: DEFAULT_BACKOFF_LIMIT,
        }
    }

    pub fn steps_for_degrees(&self, degrees: f32) -> i32 {
        (self.steps_per_revolution as f32 * degrees / 360.0).round() as i32
    }

    /// How far the table turns per minute to keep up with the sun.
    pub fn steps_per_minute(&self) -> f32 {
        self.steps_per_revolution as f32 * SUN_DEGREES_PER_MINUTE / 360.0
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig::new(DEFAULT_STEPS_PER_REVOLUTION, DEFAULT_HOMING_TIMEOUT)
    }
}

/// Lifecycle milestones worth keeping for post-mortem diagnosis.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Phase {
    HomingStarted,
    HomingFinished,
    HomingFailed,
    SweepStarted,
    SweepFinished,
    SweepFailed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::HomingStarted => "homing started",
            Phase::HomingFinished => "homing finished",
            Phase::HomingFailed => "homing failed",
            Phase::SweepStarted => "sweep started",
            Phase::SweepFinished => "sweep finished",
            Phase::SweepFailed => "sweep failed",
        };
        f.write_str(text)
    }
}

/// Receives phase transitions as they happen.
pub trait Journal {
    fn note(&self, phase: Phase);
}

struct Silent;

impl Journal for Silent {
    fn note(&self, _phase: Phase) {}
}

/// One panel voltage reading taken during a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub step: i32,
    pub volts: f32,
}

/// Outcome of a completed calibration sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub peak_index: usize,
    pub peak_volts: f32,
    pub samples: usize,
    pub steps_taken: i32,
    pub south_latched: bool,
}

/// Outcome of an elapsed-time advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub requested: i32,
    pub moved: i32,
    pub corrected: i32,
}

/// Index of the first maximum. Earlier wins on ties, so the way back is shortest.
pub fn first_peak(samples: &[Sample]) -> Option<(usize, f32)> {
    let mut peak: Option<(usize, f32)> = None;
    for (i, sample) in samples.iter().enumerate() {
        match peak {
            Some((_, best)) if sample.volts <= best => {}
            _ => peak = Some((i, sample.volts)),
        }
    }
    peak
}

pub struct Motion<D, S, P> {
    drive: D,
    switch: S,
    panel: P,
    config: MotionConfig,
    state: MotorState,
    offsets: Option<CompassOffsets>,
    journal: Box<dyn Journal>,
}

impl<D, S, P> Motion<D, S, P>
where
    D: Drive,
    S: InputPin,
    P: Voltmeter,
{
    pub fn new(drive: D, switch: S, panel: P, config: MotionConfig, state: MotorState) -> Self {
        let offsets = Self::offsets_for(&config, &state);
        Motion {
            drive,
            switch,
            panel,
            config,
            state,
            offsets,
            journal: Box::new(Silent),
        }
    }

    pub fn with_journal(mut self, journal: impl Journal + 'static) -> Self {
        self.journal = Box::new(journal);
        self
    }

    fn offsets_for(config: &MotionConfig, state: &MotorState) -> Option<CompassOffsets> {
        state.south_step.map(|south| {
            CompassOffsets::from_south(
                south,
                config.steps_for_degrees(90.0),
                config.steps_for_degrees(45.0),
                state.max_steps_to_rotate,
            )
        })
    }

    pub fn state(&self) -> &MotorState {
        &self.state
    }

    pub fn offsets(&self) -> Option<CompassOffsets> {
        self.offsets
    }

    /// The limiter switch pulls its input low when closed.
    pub fn switch_closed(&mut self) -> bool {
        match self.switch.is_low() {
            Ok(closed) => closed,
            Err(e) => {
                log::warn!("Limiter switch read failed: {:?}", e);
                false
            }
        }
    }

    /// Mark the step count as unknown so the next positioning re-homes.
    pub fn forget_position(&mut self) {
        log::warn!(
            "Step count {} no longer trusted, homing required",
            self.state.steps_taken
        );
        self.state.steps_taken = self.state.max_steps_to_rotate;
    }

    // Every physical step goes through here, and nothing else touches the count
    // except the zero reset when homing closes the switch.
    fn advance(&mut self, rotation: Rotation) -> Result<()> {
        self.drive
            .step(rotation)
            .map_err(|e| MotionError::Drive(format!("{:#}", e)))?;
        self.state.steps_taken += rotation.delta();
        Ok(())
    }

    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.state.table_turning = true;
        let result = op(self);
        self.state.table_turning = false;
        if let Err(e) = self.drive.release() {
            log::warn!("Failed to release motor coils: {:#}", e);
        }
        result
    }

    /// One step inside the allowed travel `[0, max_steps_to_rotate]`.
    pub fn step(&mut self, rotation: Rotation) -> Result<StepOutcome> {
        match rotation {
            Rotation::Clockwise => {
                if self.state.steps_taken >= self.state.max_steps_to_rotate {
                    log::debug!("Refusing to turn past {} steps", self.state.max_steps_to_rotate);
                    return Ok(StepOutcome::AtLimit);
                }
            }
            Rotation::CounterClockwise => {
                // Inside the switch zone the count is left for homing to correct.
                if self.switch_closed() || self.state.steps_taken <= 0 {
                    log::debug!("Refusing to turn below step zero");
                    return Ok(StepOutcome::AtLimit);
                }
            }
        }
        self.advance(rotation)?;
        Ok(StepOutcome::Moved)
    }

    /// Up to `count` bounded steps, returns how many were taken.
    pub fn steps(&mut self, rotation: Rotation, count: i32) -> Result<i32> {
        let mut moved = 0;
        while moved < count {
            if self.step(rotation)? == StepOutcome::AtLimit {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    pub fn home(&mut self, mode: Homing) -> Result<i32> {
        self.run(|m| m.homing(mode))
    }

    fn homing(&mut self, mode: Homing) -> Result<i32> {
        self.journal.note(Phase::HomingStarted);
        let result = self.seek_switch(mode);
        self.journal.note(match result {
            Ok(_) => Phase::HomingFinished,
            Err(_) => Phase::HomingFailed,
        });
        result
    }

    /// Turn clockwise until the switch opens, returns the steps taken.
    fn clear_switch(&mut self) -> Result<i32> {
        let mut backed = 0;
        while self.switch_closed() {
            if backed >= self.config.backoff_step_limit {
                log::error!("Limiter switch stuck closed after {} steps back", backed);
                return Err(MotionError::SwitchStuckClosed { steps: backed });
            }
            self.advance(Rotation::Clockwise)?;
            backed += 1;
        }
        Ok(backed)
    }

    fn seek_switch(&mut self, mode: Homing) -> Result<i32> {
        // Already closed says nothing about where in the zone the table sits,
        // so the zero is only taken on the closing edge.
        if self.switch_closed() {
            let cleared = self.clear_switch()?;
            log::info!("Started on the limiter switch, cleared it in {} steps", cleared);
        }

        log::info!("Rotating counterclockwise until the limiter switch closes");
        let started = Instant::now();
        let mut steps = 0;
        while !self.switch_closed() {
            let elapsed = started.elapsed();
            if steps >= self.config.homing_step_limit || elapsed >= self.config.homing_timeout {
                log::error!("Limiter switch not found after {} steps", steps);
                return Err(MotionError::SwitchTimeout { steps, elapsed });
            }
            self.advance(Rotation::CounterClockwise)?;
            steps += 1;
        }
        self.state.steps_taken = 0;
        log::info!("Limiter switch closed after {} steps", steps);

        if mode == Homing::KeepClosed {
            return Ok(0);
        }

        let backed = self.clear_switch()?;
        self.state.microswitch_steps = backed;
        log::info!("Limiter switch open again after {} steps", backed);
        Ok(backed)
    }

    /// Full-range scan for the direction of highest panel voltage.
    ///
    /// `at_noon` is asked once the table is back at the peak; only then may the
    /// south reference be latched.
    pub fn sweep(&mut self, at_noon: impl FnOnce() -> bool) -> Result<Calibration> {
        self.run(|m| {
            m.journal.note(Phase::SweepStarted);
            let result = m.scan_for_peak(at_noon);
            m.journal.note(match result {
                Ok(_) => Phase::SweepFinished,
                Err(_) => Phase::SweepFailed,
            });
            result
        })
    }

    fn scan_for_peak(&mut self, at_noon: impl FnOnce() -> bool) -> Result<Calibration> {
        self.homing(Homing::KeepClosed)?;

        let expected = (self.state.max_steps_to_rotate - 1).max(0) as usize;
        log::info!("Sweeping {} steps clockwise", expected);
        let mut samples: Vec<Sample> = Vec::with_capacity(expected);
        let mut reopened_at = None;

        for _ in 0..expected {
            if self.step(Rotation::Clockwise)? == StepOutcome::AtLimit {
                break;
            }
            if reopened_at.is_none() && !self.switch_closed() {
                reopened_at = Some(self.state.steps_taken);
            }
            match self.panel.volts() {
                Ok(volts) if volts.is_finite() => samples.push(Sample {
                    step: self.state.steps_taken,
                    volts,
                }),
                Ok(volts) => log::warn!("Discarding panel reading {} at step {}", volts, self.state.steps_taken),
                Err(e) => log::warn!("Panel read failed at step {}: {:#}", self.state.steps_taken, e),
            }
        }

        let peak = match first_peak(&samples) {
            Some(peak) if samples.len() >= expected => peak,
            _ => {
                log::error!("Some values missing! Should be {}, is {}", expected, samples.len());
                return Err(MotionError::IncompleteSweep {
                    expected,
                    collected: samples.len(),
                });
            }
        };
        let (peak_index, peak_volts) = peak;

        // Sample k was read one step past position k.
        let back = expected as i32 - peak_index as i32;
        log::info!(
            "Peak {:.3} V at sample {}, rotating back {} steps",
            peak_volts,
            peak_index,
            back
        );
        self.steps(Rotation::CounterClockwise, back)?;

        if let Some(steps) = reopened_at {
            self.state.microswitch_steps = steps;
        }

        let south_latched = at_noon();
        if south_latched {
            self.state.south_step = Some(self.state.steps_taken);
            self.offsets = Self::offsets_for(&self.config, &self.state);
            log::info!("South step {} set", self.state.steps_taken);
        }

        Ok(Calibration {
            peak_index,
            peak_volts,
            samples: samples.len(),
            steps_taken: self.state.steps_taken,
            south_latched,
        })
    }

    pub fn move_to(&mut self, target: i32) -> Result<i32> {
        self.run(|m| m.travel_to(target))
    }

    fn travel_to(&mut self, target: i32) -> Result<i32> {
        let target = target.clamp(0, self.state.max_steps_to_rotate);
        let delta = target - self.state.steps_taken;
        let rotation = if delta >= 0 {
            Rotation::Clockwise
        } else {
            Rotation::CounterClockwise
        };
        self.steps(rotation, delta.abs())
    }

    fn sample_panel(&mut self) -> Option<f32> {
        match self.panel.volts() {
            Ok(volts) if volts.is_finite() => Some(volts),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Panel read failed: {:#}", e);
                None
            }
        }
    }

    /// Follow the sun for the minutes elapsed since the last wake.
    ///
    /// A drop in panel voltage after the move means the table overshot; it is
    /// turned back half the way once, without searching further.
    pub fn advance_for(&mut self, elapsed_minutes: i64) -> Result<Advance> {
        self.run(|m| m.follow_sun(elapsed_minutes))
    }

    fn follow_sun(&mut self, elapsed_minutes: i64) -> Result<Advance> {
        let requested = (elapsed_minutes.max(0) as f32 * self.config.steps_per_minute()).round() as i32;
        if requested == 0 {
            return Ok(Advance {
                requested,
                moved: 0,
                corrected: 0,
            });
        }

        let before = self.sample_panel();
        let moved = self.steps(Rotation::Clockwise, requested)?;
        let after = self.sample_panel();
        log::info!("Advanced {} of {} steps for {} minutes", moved, requested, elapsed_minutes);

        let mut corrected = 0;
        if let (Some(before), Some(after)) = (before, after) {
            if moved > 0 && after < before {
                log::info!("Rotated too much, rotating back half of the advance");
                corrected = self.steps(Rotation::CounterClockwise, requested / 2)?;
            }
        }

        Ok(Advance {
            requested,
            moved,
            corrected,
        })
    }

    /// First wake of a day: face the sunrise side.
    pub fn start_of_day(&mut self) -> Result<i32> {
        self.run(|m| {
            let east = m.offsets.map(|o| o.east);
            if east.is_none() || !m.state.within_switch_zone() {
                m.homing(Homing::BackOff)?;
            }
            match east {
                Some(east) => {
                    log::info!("Turning to east step {}", east);
                    m.travel_to(east)?;
                }
                None => log::info!("No south reference yet, staying at the limiter"),
            }
            Ok(m.state.steps_taken)
        })
    }

    /// Return to the limiter for the night, unless already there.
    pub fn park(&mut self) -> Result<bool> {
        if self.state.within_switch_zone() {
            log::info!("Already in sleep position");
            return Ok(false);
        }
        log::info!("Moving to sleep position");
        self.run(|m| m.homing(Homing::BackOff)).map(|_| true)
    }
}
