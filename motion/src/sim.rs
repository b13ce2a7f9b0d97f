//! A simulated turntable for exercising `Motion` off the target.
//!
//! The bench tracks the physical position of the platform, independent of the
//! step count the controller believes in. The limiter switch closes at or
//! below position zero and has hysteresis: once closed it only reopens when
//! the platform is back at `release_at` steps.

use std::cell::RefCell;
use std::collections::HashSet;
use std::convert::Infallible;
use std::rc::Rc;

use anyhow::bail;
use embedded_hal::digital::{ErrorType, InputPin};
use sensors::Voltmeter;

use crate::drive::Drive;
use crate::motion::{Motion, MotionConfig};
use crate::states::{MotorState, Rotation};

const DEFAULT_RELEASE_AT: i32 = 4;

struct Table {
    position: i32,
    closed: bool,
    release_at: i32,
    stuck_open: bool,
    curve: Box<dyn Fn(i32) -> f32>,
    dropped_reads: HashSet<i32>,
    fail_after: Option<usize>,
    steps_issued: usize,
    released: bool,
}

impl Table {
    fn settle_switch(&mut self) {
        if self.stuck_open {
            self.closed = false;
        } else if self.position <= 0 {
            self.closed = true;
        } else if self.position >= self.release_at {
            self.closed = false;
        }
    }
}

#[derive(Clone)]
pub struct Bench {
    table: Rc<RefCell<Table>>,
}

impl Bench {
    /// A bench with the platform `position` steps clockwise of the switch.
    pub fn at(position: i32) -> Self {
        let mut table = Table {
            position,
            closed: false,
            release_at: DEFAULT_RELEASE_AT,
            stuck_open: false,
            curve: Box::new(|_| 0.0),
            dropped_reads: HashSet::new(),
            fail_after: None,
            steps_issued: 0,
            released: false,
        };
        table.settle_switch();
        Bench {
            table: Rc::new(RefCell::new(table)),
        }
    }

    pub fn with_release_at(self, steps: i32) -> Self {
        {
            let mut table = self.table.borrow_mut();
            table.release_at = steps;
            table.settle_switch();
        }
        self
    }

    /// Panel voltage as a function of physical position.
    pub fn with_curve(self, curve: impl Fn(i32) -> f32 + 'static) -> Self {
        self.table.borrow_mut().curve = Box::new(curve);
        self
    }

    /// A single brightest position with a gentle slope on both sides.
    pub fn peak_at_position(self, position: i32) -> Self {
        self.with_curve(move |p| 5.0 - (p - position).abs() as f32 * 0.01)
    }

    /// Sweep samples are taken after each step, so sample `k` is read at
    /// position `k + 1`.
    pub fn peak_at_sample(self, index: usize) -> Self {
        self.peak_at_position(index as i32 + 1)
    }

    pub fn stuck_open(self) -> Self {
        {
            let mut table = self.table.borrow_mut();
            table.stuck_open = true;
            table.settle_switch();
        }
        self
    }

    /// Panel reads fail while the platform is at `position`.
    pub fn dropping_read_at(self, position: i32) -> Self {
        self.table.borrow_mut().dropped_reads.insert(position);
        self
    }

    /// The drive faults once `steps` steps have been issued.
    pub fn failing_after(self, steps: usize) -> Self {
        self.table.borrow_mut().fail_after = Some(steps);
        self
    }

    pub fn position(&self) -> i32 {
        self.table.borrow().position
    }

    pub fn steps_issued(&self) -> usize {
        self.table.borrow().steps_issued
    }

    /// Whether the coils were de-energized after the last step.
    pub fn released(&self) -> bool {
        self.table.borrow().released
    }

    pub fn drive(&self) -> SimDrive {
        SimDrive {
            table: self.table.clone(),
        }
    }

    pub fn switch(&self) -> SimSwitch {
        SimSwitch {
            table: self.table.clone(),
        }
    }

    pub fn panel(&self) -> SimPanel {
        SimPanel {
            table: self.table.clone(),
        }
    }

    pub fn motion(&self, config: MotionConfig, state: MotorState) -> Motion<SimDrive, SimSwitch, SimPanel> {
        Motion::new(self.drive(), self.switch(), self.panel(), config, state)
    }
}

pub struct SimDrive {
    table: Rc<RefCell<Table>>,
}

impl Drive for SimDrive {
    fn step(&mut self, rotation: Rotation) -> anyhow::Result<()> {
        let mut table = self.table.borrow_mut();
        if let Some(limit) = table.fail_after {
            if table.steps_issued >= limit {
                bail!("coil driver not responding");
            }
        }
        table.steps_issued += 1;
        table.released = false;
        table.position += rotation.delta();
        table.settle_switch();
        Ok(())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.table.borrow_mut().released = true;
        Ok(())
    }
}

pub struct SimSwitch {
    table: Rc<RefCell<Table>>,
}

impl ErrorType for SimSwitch {
    type Error = Infallible;
}

impl InputPin for SimSwitch {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.table.borrow().closed)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.table.borrow().closed)
    }
}

pub struct SimPanel {
    table: Rc<RefCell<Table>>,
}

impl Voltmeter for SimPanel {
    fn volts(&mut self) -> anyhow::Result<f32> {
        let table = self.table.borrow();
        if table.dropped_reads.contains(&table.position) {
            bail!("ADC read timed out at position {}", table.position);
        }
        Ok((table.curve)(table.position))
    }
}
