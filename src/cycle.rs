//! One wake cycle: battery check, decide, move, report, save, suspend.

use chrono::{DateTime, TimeDelta, Utc};
use embedded_hal::digital::InputPin;
use log::*;
use std::path::Path;
use std::time::Duration;

use clock::Clock;
use motion::{Calibration, Drive, Motion, MotionError};
use network::{Publisher, Reading, Telemetry};
use sensors::{Environment, Voltmeter};

use crate::boot_log::{BootLog, Milestone};
use crate::fault::{self, Fault, System};
use crate::runtime::RuntimeState;

const BATTERY_SAMPLES: usize = 3;

/// Recalibrate if the last sweep is older than this.
pub fn recalibration_interval() -> TimeDelta {
    TimeDelta::days(7)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    FirstRun,
    /// A sweep at noon to learn where south is.
    MiddayReference,
    Weekly,
    /// The step count was forgotten after a failed move.
    PositionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Battery too low or unreadable; report only.
    Hold,
    Park,
    Calibrate(Reason),
    Advance { minutes: i64 },
    StartOfDay,
}

impl Plan {
    fn is_daytime_motion(&self) -> bool {
        matches!(self, Plan::Calibrate(_) | Plan::Advance { .. } | Plan::StartOfDay)
    }
}

/// Decide what this wake does. No side effects.
pub fn plan(state: &RuntimeState, battery: Option<f32>, clock: &Clock, now: DateTime<Utc>) -> Plan {
    match battery {
        Some(volts) if volts >= state.battery_low_voltage => {}
        Some(volts) => {
            warn!("Battery {:.2} V below {:.2} V, no motion", volts, state.battery_low_voltage);
            return Plan::Hold;
        }
        None => {
            warn!("Battery voltage unknown, no motion");
            return Plan::Hold;
        }
    }

    if !clock.window(now).map_or(false, |w| w.daytime) {
        return Plan::Park;
    }

    let Some(calibrated) = state.last_calibration else {
        return Plan::Calibrate(Reason::FirstRun);
    };

    // Recovered by a sweep, which re-homes on the way.
    if state.motor_state().position_lost() {
        return Plan::Calibrate(Reason::PositionLost);
    }

    if clock.is_noon_hour(now) {
        if state.south_step.is_none() {
            return Plan::Calibrate(Reason::MiddayReference);
        }
        if now - calibrated > recalibration_interval() {
            return Plan::Calibrate(Reason::Weekly);
        }
    }

    match state.last_wake {
        Some(last) if clock.same_day(last, now) => Plan::Advance {
            minutes: clock.minutes_since(last, now),
        },
        _ => Plan::StartOfDay,
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub plan: Plan,
    pub calibration: Option<Calibration>,
    pub motion_error: Option<MotionError>,
    pub saved: bool,
    pub suspend: Duration,
    pub keep_awake: Duration,
}

/// Everything one wake cycle touches, borrowed from `main`.
pub struct WakeCycle<'a, D, S, P, T> {
    pub motion: &'a mut Motion<D, S, P>,
    pub battery: &'a mut dyn Voltmeter,
    pub environment: &'a mut dyn Environment,
    pub telemetry: &'a mut Telemetry<T>,
    pub clock: &'a Clock,
    pub boot_log: &'a BootLog,
    pub system: &'a dyn System,
    pub device_id: &'a str,
    pub now: &'a dyn Fn() -> DateTime<Utc>,
}

impl<'a, D, S, P, T> WakeCycle<'a, D, S, P, T>
where
    D: Drive,
    S: InputPin,
    P: Voltmeter,
    T: Publisher,
{
    pub fn run(&mut self, state: &mut RuntimeState, state_path: &Path) -> Result<CycleReport, Fault> {
        fault::check_heap(self.system)?;

        let battery = match self.battery.average(BATTERY_SAMPLES) {
            Ok(volts) => {
                info!("Battery {:.2} V", volts);
                state.last_battery_voltage = Some(volts);
                Some(volts)
            }
            Err(e) => {
                warn!("Battery read failed: {:#}", e);
                None
            }
        };

        let started = (self.now)();
        let plan = plan(state, battery, self.clock, started);
        info!("Plan for this wake: {:?}", plan);

        let mut calibration = None;
        let mut motion_error = None;
        match self.execute(plan) {
            Ok(done) => {
                if plan.is_daytime_motion() {
                    state.last_wake = Some(started);
                }
                if let Some(done) = &done {
                    state.last_calibration = Some((self.now)());
                    info!(
                        "Calibrated, peak {:.3} V at step {}",
                        done.peak_volts, done.steps_taken
                    );
                }
                calibration = done;
            }
            Err(e) => {
                error!("Motion failed: {}", e);
                if e.position_lost() {
                    self.motion.forget_position();
                }
                self.boot_log.record(Milestone::Fault(e.to_string()));
                self.report_error(&e.to_string());
                motion_error = Some(e);
            }
        }

        self.report_sensors(state, battery);

        state.absorb(self.motion.state());
        let saved = match state.save(state_path) {
            Ok(()) => {
                self.boot_log.record(Milestone::StateSaved);
                true
            }
            Err(e) => {
                error!("{}", e);
                self.boot_log.record(Milestone::StateSaveFailed(e.to_string()));
                self.report_error(&e.to_string());
                false
            }
        };

        let suspend = self
            .clock
            .suspend_for((self.now)(), Duration::from_secs(state.suspend_secs));
        self.boot_log.record(Milestone::Suspend {
            secs: suspend.as_secs(),
        });

        Ok(CycleReport {
            plan,
            calibration,
            motion_error,
            saved,
            suspend,
            keep_awake: Duration::from_secs(state.keep_awake_secs),
        })
    }

    fn execute(&mut self, plan: Plan) -> motion::Result<Option<Calibration>> {
        let clock = self.clock;
        let now = self.now;
        match plan {
            Plan::Hold => {}
            Plan::Park => {
                self.motion.park()?;
            }
            Plan::Calibrate(reason) => {
                info!("Calibration sweep, {:?}", reason);
                let done = self.motion.sweep(|| clock.is_noon_hour(now()))?;
                return Ok(Some(done));
            }
            Plan::Advance { minutes } => {
                self.motion.advance_for(minutes)?;
            }
            Plan::StartOfDay => {
                self.motion.start_of_day()?;
            }
        }
        Ok(None)
    }

    fn report_sensors(&mut self, state: &mut RuntimeState, battery: Option<f32>) {
        let mut readings = Vec::with_capacity(4);
        match self.environment.measure() {
            Ok(climate) => {
                state.last_temperature = Some(climate.temperature);
                state.last_humidity = Some(climate.humidity);
                state.last_pressure = Some(climate.pressure);
                readings.push(Reading::Temperature(climate.temperature));
                readings.push(Reading::Humidity(climate.humidity));
                readings.push(Reading::Pressure(climate.pressure));
            }
            Err(e) => warn!("Environment sensor read failed: {:#}", e),
        }
        if let Some(volts) = battery {
            readings.push(Reading::BatteryVoltage(volts));
        }
        for reading in readings {
            if let Err(e) = self.telemetry.report(reading) {
                warn!("Telemetry: {:#}", e);
            }
        }
    }

    fn report_error(&mut self, text: &str) {
        let report = fault::error_report(self.clock, (self.now)(), self.system, self.device_id, text);
        if let Err(e) = self.telemetry.report_error(&report) {
            warn!("Error report not sent: {:#}", e);
        }
    }
}
